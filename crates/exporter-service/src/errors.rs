//! Exporter error types.
//!
//! Only startup paths surface these to the caller. Everything that happens
//! while events are flowing is logged and absorbed at the point of detection
//! (see `dispatch` and the individual service handlers).

use thiserror::Error;

/// Exporter error type.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// An instrument with the same fully-qualified name was already declared.
    #[error("Instrument already declared: {0}")]
    DuplicateInstrument(String),

    /// The instrument backend rejected the declaration (bad name, empty help, ...).
    #[error("Invalid instrument {name}: {reason}")]
    InvalidInstrument { name: String, reason: String },

    /// The primary daemon transport could not be established.
    #[error("Transport error: {0}")]
    Transport(String),

    /// TLS material could not be loaded or assembled.
    #[error("TLS error: {0}")]
    Tls(String),

    /// HTTP server could not be started.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ExporterError {
    /// Returns true if the process cannot continue after this error.
    ///
    /// Declaration errors are programming errors surfaced at startup, so
    /// they are fatal along with transport, TLS and server failures.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            ExporterError::DuplicateInstrument(_)
            | ExporterError::InvalidInstrument { .. }
            | ExporterError::Transport(_)
            | ExporterError::Server(_)
            | ExporterError::Config(_) => true,
            ExporterError::Tls(_) => false,
        }
    }
}

impl From<crate::config::ConfigError> for ExporterError {
    fn from(err: crate::config::ConfigError) -> Self {
        ExporterError::Config(err.to_string())
    }
}

impl From<crate::rpc::RpcError> for ExporterError {
    fn from(err: crate::rpc::RpcError) -> Self {
        ExporterError::Transport(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::rpc::RpcError;

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!(
                "{}",
                ExporterError::DuplicateInstrument("stai_wallet_synced".to_string())
            ),
            "Instrument already declared: stai_wallet_synced"
        );
        assert_eq!(
            format!(
                "{}",
                ExporterError::InvalidInstrument {
                    name: "stai_wallet_synced".to_string(),
                    reason: "empty help".to_string(),
                }
            ),
            "Invalid instrument stai_wallet_synced: empty help"
        );
    }

    #[test]
    fn test_tls_errors_are_not_fatal() {
        // Missing secondary-channel certificates only degrade functionality
        assert!(!ExporterError::Tls("missing key".to_string()).is_fatal());
        assert!(ExporterError::Transport("refused".to_string()).is_fatal());
    }

    #[test]
    fn test_config_error_conversion() {
        let err: ExporterError = ConfigError::InvalidValue("EXPORTER_METRICS_PORT".to_string()).into();
        assert!(matches!(err, ExporterError::Config(_)));
        assert!(err.to_string().contains("EXPORTER_METRICS_PORT"));
    }

    #[test]
    fn test_rpc_error_conversion() {
        let err: ExporterError = RpcError::Closed.into();
        assert!(matches!(err, ExporterError::Transport(_)));
    }
}
