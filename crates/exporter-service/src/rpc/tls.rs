//! TLS material for talking to the node.
//!
//! Every node service authenticates callers with a client certificate signed
//! by the node's private CA, and serves a certificate signed by that same CA
//! under a fixed hostname. The exporter presents the `private_*` identity of
//! the service it talks to and accepts whatever certificate the server
//! presents, while still checking handshake signatures.

use crate::config::Config;
use crate::errors::ExporterError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Client certificate and key of one node service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl ServiceIdentity {
    /// `config/ssl/<service>/private_<service>.{crt,key}` under the node root.
    #[must_use]
    pub fn private(config: &Config, service: &str) -> Self {
        let dir = config.ssl_dir(service);
        Self {
            cert: dir.join(format!("private_{service}.crt")),
            key: dir.join(format!("private_{service}.key")),
        }
    }

    /// Certificate followed by key, PEM-encoded, as one buffer.
    pub fn pem_bundle(&self) -> Result<Vec<u8>, ExporterError> {
        let mut bundle = read(&self.cert)?;
        bundle.push(b'\n');
        bundle.extend(read(&self.key)?);
        Ok(bundle)
    }
}

fn read(path: &Path) -> Result<Vec<u8>, ExporterError> {
    std::fs::read(path).map_err(|e| ExporterError::Tls(format!("{}: {e}", path.display())))
}

/// Build the rustls client config used for the daemon websocket.
pub fn client_config(identity: &ServiceIdentity) -> Result<Arc<ClientConfig>, ExporterError> {
    let certs = CertificateDer::pem_file_iter(&identity.cert)
        .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
        .map_err(|e| ExporterError::Tls(format!("{}: {e}", identity.cert.display())))?;
    if certs.is_empty() {
        return Err(ExporterError::Tls(format!(
            "{}: no certificates found",
            identity.cert.display()
        )));
    }

    let key = PrivateKeyDer::from_pem_file(&identity.key)
        .map_err(|e| ExporterError::Tls(format!("{}: {e}", identity.key.display())))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| ExporterError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NodeCertificateVerifier { provider }))
        .with_client_auth_cert(certs, key)
        .map_err(|e| ExporterError::Tls(e.to_string()))?;

    debug!(
        target: "exporter.tls",
        cert = %identity.cert.display(),
        "Loaded client identity"
    );
    Ok(Arc::new(config))
}

/// Accepts the node's self-signed server certificate.
///
/// Chain and hostname checks are skipped; handshake signatures are still
/// verified against the presented certificate.
#[derive(Debug)]
struct NodeCertificateVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NodeCertificateVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config() -> Config {
        let vars = HashMap::from([(
            "EXPORTER_ROOT_PATH".to_string(),
            "/srv/stai/mainnet".to_string(),
        )]);
        Config::from_vars(&vars).expect("config should load")
    }

    #[test]
    fn test_private_identity_paths() {
        let identity = ServiceIdentity::private(&config(), "crawler");
        assert_eq!(
            identity.cert,
            PathBuf::from("/srv/stai/mainnet/config/ssl/crawler/private_crawler.crt")
        );
        assert_eq!(
            identity.key,
            PathBuf::from("/srv/stai/mainnet/config/ssl/crawler/private_crawler.key")
        );
    }

    #[test]
    fn test_missing_material_is_tls_error() {
        let identity = ServiceIdentity::private(&config(), "daemon");

        let err = client_config(&identity).expect_err("missing cert should fail");
        assert!(matches!(err, ExporterError::Tls(msg) if msg.contains("private_daemon.crt")));

        let err = identity.pem_bundle().expect_err("missing cert should fail");
        assert!(matches!(err, ExporterError::Tls(_)));
    }
}
