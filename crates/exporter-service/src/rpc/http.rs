//! Secondary channel: per-service HTTP RPC.
//!
//! Used for payloads the daemon socket handles poorly (large plot listings)
//! or that need a filter (peer addresses after a timestamp). Every service
//! answers `POST https://<host>:<port>/<method>` with a JSON object carrying
//! `success` and, on failure, `error`.

use super::tls::ServiceIdentity;
use super::types::{GetPlotsResponse, IpsAfterTimestampOptions, IpsAfterTimestampResponse};
use super::{BulkFetcher, RpcError};
use crate::config::Config;
use crate::errors::ExporterError;
use crate::observability::metrics::record_secondary_request;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Response wrapper shared by every RPC method.
#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    body: T,
}

fn default_success() -> bool {
    true
}

/// Unwrap an RPC response body, mapping `success: false` to `Rejected`.
pub(crate) fn parse_response<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RpcError> {
    let envelope: RpcEnvelope<T> =
        serde_json::from_slice(bytes).map_err(|e| RpcError::Decode(e.to_string()))?;
    if envelope.success {
        Ok(envelope.body)
    } else {
        Err(RpcError::Rejected(
            envelope
                .error
                .unwrap_or_else(|| "unspecified error".to_string()),
        ))
    }
}

/// Client for one service's RPC port.
struct ServiceEndpoint {
    client: reqwest::Client,
    base_url: String,
}

impl ServiceEndpoint {
    fn new(
        config: &Config,
        service: &str,
        port: u16,
    ) -> Result<Self, ExporterError> {
        let identity = ServiceIdentity::private(config, service);
        let pem = identity.pem_bundle()?;
        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| ExporterError::Tls(format!("{service} identity: {e}")))?;

        // Node services present self-signed certificates
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .danger_accept_invalid_certs(true)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ExporterError::Tls(format!("{service} client: {e}")))?;

        Ok(Self {
            client,
            base_url: format!("https://{}:{port}", config.daemon_host),
        })
    }

    async fn call<Req, Resp>(&self, method: &str, body: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{method}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?
            .error_for_status()
            .map_err(map_reqwest_error)?;
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        parse_response(&bytes)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> RpcError {
    if err.is_timeout() {
        // The configured timeout is not carried by the error itself
        RpcError::Timeout(Duration::ZERO)
    } else if err.is_decode() {
        RpcError::Decode(err.to_string())
    } else {
        RpcError::Transport(err.to_string())
    }
}

/// `BulkFetcher` over the crawler and harvester RPC ports.
pub struct HttpRpcClient {
    crawler: ServiceEndpoint,
    harvester: ServiceEndpoint,
    timeout: Duration,
}

impl HttpRpcClient {
    /// Build clients for both services from their private identities.
    ///
    /// # Errors
    ///
    /// Returns `ExporterError::Tls` when an identity is missing or invalid.
    pub fn new(config: &Config) -> Result<Self, ExporterError> {
        Ok(Self {
            crawler: ServiceEndpoint::new(config, "crawler", config.crawler_rpc_port)?,
            harvester: ServiceEndpoint::new(config, "harvester", config.harvester_rpc_port)?,
            timeout: config.request_timeout,
        })
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        request: impl std::future::Future<Output = Result<T, RpcError>>,
    ) -> Result<T, RpcError> {
        let start = Instant::now();
        let result = request.await.map_err(|e| match e {
            RpcError::Timeout(_) => RpcError::Timeout(self.timeout),
            other => other,
        });
        let status = result.as_ref().map_or_else(RpcError::as_label, |_| "success");
        record_secondary_request(operation, status, start.elapsed());

        match &result {
            Ok(_) => debug!(target: "exporter.rpc", operation, elapsed = ?start.elapsed(), "Secondary request completed"),
            Err(e) => warn!(target: "exporter.rpc", operation, error = %e, "Secondary request failed"),
        }
        result
    }
}

#[async_trait]
impl BulkFetcher for HttpRpcClient {
    async fn get_ips_after_timestamp(
        &self,
        options: &IpsAfterTimestampOptions,
    ) -> Result<IpsAfterTimestampResponse, RpcError> {
        self.timed(
            "get_ips_after_timestamp",
            self.crawler.call("get_ips_after_timestamp", options),
        )
        .await
    }

    async fn get_plots(&self) -> Result<GetPlotsResponse, RpcError> {
        self.timed(
            "get_plots",
            self.harvester.call("get_plots", &serde_json::json!({})),
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_success_response() {
        let response: IpsAfterTimestampResponse = parse_response(
            br#"{"ips": ["1.1.1.1", "2.2.2.2"], "total": 2, "success": true}"#,
        )
        .unwrap();
        assert_eq!(response.ips, ["1.1.1.1", "2.2.2.2"]);
        assert_eq!(response.total, 2);
    }

    #[test]
    fn test_parse_rejected_response() {
        let result: Result<GetPlotsResponse, _> =
            parse_response(br#"{"success": false, "error": "harvester not running"}"#);
        assert!(matches!(result, Err(RpcError::Rejected(msg)) if msg == "harvester not running"));
    }

    #[test]
    fn test_parse_malformed_response() {
        let result: Result<GetPlotsResponse, _> = parse_response(b"<html>");
        assert!(matches!(result, Err(RpcError::Decode(_))));
    }

    #[test]
    fn test_client_requires_identities() {
        let vars = HashMap::from([(
            "EXPORTER_ROOT_PATH".to_string(),
            "/nonexistent/stai".to_string(),
        )]);
        let config = Config::from_vars(&vars).unwrap();

        let result = HttpRpcClient::new(&config);
        assert!(matches!(result, Err(ExporterError::Tls(_))));
    }
}
