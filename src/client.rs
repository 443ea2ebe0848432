//! HTTP client for the quota service and the system under test.
//!
//! A thin wrapper over [`reqwest::Client`]: every call posts a JSON body,
//! blocks the issuing virtual user until response or timeout, and is
//! never retried. Non-200 HTTP answers and transport faults come back as
//! [`RequestError`] so the body is never parsed on a failed exchange.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::error::{HarnessError, RequestError};
use crate::request::{AllocRequest, AllowRequest, FreeRequest, ViewRequest};

const ALLOW_PATH: &str = "/api/v1/allow";
const ALLOC_PATH: &str = "/api/v1/alloc";
const FREE_PATH: &str = "/api/v1/free";
const VIEW_PATH: &str = "/api/v1/view";
const PING_PATH: &str = "/api/v1/ping";

/// Client for one run. Cheap to clone; all clones share the underlying
/// connection pool.
#[derive(Clone)]
pub struct QmsClient {
    http: Client,
    qms_base: Url,
    sut_base: Option<Url>,
}

/// Normalize an address into a base URL.
///
/// The original deployment passed bare `host:port` addresses and
/// interpolated `http://` in front; accept both forms.
pub fn normalize_addr(addr: &str) -> Result<Url, HarnessError> {
    let with_scheme = if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    };
    Url::parse(&with_scheme).map_err(|e| HarnessError::Address {
        message: format!("'{addr}': {e}"),
    })
}

impl QmsClient {
    /// Build a client with a per-call timeout.
    ///
    /// `sut_addr` is optional: without it, granted quotas are counted but
    /// no secondary ping is issued.
    pub fn new(
        qms_addr: &str,
        sut_addr: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, HarnessError> {
        let qms_base = normalize_addr(qms_addr)?;
        let sut_base = sut_addr.map(normalize_addr).transpose()?;

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HarnessError::Address {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            qms_base,
            sut_base,
        })
    }

    /// Whether a system-under-test address was configured.
    pub fn has_sut(&self) -> bool {
        self.sut_base.is_some()
    }

    /// The normalized QMS base URL.
    pub fn qms_base(&self) -> &Url {
        &self.qms_base
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<String, RequestError> {
        let url = join(&self.qms_base, path);
        debug!(target: "qms.client", %url, "POST");

        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| RequestError::classify_reqwest(&e))?;

        let status = response.status().as_u16();
        if status != 200 {
            // Domain failures travel inside a 200 body; anything else is
            // a transport fault and the body is not read.
            return Err(RequestError::Http { status });
        }

        response
            .text()
            .await
            .map_err(|e| RequestError::classify_reqwest(&e))
    }

    /// `POST /api/v1/allow`.
    pub async fn allow(&self, req: &AllowRequest) -> Result<String, RequestError> {
        self.post(ALLOW_PATH, req).await
    }

    /// `POST /api/v1/alloc`.
    pub async fn alloc(&self, req: &AllocRequest) -> Result<String, RequestError> {
        self.post(ALLOC_PATH, req).await
    }

    /// `POST /api/v1/free`.
    pub async fn free(&self, req: &FreeRequest) -> Result<String, RequestError> {
        self.post(FREE_PATH, req).await
    }

    /// `POST /api/v1/view`.
    pub async fn view(&self, req: &ViewRequest) -> Result<String, RequestError> {
        self.post(VIEW_PATH, req).await
    }

    /// `GET /api/v1/ping` against the system under test. There is no
    /// response contract beyond reachability.
    ///
    /// Returns `Ok(false)` without issuing anything when no SUT address
    /// is configured.
    pub async fn ping_sut(&self) -> Result<bool, RequestError> {
        let Some(base) = &self.sut_base else {
            return Ok(false);
        };
        let url = join(base, PING_PATH);
        debug!(target: "qms.client", %url, "GET");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RequestError::classify_reqwest(&e))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(RequestError::Http { status });
        }
        Ok(true)
    }
}

fn join(base: &Url, path: &str) -> Url {
    // Base URLs come from normalize_addr and always have a host, so a
    // join cannot fail for our fixed endpoint paths.
    base.join(path).expect("endpoint path is valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::QuotaKey;

    #[test]
    fn test_normalize_bare_host_port() {
        let url = normalize_addr("localhost:6789").unwrap();
        assert_eq!(url.as_str(), "http://localhost:6789/");
    }

    #[test]
    fn test_normalize_keeps_explicit_scheme() {
        let url = normalize_addr("https://qms.internal:8443").unwrap();
        assert_eq!(url.scheme(), "https");
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(matches!(
            normalize_addr("http://").unwrap_err(),
            HarnessError::Address { .. }
        ));
    }

    #[test]
    fn test_client_without_sut() {
        let client =
            QmsClient::new("localhost:6789", None, Duration::from_secs(1)).unwrap();
        assert!(!client.has_sut());
    }

    #[tokio::test]
    async fn test_ping_without_sut_is_noop() {
        let client =
            QmsClient::new("localhost:6789", None, Duration::from_secs(1)).unwrap();
        assert_eq!(client.ping_sut().await.unwrap(), false);
    }

    #[tokio::test]
    async fn test_allow_against_mock_returns_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/allow")
            .match_header("content-type", "application/json")
            .with_status(200)
            .with_body(r#"{"status":1001,"msg":"ok","result":{"ok":true,"wait_time":0}}"#)
            .create_async()
            .await;

        let client = QmsClient::new(&server.url(), None, Duration::from_secs(1)).unwrap();
        let body = client
            .allow(&AllowRequest::new(QuotaKey::numbered(1, 1)))
            .await
            .unwrap();
        assert!(body.contains("\"status\":1001"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_200_is_transport_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/view")
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let client = QmsClient::new(&server.url(), None, Duration::from_secs(1)).unwrap();
        let err = client
            .view(&ViewRequest::new(QuotaKey::numbered(1, 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Http { status: 503 }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_connection_error() {
        // Port 1 is never listening.
        let client = QmsClient::new("127.0.0.1:1", None, Duration::from_secs(1)).unwrap();
        let err = client
            .allow(&AllowRequest::new(QuotaKey::numbered(1, 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_ping_sut_hits_ping_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/ping")
            .with_status(200)
            .with_body(r#"{"status":1001,"msg":"ok"}"#)
            .create_async()
            .await;

        let client =
            QmsClient::new("localhost:6789", Some(server.url().as_str()), Duration::from_secs(1))
                .unwrap();
        assert!(client.ping_sut().await.unwrap());
        mock.assert_async().await;
    }
}
