//! Outbound HTTP to the lock device.

use crate::config::{EngineConfig, HttpMethod};
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use log::debug;

/// Anything that can carry a single request to the device.
///
/// Implementations make exactly one attempt; retry policy belongs to the
/// caller.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Send a request and return the response body.
    async fn send(&self, url: &str, method: HttpMethod) -> Result<String>;
}

/// reqwest-backed transport.
///
/// Certificate checks are disabled because lock controllers usually serve a
/// self-signed certificate on the local network.
pub struct HttpClient {
    http: reqwest::Client,
    credentials: Option<(String, String)>,
}

impl HttpClient {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            http,
            credentials: config
                .credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
        })
    }
}

#[async_trait]
impl DeviceTransport for HttpClient {
    async fn send(&self, url: &str, method: HttpMethod) -> Result<String> {
        debug!("{} {}", method, url);

        let mut request = self.http.request(method.into(), url);
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BridgeError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use std::net::SocketAddr;

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_returns_body() {
        let addr = serve(Router::new().route("/status", get(|| async { "{\"current\":1}" }))).await;
        let client = HttpClient::new(&EngineConfig::new(format!("http://{}", addr))).unwrap();

        let body = client
            .send(&format!("http://{}/status?token=x", addr), HttpMethod::Get)
            .await
            .unwrap();
        assert_eq!(body, "{\"current\":1}");
    }

    #[tokio::test]
    async fn test_error_status_keeps_body_and_is_not_transport() {
        let addr = serve(Router::new().route(
            "/lock",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "jammed") }),
        ))
        .await;
        let client = HttpClient::new(&EngineConfig::new(format!("http://{}", addr))).unwrap();

        let err = client
            .send(&format!("http://{}/lock", addr), HttpMethod::Get)
            .await
            .unwrap_err();
        assert!(!err.is_transport());
        match err {
            BridgeError::HttpStatus { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "jammed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_basic_auth_only_with_both_credentials() {
        let router = Router::new().route(
            "/status",
            get(|headers: HeaderMap| async move {
                headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("none")
                    .to_string()
            }),
        );
        let addr = serve(router).await;
        let url = format!("http://{}/status", addr);

        let mut config = EngineConfig::new(format!("http://{}", addr));
        config.username = Some("admin".to_string());
        let client = HttpClient::new(&config).unwrap();
        assert_eq!(client.send(&url, HttpMethod::Get).await.unwrap(), "none");

        config.password = Some("secret".to_string());
        let client = HttpClient::new(&config).unwrap();
        // base64("admin:secret")
        assert_eq!(
            client.send(&url, HttpMethod::Get).await.unwrap(),
            "Basic YWRtaW46c2VjcmV0"
        );
    }

    #[tokio::test]
    async fn test_unreachable_device() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpClient::new(&EngineConfig::new(format!("http://{}", addr))).unwrap();
        let err = client
            .send(&format!("http://{}/status", addr), HttpMethod::Get)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
        assert!(err.is_transport());
    }
}
