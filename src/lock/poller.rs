//! Periodic status polling.

use super::engine::EngineInner;
use super::http_client::DeviceTransport;
use super::state::{DeviceStatusResponse, LockStatus};
use super::token_store::TokenStore;
use crate::config::{EngineConfig, HttpMethod};
use crate::error::{BridgeError, Result};
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Pulls ground-truth status from the device.
pub struct StatusPoller {
    device_root: String,
    interval: Duration,
    tokens: Arc<Mutex<TokenStore>>,
    transport: Arc<dyn DeviceTransport>,
}

impl StatusPoller {
    pub fn new(
        config: &EngineConfig,
        tokens: Arc<Mutex<TokenStore>>,
        transport: Arc<dyn DeviceTransport>,
    ) -> Self {
        Self {
            device_root: config.device_root().to_string(),
            interval: config.poll_interval(),
            tokens,
            transport,
        }
    }

    pub fn status_url(&self, token: &str) -> String {
        format!("{}/status?token={}", self.device_root, token)
    }

    /// Ask the device for its status without touching engine state.
    pub async fn fetch(&self) -> Result<LockStatus> {
        let token = self.tokens.lock().issue();
        let url = self.status_url(token.as_str());
        debug!("[Poll] Getting status: {}", url);

        // Status queries are always GET; the configured method is for commands
        let body = match self.transport.send(&url, HttpMethod::Get).await {
            Ok(body) => body,
            // The device answered, so whatever it sent goes to the parser
            Err(BridgeError::HttpStatus { status, body, .. }) => {
                debug!("[Poll] Device answered HTTP {}", status);
                body
            }
            Err(e) => return Err(e),
        };
        debug!("[Poll] Device response: {}", body);

        match DeviceStatusResponse::parse(&body) {
            Ok(response) => Ok(response.to_status()),
            Err(e) => {
                warn!(
                    "[Poll] Error parsing status response: {}, error: {}",
                    body.trim(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Poll once and apply the outcome to the engine.
    ///
    /// A transport failure marks the current state unknown. Any answer that is
    /// not a status body, error pages included, leaves the state alone.
    pub(crate) async fn poll_once(&self, engine: &Arc<EngineInner>) -> Result<LockStatus> {
        match self.fetch().await {
            Ok(status) => {
                engine.on_polled_status(status);
                Ok(status)
            }
            Err(e) => {
                if e.is_transport() {
                    warn!("[Poll] Error getting status: {}", e);
                    engine.mark_unreachable();
                }
                Err(e)
            }
        }
    }

    /// Spawn the poll loop. The first poll runs immediately.
    ///
    /// The task holds only a weak reference and stops once the engine is gone.
    pub(crate) fn spawn(engine: &Arc<EngineInner>) -> JoinHandle<()> {
        let weak: Weak<EngineInner> = Arc::downgrade(engine);
        let period = engine.poller.interval;
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(engine) = weak.upgrade() else {
                    break;
                };
                // Errors are already logged and reflected in state
                let _ = engine.poller.poll_once(&engine).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::state::{LockState, TargetState};
    use crate::lock::testing::MockTransport;

    fn poller(transport: Arc<MockTransport>) -> StatusPoller {
        let config = EngineConfig::new("http://lock.local/");
        let tokens = Arc::new(Mutex::new(TokenStore::new(config.token_timeout())));
        StatusPoller::new(&config, tokens, transport)
    }

    #[test]
    fn test_status_url() {
        let poller = poller(Arc::new(MockTransport::new()));
        assert_eq!(
            poller.status_url("abc"),
            "http://lock.local/status?token=abc"
        );
    }

    #[tokio::test]
    async fn test_fetch_parses_status() {
        let transport = Arc::new(MockTransport::new());
        transport.set_status(r#"{"current":0,"target":1}"#);
        let poller = poller(transport.clone());

        let status = poller.fetch().await.unwrap();
        assert_eq!(status.current, LockState::Unsecured);
        assert_eq!(status.target, TargetState::Secured);

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, HttpMethod::Get);
        assert!(sent[0].query_param("token").is_some());
    }

    #[tokio::test]
    async fn test_fetch_surfaces_parse_error() {
        let transport = Arc::new(MockTransport::new());
        transport.set_status("not json");
        let err = poller(transport).fetch().await.unwrap_err();
        assert!(!err.is_transport());
    }

    #[tokio::test]
    async fn test_fetch_parses_status_sent_with_error_code() {
        let transport = Arc::new(MockTransport::new());
        transport.set_status(r#"{"current":0,"target":0}"#);
        transport.set_status_code(500);
        let status = poller(transport).fetch().await.unwrap();
        assert_eq!(status, LockStatus::settled(TargetState::Unsecured));
    }

    #[tokio::test]
    async fn test_fetch_treats_error_page_as_parse_error() {
        let transport = Arc::new(MockTransport::new());
        transport.set_status("<html>401</html>");
        transport.set_status_code(401);
        let err = poller(transport).fetch().await.unwrap_err();
        assert!(matches!(err, BridgeError::Parse(_)));
        assert!(!err.is_transport());
    }

    #[tokio::test]
    async fn test_fetch_surfaces_transport_error() {
        let transport = Arc::new(MockTransport::new());
        transport.set_unreachable(true);
        let err = poller(transport).fetch().await.unwrap_err();
        assert!(err.is_transport());
    }
}
