//! Outbound lock/unlock commands.

use super::http_client::DeviceTransport;
use super::state::TargetState;
use super::token_store::TokenStore;
use crate::config::{AutolockMode, EngineConfig, HttpMethod};
use crate::error::Result;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// Turns a requested target state into a device command.
///
/// Sending a command never changes the current state; only device evidence
/// (a poll or a push) does that.
pub struct CommandDispatcher {
    device_root: String,
    method: HttpMethod,
    autolock: AutolockMode,
    autolock_delay: u64,
    tokens: Arc<Mutex<TokenStore>>,
    transport: Arc<dyn DeviceTransport>,
}

impl CommandDispatcher {
    pub fn new(
        config: &EngineConfig,
        tokens: Arc<Mutex<TokenStore>>,
        transport: Arc<dyn DeviceTransport>,
    ) -> Self {
        Self {
            device_root: config.device_root().to_string(),
            method: config.method,
            autolock: config.autolock,
            autolock_delay: config.autolock_delay,
            tokens,
            transport,
        }
    }

    /// `{root}{route}?token={token}`, plus `&auto={delay}` when unlocking and
    /// the device owns autolock.
    pub fn command_url(&self, target: TargetState, token: &str) -> String {
        let mut url = format!("{}{}?token={}", self.device_root, target.route(), token);
        if target == TargetState::Unsecured && self.autolock == AutolockMode::Device {
            url.push_str(&format!("&auto={}", self.autolock_delay));
        }
        url
    }

    /// Send one command. Failures are logged and returned; nothing is retried.
    pub async fn send(&self, target: TargetState) -> Result<()> {
        let token = self.tokens.lock().issue();
        let url = self.command_url(target, token.as_str());
        debug!("[Command] Sending: {}", url);

        match self.transport.send(&url, self.method).await {
            Ok(_) => {
                info!("[Command] Sent {}", url);
                Ok(())
            }
            Err(e) => {
                warn!("[Command] Error sending {}: {}", url, e);
                Err(e)
            }
        }
    }
}
