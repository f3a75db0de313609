//! Lock-state synchronization engine.
//!
//! Wires the poller, the push listener, the command dispatcher and the
//! autolock timer around one serialized current/target pair. The bridge reads
//! and subscribes to that pair and asks for new targets; everything else is
//! driven by device evidence.

use super::autolock::AutolockScheduler;
use super::dispatcher::CommandDispatcher;
use super::http_client::{DeviceTransport, HttpClient};
use super::listener::ListenerServer;
use super::poller::StatusPoller;
use super::state::{LockState, LockStateCell, LockStatus, TargetState};
use super::token_store::TokenStore;
use crate::config::{AutolockMode, EngineConfig};
use crate::error::{BridgeError, Result};
use log::{info, warn};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// State and components shared by every event source.
///
/// Each event (a poll result, a push, a recorded target) runs start to finish
/// under `events`, so a state change and the autolock arm or cancel it causes
/// are never interleaved with another event.
pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    events: Mutex<()>,
    pub(crate) state: LockStateCell,
    pub(crate) tokens: Arc<Mutex<TokenStore>>,
    pub(crate) dispatcher: CommandDispatcher,
    pub(crate) poller: StatusPoller,
    pub(crate) autolock: AutolockScheduler,
}

impl EngineInner {
    pub(crate) fn new(config: EngineConfig, transport: Arc<dyn DeviceTransport>) -> Arc<Self> {
        let tokens = Arc::new(Mutex::new(TokenStore::new(config.token_timeout())));
        let dispatcher = CommandDispatcher::new(&config, tokens.clone(), transport.clone());
        let poller = StatusPoller::new(&config, tokens.clone(), transport);
        Arc::new(Self {
            config,
            events: Mutex::new(()),
            state: LockStateCell::default(),
            tokens,
            dispatcher,
            poller,
            autolock: AutolockScheduler::new(),
        })
    }

    /// Apply a status reported by the device. Returns the previous pair if
    /// anything changed.
    fn apply_device_status(&self, status: LockStatus, source: &str) -> Option<LockStatus> {
        let old = self.state.set(status)?;
        info!(
            "[{}] Lock is {} (target {}), was {} (target {})",
            source, status.current, status.target, old.current, old.target
        );
        Some(old)
    }

    /// Only a transition of the current state into unsecured arms the
    /// autolock here, so repeated polls of an open lock do not keep pushing
    /// the relock back.
    pub(crate) fn on_polled_status(self: &Arc<Self>, status: LockStatus) {
        let _event = self.events.lock();
        let Some(old) = self.apply_device_status(status, "Poll") else {
            return;
        };
        match status.current {
            LockState::Unsecured if old.current != LockState::Unsecured => self.arm_autolock(),
            LockState::Secured => {
                self.autolock.cancel();
            }
            _ => {}
        }
    }

    /// The device could not be reached; the target stays as last requested.
    pub(crate) fn mark_unreachable(&self) {
        let _event = self.events.lock();
        if self.state.set_current(LockState::Unknown).is_some() {
            info!("[Poll] Lock state is now unknown");
        }
    }

    pub(crate) fn on_locked_push(&self) {
        let _event = self.events.lock();
        self.apply_device_status(LockStatus::settled(TargetState::Secured), "Push");
        self.autolock.cancel();
        info!("[Push] Updated current to locked");
    }

    /// Every unlocked push restarts the relock countdown, even when the
    /// state was already unsecured.
    pub(crate) fn on_unlocked_push(self: &Arc<Self>) {
        let _event = self.events.lock();
        self.apply_device_status(LockStatus::settled(TargetState::Unsecured), "Push");
        info!("[Push] Updated current to unlocked");
        self.arm_autolock();
    }

    fn arm_autolock(self: &Arc<Self>) {
        if self.config.autolock != AutolockMode::Plugin {
            return;
        }
        let weak = Arc::downgrade(self);
        self.autolock.arm(self.config.autolock_delay(), async move {
            if let Some(engine) = weak.upgrade() {
                // Failure is already logged by the dispatcher
                let _ = engine.set_target_state(TargetState::Secured).await;
            }
        });
    }

    fn record_target(&self, target: TargetState) {
        let _event = self.events.lock();
        if self.state.set_target(target).is_some() {
            info!("[Command] Target set to {}", target);
        }
    }

    /// Record the target optimistically and send the command.
    pub(crate) async fn set_target_state(&self, target: TargetState) -> Result<()> {
        self.record_target(target);
        self.dispatcher.send(target).await
    }
}

/// Synchronizes one lock with the bridge.
pub struct LockStateEngine {
    inner: Arc<EngineInner>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    listener: tokio::sync::Mutex<Option<ListenerServer>>,
}

impl LockStateEngine {
    /// Build an engine that talks to the device over HTTP.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let transport = Arc::new(HttpClient::new(&config)?);
        Ok(Self::with_transport(config, transport))
    }

    /// Build an engine on top of any transport.
    pub fn with_transport(config: EngineConfig, transport: Arc<dyn DeviceTransport>) -> Self {
        Self {
            inner: EngineInner::new(config, transport),
            poll_task: Mutex::new(None),
            listener: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Bind the push listener and start polling. The first poll runs right
    /// away.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut listener = self.listener.lock().await;
        if let Some(server) = listener.as_ref() {
            warn!("Engine already started");
            return Ok(server.local_addr());
        }

        let server = ListenerServer::start(self.inner.clone(), self.inner.config.listener_port).await?;
        let addr = server.local_addr();
        *listener = Some(server);
        *self.poll_task.lock() = Some(StatusPoller::spawn(&self.inner));

        info!(
            "Engine started for {} ({}), polling every {}s, autolock {}",
            self.inner.config.name,
            self.inner.config.device_root(),
            self.inner.config.poll_interval,
            self.inner.config.autolock
        );
        Ok(addr)
    }

    /// Address the push listener is bound to.
    pub async fn listener_addr(&self) -> Result<SocketAddr> {
        self.listener
            .lock()
            .await
            .as_ref()
            .map(ListenerServer::local_addr)
            .ok_or(BridgeError::ListenerNotRunning)
    }

    /// Stop polling, drop any pending relock and close the listener.
    pub async fn shutdown(&self) {
        if let Some(task) = self.poll_task.lock().take() {
            task.abort();
        }
        self.inner.autolock.cancel();
        let server = self.listener.lock().await.take();
        if let Some(server) = server {
            server.shutdown().await;
        }
        info!("Engine stopped");
    }

    /// Current/target pair as last known.
    pub fn report_state(&self) -> LockStatus {
        self.inner.state.get()
    }

    /// Receive every change of the current/target pair, for mirroring into
    /// the bridge's own model.
    pub fn subscribe(&self) -> watch::Receiver<LockStatus> {
        self.inner.state.subscribe()
    }

    /// Number of observable state changes so far.
    pub fn state_version(&self) -> u32 {
        self.inner.state.version()
    }

    /// Ask the lock to move to `target`.
    ///
    /// The target is recorded immediately; the current state follows only
    /// once the device confirms through a poll or a push. The returned handle
    /// may be ignored.
    pub fn request_target_state(&self, target: TargetState) -> JoinHandle<Result<()>> {
        let inner = self.inner.clone();
        inner.record_target(target);
        tokio::spawn(async move { inner.dispatcher.send(target).await })
    }

    /// Poll the device now, outside the regular schedule.
    pub async fn poll_now(&self) -> Result<LockStatus> {
        self.inner.poller.poll_once(&self.inner).await
    }

    pub fn autolock_pending(&self) -> bool {
        self.inner.autolock.is_pending()
    }
}

impl Drop for LockStateEngine {
    /// Without this the listener, which holds the engine state, would keep
    /// serving and polling after the last handle is gone.
    fn drop(&mut self) {
        if let Some(task) = self.poll_task.get_mut().take() {
            task.abort();
        }
        self.inner.autolock.cancel();
        if let Some(server) = self.listener.get_mut().take() {
            server.stop();
        }
    }
}
