//! Lock state shared between the poller, the listener and the bridge.
//!
//! The current/target pair lives behind a single mutex so that every event
//! source applies its update as one atomic step. Changes bump a version
//! counter and are pushed to subscribers through a watch channel; re-applying
//! the same value is a no-op and emits nothing.

use crate::error::Result;
use parking_lot::Mutex;
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::watch;

/// Actual position of the lock, per device evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Secured,
    Unsecured,
    /// No evidence yet, or the last poll could not reach the device.
    Unknown,
}

/// Last requested position of the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Secured,
    Unsecured,
}

impl TargetState {
    /// Device route that moves the lock into this state.
    pub fn route(self) -> &'static str {
        match self {
            TargetState::Secured => "/lock",
            TargetState::Unsecured => "/unlock",
        }
    }
}

impl From<TargetState> for LockState {
    fn from(target: TargetState) -> Self {
        match target {
            TargetState::Secured => LockState::Secured,
            TargetState::Unsecured => LockState::Unsecured,
        }
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Secured => f.write_str("locked"),
            LockState::Unsecured => f.write_str("unlocked"),
            LockState::Unknown => f.write_str("unknown"),
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        LockState::from(*self).fmt(f)
    }
}

/// The current/target pair reported to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStatus {
    pub current: LockState,
    pub target: TargetState,
}

impl Default for LockStatus {
    fn default() -> Self {
        Self {
            current: LockState::Unknown,
            target: TargetState::Secured,
        }
    }
}

impl LockStatus {
    /// Status with current and target both at `state`.
    pub fn settled(state: TargetState) -> Self {
        Self {
            current: state.into(),
            target: state,
        }
    }
}

/// Body of the device's `/status` response. `1` means secured, any other
/// integer means unsecured. Both fields must be present integers; a missing
/// field is not read as unsecured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DeviceStatusResponse {
    pub current: i64,
    pub target: i64,
}

impl DeviceStatusResponse {
    pub fn parse(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn to_status(self) -> LockStatus {
        let secured = |value: i64| {
            if value == 1 {
                TargetState::Secured
            } else {
                TargetState::Unsecured
            }
        };
        LockStatus {
            current: secured(self.current).into(),
            target: secured(self.target),
        }
    }
}

/// Serialized owner of the lock status.
pub struct LockStateCell {
    status: Mutex<LockStatus>,
    version: AtomicU32,
    sender: watch::Sender<LockStatus>,
}

impl LockStateCell {
    pub fn new(initial: LockStatus) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            status: Mutex::new(initial),
            version: AtomicU32::new(0),
            sender,
        }
    }

    pub fn get(&self) -> LockStatus {
        *self.status.lock()
    }

    /// Number of observable changes so far.
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<LockStatus> {
        self.sender.subscribe()
    }

    /// Replace the whole pair. Returns the previous value if it changed.
    pub fn set(&self, next: LockStatus) -> Option<LockStatus> {
        self.update(|status| *status = next)
    }

    /// Replace only the current state, keeping the requested target.
    pub fn set_current(&self, current: LockState) -> Option<LockStatus> {
        self.update(|status| status.current = current)
    }

    /// Record a requested target without touching the current state.
    pub fn set_target(&self, target: TargetState) -> Option<LockStatus> {
        self.update(|status| status.target = target)
    }

    fn update(&self, apply: impl FnOnce(&mut LockStatus)) -> Option<LockStatus> {
        let mut status = self.status.lock();
        let old = *status;
        apply(&mut status);
        if *status == old {
            return None;
        }
        self.version.fetch_add(1, Ordering::SeqCst);
        // Sent under the lock so subscribers observe changes in apply order.
        self.sender.send_replace(*status);
        Some(old)
    }
}

impl Default for LockStateCell {
    fn default() -> Self {
        Self::new(LockStatus::default())
    }
}
