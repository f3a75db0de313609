//! Lock-state synchronization with a network-controlled door lock.

pub mod autolock;
pub mod dispatcher;
pub mod engine;
pub mod http_client;
pub mod listener;
pub mod poller;
pub mod state;
pub mod token_store;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::LockStateEngine;
pub use http_client::{DeviceTransport, HttpClient};
pub use state::{DeviceStatusResponse, LockState, LockStatus, TargetState};
pub use token_store::{Token, TokenStore};
