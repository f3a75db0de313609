//! Smooth lock bridge library.
//!
//! Keeps a smart-home bridge's view of a network-controlled door lock in
//! sync with the device, through polling, device push notifications and
//! one-time tokens.

pub mod config;
pub mod error;
pub mod lock;
