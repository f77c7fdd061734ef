//! Hermie environmental monitor.
//!
//! A sensor reader keeps the latest temperature/humidity reading in a shared
//! state record, an http api exposes it and switches relays, and a notifier
//! (remote or in-process) sounds the buzzer and updates the lcd when a
//! threshold is crossed, rate limited by a cooldown.

pub mod alert;
pub mod config;
pub mod control;
pub mod domain;
pub mod error;
pub mod hal;
pub mod notifier;
pub mod sensor;
pub mod server;
pub mod state;
