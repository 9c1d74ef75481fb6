//! Overcrowding alerts
//!
//! A background monitor samples recent visitor counts on a fixed cadence
//! and sends one batched notification per cycle for every location over
//! the configured threshold.

pub mod config;
pub mod monitor;
pub mod notifier;

pub use config::{AlertEvent, AlertPolicy};
pub use monitor::{CycleOutcome, MonitorError, MonitorHandle, MonitorState, OvercrowdingMonitor};
pub use notifier::{
    dispatcher_from_config, DispatchError, Dispatcher, LogDispatcher, Notification,
    SmtpDispatcher, WebhookDispatcher,
};
