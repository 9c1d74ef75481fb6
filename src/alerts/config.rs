//! Alert policy and message composition

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::notifier::Notification;
use crate::data::OvercrowdedReading;

/// Default visitor count above which a location is overcrowded
pub const DEFAULT_THRESHOLD: i64 = 50;
/// Default trailing window of samples considered current
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Default time between scheduled cycles
pub const DEFAULT_CADENCE: Duration = Duration::from_secs(15 * 60);
/// Longest window or cadence accepted (one leap year)
pub const MAX_PERIOD: Duration = Duration::from_secs(366 * 24 * 60 * 60);

const ALERT_SENDER_NAME: &str = "Tourism Alerts";
const TEST_SENDER_NAME: &str = "Tourism Alerts Test";
const ALERT_SUBJECT: &str = "Overcrowding Alert";
const TEST_SUBJECT: &str = "Test Email from Smart Tourism Flow Tracker";
const TEST_BODY: &str = "This is a test of the alerting system.";

/// Process-wide alerting settings, fixed at startup
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    /// Visitor count above which a location is overcrowded
    pub threshold: i64,
    /// Trailing span of samples considered current
    pub window: Duration,
    /// Time between scheduled cycles
    pub cadence: Duration,
    /// Sender address for outgoing notifications
    pub sender: String,
    /// Notification recipients
    pub recipients: Vec<String>,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            window: DEFAULT_WINDOW,
            cadence: DEFAULT_CADENCE,
            sender: "alerts@localhost".to_string(),
            recipients: Vec::new(),
        }
    }
}

impl AlertPolicy {
    /// Set the overcrowding threshold
    pub fn with_threshold(mut self, threshold: i64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the trailing window, capped at [`MAX_PERIOD`]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window.min(MAX_PERIOD);
        self
    }

    /// Set the schedule cadence, capped at [`MAX_PERIOD`]
    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence.min(MAX_PERIOD);
        self
    }

    /// Set the sender address (no display name)
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    /// Replace the recipient list
    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }

    /// Window length in whole minutes, as shown in alert bodies
    pub fn window_minutes(&self) -> u64 {
        self.window.as_secs() / 60
    }

    /// Oldest sample timestamp still inside the window at `now`.
    ///
    /// Saturates at the earliest representable time instead of panicking.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// One batched notification covering every event of a cycle
    pub fn overcrowding_notification(&self, events: &[AlertEvent]) -> Notification {
        let list = events
            .iter()
            .map(AlertEvent::summary)
            .collect::<Vec<_>>()
            .join(", ");

        Notification {
            from: mailbox(ALERT_SENDER_NAME, &self.sender),
            to: self.recipients.clone(),
            subject: ALERT_SUBJECT.to_string(),
            body: format!(
                "These locations exceeded {} visitors in the last {} min:\n{}",
                self.threshold,
                self.window_minutes(),
                list
            ),
        }
    }

    /// Canned message for the manual delivery check
    pub fn test_notification(&self) -> Notification {
        Notification {
            from: mailbox(TEST_SENDER_NAME, &self.sender),
            to: self.recipients.clone(),
            subject: TEST_SUBJECT.to_string(),
            body: TEST_BODY.to_string(),
        }
    }
}

/// `"Display Name" <address>` form accepted by mail transports
fn mailbox(display_name: &str, address: &str) -> String {
    format!("\"{}\" <{}>", display_name, address)
}

/// A threshold breach observed during one cycle. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    /// Name of the overcrowded location
    pub location_name: String,
    /// Visitor count of the breaching sample
    pub visitor_count: i64,
    /// Invocation time of the cycle that saw the breach
    pub detected_at: DateTime<Utc>,
}

impl AlertEvent {
    /// Stamp a stored reading with the cycle's detection time
    pub fn from_reading(reading: OvercrowdedReading, detected_at: DateTime<Utc>) -> Self {
        Self {
            location_name: reading.location_name,
            visitor_count: reading.visitor_count,
            detected_at,
        }
    }

    /// `"{location_name} ({visitor_count})"`
    pub fn summary(&self) -> String {
        format!("{} ({})", self.location_name, self.visitor_count)
    }
}
