use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One recorded visitor-count observation.
///
/// Samples are immutable once written; the only mutation the store allows
/// is deleting a row outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorSample {
    pub id: i64,
    pub location_id: i64,
    pub location_name: String,
    pub timestamp: DateTime<Utc>,
    pub visitor_count: i64,
}

/// Request body for recording an observation
#[derive(Debug, Clone, Deserialize)]
pub struct NewSample {
    pub location_id: i64,
    /// Defaults to the time the sample is received
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub visitor_count: i64,
}

impl NewSample {
    pub fn new(location_id: i64, visitor_count: i64) -> Self {
        Self {
            location_id,
            timestamp: None,
            visitor_count,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// A sample row that breached the threshold, as returned by the
/// windowed overcrowding query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OvercrowdedReading {
    pub location_name: String,
    pub visitor_count: i64,
    pub timestamp: DateTime<Utc>,
}

/// Convert stored unix millis back into a UTC timestamp
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}
