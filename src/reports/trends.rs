use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Number of trailing days averaged for the next-day prediction
pub const PREDICTION_DAYS: usize = 7;

/// Optional filters for trend queries
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrendFilter {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

impl TrendFilter {
    /// Time range, only when both ends are given
    pub fn range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.from, self.to) {
            (Some(from), Some(to)) => Some((from, to)),
            _ => None,
        }
    }

    /// Region filter, ignoring blank values
    pub fn region(&self) -> Option<&str> {
        self.region
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionTotal {
    pub region: String,
    pub total_visitors: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyTotal {
    /// Calendar day in UTC, `YYYY-MM-DD`
    pub day: String,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionDailyTotal {
    pub region: String,
    pub day: String,
    pub total_visitors: i64,
}

/// A quiet location suggested to visitors
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub location_id: i64,
    pub location: String,
    pub avg_visitors: f64,
}

/// Visitor interests a recommendation can be asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interest {
    Nature,
    Adventure,
    Food,
    Historical,
}

impl Interest {
    pub const ALL: [Interest; 4] = [
        Interest::Nature,
        Interest::Adventure,
        Interest::Food,
        Interest::Historical,
    ];

    /// The location category this interest matches
    pub fn as_str(&self) -> &'static str {
        match self {
            Interest::Nature => "nature",
            Interest::Adventure => "adventure",
            Interest::Food => "food",
            Interest::Historical => "historical",
        }
    }
}

impl std::fmt::Display for Interest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Interest {
    type Err = UnknownInterest;

    /// Exact, case-sensitive match on the category name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interest::ALL
            .into_iter()
            .find(|interest| interest.as_str() == s)
            .ok_or_else(|| UnknownInterest(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Unknown interest '{0}'")]
pub struct UnknownInterest(pub String);

/// A busy location in the category a visitor asked for
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterestRecommendation {
    pub location_id: i64,
    pub name: String,
    pub region: String,
    pub category: String,
    /// Sum of samples over the lookback period
    pub total_visitors: i64,
}

/// One row of the business-owner weekly trend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationDailyTotal {
    pub location: String,
    /// Calendar day in UTC, `YYYY-MM-DD`
    pub day: String,
    pub visitors: i64,
}

/// Start of the `days`-day window ending today: UTC midnight `days - 1` days ago
pub fn trailing_days_start(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(now);
    midnight
        .checked_sub_signed(chrono::Duration::days(i64::from(days.saturating_sub(1))))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Planner dashboard payload
#[derive(Debug, Clone, Serialize)]
pub struct TrendReport {
    pub regions: Vec<RegionTotal>,
    pub daily: Vec<DailyTotal>,
    pub prediction: i64,
}

impl TrendReport {
    pub fn new(regions: Vec<RegionTotal>, daily: Vec<DailyTotal>) -> Self {
        let prediction = predict_next_day(&daily);
        Self {
            regions,
            daily,
            prediction,
        }
    }
}

/// Carry forward the average of the last seven daily totals.
///
/// `daily` must be ordered by day ascending. Returns 0 with no history.
pub fn predict_next_day(daily: &[DailyTotal]) -> i64 {
    let recent = &daily[daily.len().saturating_sub(PREDICTION_DAYS)..];
    if recent.is_empty() {
        return 0;
    }

    let sum: i64 = recent.iter().map(|d| d.total).sum();
    (sum as f64 / recent.len() as f64).round() as i64
}
