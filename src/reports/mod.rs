//! Planner-facing aggregations and exports

pub mod csv;
pub mod trends;

pub use trends::{
    predict_next_day, trailing_days_start, DailyTotal, Interest, InterestRecommendation,
    LocationDailyTotal, Recommendation, RegionDailyTotal, RegionTotal, TrendFilter, TrendReport,
    UnknownInterest,
};
