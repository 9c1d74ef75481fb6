pub mod location;
pub mod sample;

pub use location::{Location, NewLocation};
pub use sample::{from_millis, NewSample, OvercrowdedReading, VisitorSample};
