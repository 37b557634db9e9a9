pub mod derived;

pub use derived::{instantaneous_heart_rate, respiratory_volume_per_time, DerivedMetric};
