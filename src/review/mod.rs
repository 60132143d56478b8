//! Driver reviews and the driver's rolling rating.

pub mod service;

/// Fold one more rating into an average over `count` ratings
pub fn rolling_average(average: Option<f64>, count: i64, stars: f64) -> f64 {
    match average {
        Some(avg) if count > 0 => (avg * count as f64 + stars) / (count + 1) as f64,
        _ => stars,
    }
}
