//! Wall-clock helpers. Records store times as float epoch seconds.

use chrono::Utc;

pub fn epoch_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
