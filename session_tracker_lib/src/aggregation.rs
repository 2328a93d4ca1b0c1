use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{geo_math::haversine_distance, sample::Sample};

pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Whether the counter moving from `previous_counter` to `new_counter` crosses a multiple of `window_size`.
/// Seeing the same counter value twice (a redelivered update) never fires.
pub fn should_trigger(previous_counter: u64, new_counter: u64, window_size: u64) -> bool {
    window_size > 0
        && new_counter > 0
        && new_counter != previous_counter
        && new_counter % window_size == 0
}

/// Distance and speed over a window of samples.
/// `speed_kmh` is `None` whenever the window spans no time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub distance_km: f64,
    pub speed_kmh: Option<f64>,
    pub sample_count: usize,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
}

impl Aggregate {
    pub fn empty() -> Self {
        Self {
            distance_km: 0.0,
            speed_kmh: None,
            sample_count: 0,
            window_start: None,
            window_end: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WindowAggregator {
    window_size: usize,
}

impl Default for WindowAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl WindowAggregator {
    pub fn new(window_size: usize) -> Self {
        Self { window_size }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Aggregates the leading `window_size` samples of `samples`, which are expected most recent first.
    /// Shorter inputs are fine, e.g. right after a session starts.
    pub fn aggregate(&self, samples: &[Sample]) -> Aggregate {
        let window = &samples[..samples.len().min(self.window_size)];

        let (Some(first), Some(last)) = (window.first(), window.last()) else {
            return Aggregate::empty();
        };

        let start = first.created_at().min(last.created_at());
        let end = first.created_at().max(last.created_at());

        if window.len() < 2 {
            return Aggregate {
                sample_count: window.len(),
                window_start: Some(start),
                window_end: Some(end),
                ..Aggregate::empty()
            };
        }

        let distance_km: f64 = window
            .windows(2)
            .map(|pair| haversine_distance(pair[0].position, pair[1].position))
            .sum();

        let elapsed_seconds = (end - start).num_milliseconds() as f64 / 1000.;

        let speed_kmh = if elapsed_seconds > 0. {
            Some(distance_km / elapsed_seconds * 3600.).filter(|speed| speed.is_finite())
        } else {
            None
        };

        Aggregate {
            distance_km,
            speed_kmh,
            sample_count: window.len(),
            window_start: Some(start),
            window_end: Some(end),
        }
    }
}
