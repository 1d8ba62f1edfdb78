//! Media clock timestamps
//!
//! A rational timestamp (`value / timescale` seconds) in the capture
//! hardware's media clock. Every presentation timestamp in the pipeline is
//! a `MediaTime`; wall-clock time never enters the recording path.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;
use std::time::Duration;

/// Timescale used for host-clock derived timestamps (nanoseconds)
pub const NANOS_TIMESCALE: i32 = 1_000_000_000;

/// A presentation timestamp on the media clock
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MediaTime {
    /// Tick count
    pub value: i64,

    /// Ticks per second, always positive
    pub timescale: i32,
}

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime {
        value: 0,
        timescale: 1,
    };

    /// Create a timestamp of `value` ticks at `timescale` ticks per second
    pub const fn new(value: i64, timescale: i32) -> Self {
        let timescale = if timescale > 0 { timescale } else { 1 };
        Self { value, timescale }
    }

    /// Create a timestamp from seconds, rounded to the nearest tick
    pub fn from_seconds(seconds: f64, timescale: i32) -> Self {
        let timescale = timescale.max(1);
        Self::new((seconds * timescale as f64).round() as i64, timescale)
    }

    /// Create a timestamp from a duration since the media clock epoch
    pub fn from_duration(duration: Duration, timescale: i32) -> Self {
        let timescale = timescale.max(1);
        let value = duration.as_nanos() * timescale as u128 / 1_000_000_000;
        Self::new(value as i64, timescale)
    }

    /// Timestamp in seconds
    pub fn seconds(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    /// Re-express this timestamp at another timescale (rounded to nearest)
    pub fn convert_scale(&self, timescale: i32) -> Self {
        let timescale = timescale.max(1);
        if timescale == self.timescale {
            return *self;
        }
        let scaled = self.value as i128 * timescale as i128;
        let divisor = self.timescale as i128;
        let rounded = if scaled >= 0 {
            (scaled + divisor / 2) / divisor
        } else {
            (scaled - divisor / 2) / divisor
        };
        Self::new(rounded as i64, timescale)
    }

    /// Seconds elapsed from `earlier` to `self` (negative if `self` is earlier)
    pub fn seconds_since(&self, earlier: MediaTime) -> f64 {
        self.seconds() - earlier.seconds()
    }

    /// Duration from `earlier` to `self`, zero if `self` is not later
    pub fn saturating_duration_since(&self, earlier: MediaTime) -> Duration {
        let diff = self.seconds_since(earlier);
        if diff > 0.0 {
            Duration::from_secs_f64(diff)
        } else {
            Duration::ZERO
        }
    }

    fn cross(&self, other: &MediaTime) -> (i128, i128) {
        (
            self.value as i128 * other.timescale as i128,
            other.value as i128 * self.timescale as i128,
        )
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = self.cross(other);
        a == b
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = self.cross(other);
        a.cmp(&b)
    }
}

impl Add<Duration> for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: Duration) -> MediaTime {
        let ticks = rhs.as_nanos() as i128 * self.timescale as i128 / 1_000_000_000;
        MediaTime::new(self.value + ticks as i64, self.timescale)
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({:.3}s)", self.value, self.timescale, self.seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_across_timescales() {
        assert_eq!(MediaTime::new(600, 600), MediaTime::new(30, 30));
        assert_eq!(MediaTime::new(1, 1), MediaTime::new(NANOS_TIMESCALE as i64, NANOS_TIMESCALE));
        assert!(MediaTime::new(599, 600) < MediaTime::new(1, 1));
    }

    #[test]
    fn test_add_duration_keeps_timescale() {
        let t = MediaTime::new(120, 600) + Duration::from_secs(1);
        assert_eq!(t.timescale, 600);
        assert_eq!(t.value, 720);

        let streaming = MediaTime::new(3, 30) + Duration::from_secs(5);
        assert_eq!(streaming, MediaTime::new(153, 30));
    }

    #[test]
    fn test_convert_scale_rounds() {
        let t = MediaTime::new(1, 3).convert_scale(600);
        assert_eq!(t.value, 200);
        let back = MediaTime::new(1001, 30000).convert_scale(1000);
        assert_eq!(back.value, 33);
    }

    #[test]
    fn test_saturating_duration() {
        let a = MediaTime::from_seconds(2.5, 1000);
        let b = MediaTime::from_seconds(1.0, 1000);
        assert_eq!(a.saturating_duration_since(b), Duration::from_millis(1500));
        assert_eq!(b.saturating_duration_since(a), Duration::ZERO);
    }
}
