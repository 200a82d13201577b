use std::cmp::Ordering;
use std::fmt;

use super::constants::DEFAULT_FRAME_RATE;

/// Whole frames per second.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameRate(u32);

impl FrameRate {
    pub fn new(fps: u32) -> Option<Self> {
        (fps > 0).then_some(Self(fps))
    }

    pub fn fps(&self) -> u32 {
        self.0
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self(DEFAULT_FRAME_RATE)
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} fps", self.0)
    }
}

/// Exact rational time offset `value / timescale` seconds.
///
/// A frame's timestamp is derived from its index alone, so the last frame of
/// a long sequence lands on exactly `(n - 1) / fps` without drift. Equality
/// and ordering compare the rationals, not the raw fields.
#[derive(Clone, Copy, Debug)]
pub struct PresentationTimestamp {
    value: i64,
    timescale: u32,
}

impl PresentationTimestamp {
    pub const ZERO: Self = Self {
        value: 0,
        timescale: 1,
    };

    pub fn new(value: i64, timescale: u32) -> Option<Self> {
        (timescale > 0).then_some(Self { value, timescale })
    }

    pub fn for_frame(index: u64, rate: FrameRate) -> Self {
        Self {
            value: index as i64,
            timescale: rate.fps(),
        }
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    /// Index of the frame this timestamp stamps at `rate`, if it is one.
    pub fn frame_index(&self, rate: FrameRate) -> Option<u64> {
        if self.timescale != rate.fps() {
            return None;
        }
        u64::try_from(self.value).ok()
    }

    pub fn timescale(&self) -> u32 {
        self.timescale
    }

    pub fn seconds(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    fn cross(&self, other: &Self) -> (i128, i128) {
        (
            self.value as i128 * other.timescale as i128,
            other.value as i128 * self.timescale as i128,
        )
    }
}

impl PartialEq for PresentationTimestamp {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = self.cross(other);
        a == b
    }
}

impl Eq for PresentationTimestamp {}

impl PartialOrd for PresentationTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PresentationTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = self.cross(other);
        a.cmp(&b)
    }
}

impl fmt::Display for PresentationTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.timescale)
    }
}
