//! Seek maps: from a playback time to a byte position to resume reading at.
//!
//! Every map returns either one point or a `(lower, upper)` pair around the
//! requested time, with positions that never decrease as time increases.

use std::fmt::Debug;

pub mod chunk;
pub mod constant_bitrate;
pub mod index;
pub mod mllt;

pub use chunk::ChunkIndex;
pub use constant_bitrate::{ConstantBitrateSeekMap, ConstantBitrateSeeker};
pub use index::IndexSeeker;
pub use mllt::MlltSeeker;

pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// A `(time, position)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeekPoint {
    pub time_us: i64,
    pub position: u64,
}

impl SeekPoint {
    pub const START: SeekPoint = SeekPoint {
        time_us: 0,
        position: 0,
    };

    pub const fn new(time_us: i64, position: u64) -> Self {
        Self { time_us, position }
    }
}

/// One or two points bracketing a requested time, lower point first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekPoints {
    pub first: SeekPoint,
    pub second: Option<SeekPoint>,
}

impl SeekPoints {
    pub const fn single(point: SeekPoint) -> Self {
        Self {
            first: point,
            second: None,
        }
    }

    pub fn pair(first: SeekPoint, second: SeekPoint) -> Self {
        Self {
            first,
            second: (first != second).then_some(second),
        }
    }
}

pub trait SeekMap: Debug + Send + Sync {
    fn is_seekable(&self) -> bool;

    /// Duration of the stream, if known.
    fn duration_us(&self) -> Option<i64>;

    fn seek_points(&self, time_us: i64) -> SeekPoints;
}

/// Seek map of MP3 streams, which can also map a position back to a time.
pub trait Seeker: SeekMap {
    /// Time of the sample at byte `position`.
    fn time_us(&self, position: u64) -> i64;

    /// Position just after the last frame of audio data, if known.
    fn data_end_position(&self) -> Option<u64>;
}

/// Maps every time to the start of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unseekable {
    duration_us: Option<i64>,
    start_position: u64,
}

impl Unseekable {
    pub const fn new(duration_us: Option<i64>) -> Self {
        Self::with_start_position(duration_us, 0)
    }

    pub const fn with_start_position(duration_us: Option<i64>, start_position: u64) -> Self {
        Self {
            duration_us,
            start_position,
        }
    }
}

impl SeekMap for Unseekable {
    fn is_seekable(&self) -> bool {
        false
    }

    fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }

    fn seek_points(&self, _time_us: i64) -> SeekPoints {
        SeekPoints::single(SeekPoint::new(0, self.start_position))
    }
}

impl Seeker for Unseekable {
    fn time_us(&self, _position: u64) -> i64 {
        0
    }

    fn data_end_position(&self) -> Option<u64> {
        None
    }
}

/// Index of the last element `<= value`, clamped to 0 when every element is
/// larger. `values` must be sorted and non-empty.
pub(crate) fn floor_index<T: PartialOrd + Copy>(values: &[T], value: T) -> usize {
    values.partition_point(|&v| v <= value).saturating_sub(1)
}

/// Index of the last element `<= value`, or `None` when every element is larger.
pub(crate) fn floor_index_unclamped<T: PartialOrd + Copy>(values: &[T], value: T) -> Option<usize> {
    values.partition_point(|&v| v <= value).checked_sub(1)
}

/// Computes `timestamp * multiplier / divisor` without intermediate overflow.
pub fn scale_large_timestamp(timestamp: i64, multiplier: i64, divisor: i64) -> i64 {
    if divisor == 0 {
        return 0;
    }
    (timestamp as i128 * multiplier as i128 / divisor as i128) as i64
}
