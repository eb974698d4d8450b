use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use super::{floor_index, SeekMap, SeekPoint, SeekPoints, Seeker};

/// Minimum spacing in time between two recorded points.
pub const MIN_TIME_BETWEEN_POINTS_US: i64 = 100_000;

#[derive(Debug, Default)]
struct PointIndex {
    times_us: Vec<i64>,
    positions: Vec<u64>,
    duration_us: Option<i64>,
}

/// Seeker that learns seek points while the stream is read.
///
/// The extractor keeps one handle and keeps adding points, while clients
/// holding the published map see them as they arrive.
#[derive(Debug)]
pub struct IndexSeeker {
    data_end_position: Option<u64>,
    index: RwLock<PointIndex>,
}

impl IndexSeeker {
    pub fn new(duration_us: Option<i64>, data_start_position: u64, data_end_position: Option<u64>) -> Self {
        Self {
            data_end_position,
            index: RwLock::new(PointIndex {
                times_us: vec![0],
                positions: vec![data_start_position],
                duration_us,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, PointIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a point if it lies at least [`MIN_TIME_BETWEEN_POINTS_US`] past
    /// the last recorded one.
    pub fn maybe_add_seek_point(&self, time_us: i64, position: u64) {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let last_time_us = index.times_us.last().copied().unwrap_or(0);
        let last_position = index.positions.last().copied().unwrap_or(0);
        if time_us - last_time_us < MIN_TIME_BETWEEN_POINTS_US || position < last_position {
            return;
        }
        index.times_us.push(time_us);
        index.positions.push(position);
    }

    /// Whether `time_us` lies within [`MIN_TIME_BETWEEN_POINTS_US`] of the
    /// last recorded point or before it.
    pub fn is_time_us_in_index(&self, time_us: i64) -> bool {
        let index = self.read();
        let last_time_us = index.times_us.last().copied().unwrap_or(0);
        time_us - last_time_us < MIN_TIME_BETWEEN_POINTS_US
    }

    pub fn set_duration_us(&self, duration_us: i64) {
        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .duration_us = Some(duration_us);
    }

    pub fn len(&self) -> usize {
        self.read().times_us.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SeekMap for IndexSeeker {
    fn is_seekable(&self) -> bool {
        true
    }

    fn duration_us(&self) -> Option<i64> {
        self.read().duration_us
    }

    fn seek_points(&self, time_us: i64) -> SeekPoints {
        let index = self.read();
        let i = floor_index(&index.times_us, time_us);
        let point = SeekPoint::new(index.times_us[i], index.positions[i]);

        if point.time_us == time_us || i + 1 == index.times_us.len() {
            return SeekPoints::single(point);
        }

        let next = SeekPoint::new(index.times_us[i + 1], index.positions[i + 1]);
        SeekPoints::pair(point, next)
    }
}

impl Seeker for IndexSeeker {
    fn time_us(&self, position: u64) -> i64 {
        let index = self.read();
        index.times_us[floor_index(&index.positions, position)]
    }

    fn data_end_position(&self) -> Option<u64> {
        self.data_end_position
    }
}
