use super::{floor_index, SeekMap, SeekPoint, SeekPoints};

/// Seek map over a list of independently decodable chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkIndex {
    pub sizes: Vec<u32>,
    pub offsets: Vec<u64>,
    pub durations_us: Vec<i64>,
    pub times_us: Vec<i64>,
    duration_us: i64,
}

impl ChunkIndex {
    /// Column vectors must all have the same, non-zero, length.
    pub fn new(sizes: Vec<u32>, offsets: Vec<u64>, durations_us: Vec<i64>, times_us: Vec<i64>) -> Self {
        let duration_us = match (durations_us.last(), times_us.last()) {
            (Some(duration), Some(time)) => duration + time,
            _ => 0,
        };
        Self {
            sizes,
            offsets,
            durations_us,
            times_us,
            duration_us,
        }
    }

    pub fn len(&self) -> usize {
        self.times_us.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times_us.is_empty()
    }

    /// Index of the chunk containing `time_us`.
    pub fn chunk_index(&self, time_us: i64) -> usize {
        floor_index(&self.times_us, time_us)
    }
}

impl SeekMap for ChunkIndex {
    fn is_seekable(&self) -> bool {
        true
    }

    fn duration_us(&self) -> Option<i64> {
        Some(self.duration_us)
    }

    fn seek_points(&self, time_us: i64) -> SeekPoints {
        if self.is_empty() {
            return SeekPoints::single(SeekPoint::START);
        }

        let i = self.chunk_index(time_us);
        let point = SeekPoint::new(self.times_us[i], self.offsets[i]);
        if point.time_us >= time_us || i + 1 == self.len() {
            return SeekPoints::single(point);
        }

        SeekPoints::pair(point, SeekPoint::new(self.times_us[i + 1], self.offsets[i + 1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seek::tests::assert_monotonic;

    fn index() -> ChunkIndex {
        ChunkIndex::new(
            vec![100, 120, 90],
            vec![13, 400, 900],
            vec![0, 0, 0],
            vec![0, 2_000_000, 4_000_000],
        )
    }

    #[test]
    fn chunk_lookup() {
        let index = index();
        assert_eq!(index.duration_us(), Some(4_000_000));
        assert_eq!(index.chunk_index(1_999_999), 0);
        assert_eq!(index.chunk_index(2_000_000), 1);

        let points = index.seek_points(3_000_000);
        assert_eq!(points.first, SeekPoint::new(2_000_000, 400));
        assert_eq!(points.second, Some(SeekPoint::new(4_000_000, 900)));
        assert_eq!(
            index.seek_points(2_000_000),
            SeekPoints::single(SeekPoint::new(2_000_000, 400))
        );
        assert_eq!(index.seek_points(9_000_000).second, None);
        assert_monotonic(&index, (0..10).map(|i| i * 700_000));
    }
}
