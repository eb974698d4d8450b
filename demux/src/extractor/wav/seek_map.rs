use crate::seek::{scale_large_timestamp, SeekMap, SeekPoint, SeekPoints, MICROS_PER_SECOND};

/// Seek map over the fixed-size blocks of a WAV data chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavSeekMap {
    frame_rate_hz: u32,
    block_size: u64,
    frames_per_block: u64,
    first_block_position: u64,
    block_count: u64,
    duration_us: i64,
}

impl WavSeekMap {
    pub fn new(
        frame_rate_hz: u32,
        block_size: u16,
        frames_per_block: u32,
        data_start_position: u64,
        data_end_position: u64,
    ) -> Self {
        let block_size = (block_size as u64).max(1);
        let mut map = Self {
            frame_rate_hz,
            block_size,
            frames_per_block: frames_per_block.max(1) as u64,
            first_block_position: data_start_position,
            block_count: data_end_position.saturating_sub(data_start_position) / block_size,
            duration_us: 0,
        };
        map.duration_us = map.block_index_to_time_us(map.block_count);
        map
    }

    fn block_index_to_time_us(&self, block_index: u64) -> i64 {
        scale_large_timestamp(
            (block_index * self.frames_per_block) as i64,
            MICROS_PER_SECOND,
            self.frame_rate_hz as i64,
        )
    }

    fn block_point(&self, block_index: u64) -> SeekPoint {
        SeekPoint::new(
            self.block_index_to_time_us(block_index),
            self.first_block_position + block_index * self.block_size,
        )
    }
}

impl SeekMap for WavSeekMap {
    fn is_seekable(&self) -> bool {
        true
    }

    fn duration_us(&self) -> Option<i64> {
        Some(self.duration_us)
    }

    fn seek_points(&self, time_us: i64) -> SeekPoints {
        if self.block_count == 0 {
            return SeekPoints::single(SeekPoint::new(0, self.first_block_position));
        }

        let block_index = time_us.max(0) as i128 * self.frame_rate_hz as i128
            / (MICROS_PER_SECOND as i128 * self.frames_per_block as i128);
        let block_index = block_index.clamp(0, self.block_count as i128 - 1) as u64;

        let point = self.block_point(block_index);
        if point.time_us >= time_us || block_index == self.block_count - 1 {
            return SeekPoints::single(point);
        }
        SeekPoints::pair(point, self.block_point(block_index + 1))
    }
}
