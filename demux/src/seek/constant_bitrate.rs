use super::{SeekMap, SeekPoint, SeekPoints, Seeker, MICROS_PER_SECOND};

const BITS_PER_BYTE: i64 = 8;

/// Linear time/position mapping for streams with a fixed bitrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantBitrateSeekMap {
    input_length: Option<u64>,
    first_frame_position: u64,
    frame_size: u64,
    bitrate: u32,
    data_size: Option<u64>,
    duration_us: Option<i64>,
}

impl ConstantBitrateSeekMap {
    /// `frame_size` of `None` lets seeks land on any byte.
    pub fn new(
        input_length: Option<u64>,
        first_frame_position: u64,
        bitrate: u32,
        frame_size: Option<usize>,
    ) -> Self {
        let frame_size = frame_size.filter(|&size| size > 0).unwrap_or(1) as u64;
        let data_size = input_length.map(|length| length.saturating_sub(first_frame_position));

        let mut map = Self {
            input_length,
            first_frame_position,
            frame_size,
            bitrate,
            data_size,
            duration_us: None,
        };
        map.duration_us = input_length.map(|length| map.time_us_at_position(length));
        map
    }

    /// Time of the byte at `position`, measured from the first frame.
    pub fn time_us_at_position(&self, position: u64) -> i64 {
        if self.bitrate == 0 {
            return 0;
        }

        let bytes = position.saturating_sub(self.first_frame_position) as i128;
        (bytes * BITS_PER_BYTE as i128 * MICROS_PER_SECOND as i128 / self.bitrate as i128) as i64
    }

    fn frame_position_for_time(&self, time_us: i64, data_size: u64) -> u64 {
        let offset = time_us as i128 * self.bitrate as i128
            / (MICROS_PER_SECOND as i128 * BITS_PER_BYTE as i128);
        let frame_size = self.frame_size as i128;
        let offset = offset / frame_size * frame_size;

        let max_offset = (data_size as i128 - frame_size).max(0);
        self.first_frame_position + offset.clamp(0, max_offset) as u64
    }
}

impl SeekMap for ConstantBitrateSeekMap {
    fn is_seekable(&self) -> bool {
        self.data_size.is_some()
    }

    fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }

    fn seek_points(&self, time_us: i64) -> SeekPoints {
        let (Some(data_size), Some(input_length)) = (self.data_size, self.input_length) else {
            return SeekPoints::single(SeekPoint::new(0, self.first_frame_position));
        };

        let position = self.frame_position_for_time(time_us, data_size);
        let seek_time_us = self.time_us_at_position(position);
        let point = SeekPoint::new(seek_time_us, position);

        if seek_time_us >= time_us || position + self.frame_size >= input_length {
            return SeekPoints::single(point);
        }

        let next_position = position + self.frame_size;
        let next_time_us = self.time_us_at_position(next_position);
        SeekPoints::pair(point, SeekPoint::new(next_time_us, next_position))
    }
}

/// MP3 seeker for streams without seeking metadata, assuming every frame
/// matches the first one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantBitrateSeeker {
    map: ConstantBitrateSeekMap,
}

impl ConstantBitrateSeeker {
    pub fn new(
        input_length: Option<u64>,
        first_frame_position: u64,
        bitrate: u32,
        frame_size: usize,
    ) -> Self {
        Self {
            map: ConstantBitrateSeekMap::new(
                input_length,
                first_frame_position,
                bitrate,
                Some(frame_size),
            ),
        }
    }
}

impl SeekMap for ConstantBitrateSeeker {
    fn is_seekable(&self) -> bool {
        self.map.is_seekable()
    }

    fn duration_us(&self) -> Option<i64> {
        self.map.duration_us()
    }

    fn seek_points(&self, time_us: i64) -> SeekPoints {
        self.map.seek_points(time_us)
    }
}

impl Seeker for ConstantBitrateSeeker {
    fn time_us(&self, position: u64) -> i64 {
        self.map.time_us_at_position(position)
    }

    fn data_end_position(&self) -> Option<u64> {
        None
    }
}
