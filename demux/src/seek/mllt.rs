use super::{SeekMap, SeekPoint, SeekPoints, Seeker};
use crate::extractor::mp3::id3::MlltFrame;

/// Seeker built from an ID3 MPEG location lookup table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MlltSeeker {
    positions: Vec<u64>,
    times_us: Vec<i64>,
    duration_us: i64,
}

impl MlltSeeker {
    /// Builds the seeker from `frame`, with the first reference at
    /// `first_frame_position`.
    pub fn new(first_frame_position: u64, frame: &MlltFrame) -> Self {
        let count = frame.bytes_deviations.len();
        let mut positions = Vec::with_capacity(count + 1);
        let mut times_us = Vec::with_capacity(count + 1);

        let mut position = first_frame_position;
        let mut time_ms = 0i64;
        positions.push(position);
        times_us.push(0);
        for (bytes_deviation, ms_deviation) in frame
            .bytes_deviations
            .iter()
            .zip(frame.milliseconds_deviations.iter())
        {
            position += (frame.bytes_between_reference + bytes_deviation) as u64;
            time_ms += (frame.milliseconds_between_reference + ms_deviation) as i64;
            positions.push(position);
            times_us.push(time_ms * 1_000);
        }

        let duration_us = times_us.last().copied().unwrap_or(0);
        Self {
            positions,
            times_us,
            duration_us,
        }
    }

    /// Interpolates linearly between the two references around `x`.
    fn linear_interpolate<X, Y>(x: X, xs: &[X], ys: &[Y]) -> (X, Y)
    where
        X: Copy + PartialOrd + Into<i128>,
        Y: Copy + Into<i128> + TryFrom<i128>,
    {
        let i = xs.partition_point(|&v| v <= x).saturating_sub(1);
        let (x0, y0) = (xs[i], ys[i]);
        if i + 1 == xs.len() {
            return (x0, y0);
        }

        let (x1, y1) = (xs[i + 1].into(), ys[i + 1].into());
        let (x0i, y0i) = (x0.into(), y0.into());
        let y = if x1 == x0i {
            y0i
        } else {
            y0i + (x.into() - x0i) * (y1 - y0i) / (x1 - x0i)
        };
        (x, Y::try_from(y).unwrap_or(y0))
    }
}

impl SeekMap for MlltSeeker {
    fn is_seekable(&self) -> bool {
        true
    }

    fn duration_us(&self) -> Option<i64> {
        Some(self.duration_us)
    }

    fn seek_points(&self, time_us: i64) -> SeekPoints {
        let time_us = time_us.clamp(0, self.duration_us);
        let (time_us, position) = Self::linear_interpolate(time_us, &self.times_us, &self.positions);
        SeekPoints::single(SeekPoint::new(time_us, position))
    }
}

impl Seeker for MlltSeeker {
    fn time_us(&self, position: u64) -> i64 {
        Self::linear_interpolate(position, &self.positions, &self.times_us).1
    }

    fn data_end_position(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seek::tests::assert_monotonic;

    fn frame() -> MlltFrame {
        MlltFrame {
            bytes_between_reference: 1_000,
            milliseconds_between_reference: 500,
            bytes_deviations: vec![0, 100, 0],
            milliseconds_deviations: vec![0, 50, 0],
        }
    }

    #[test]
    fn references_accumulate_deviations() {
        let seeker = MlltSeeker::new(200, &frame());
        assert_eq!(seeker.positions, [200, 1_200, 2_300, 3_300]);
        assert_eq!(seeker.times_us, [0, 500_000, 1_050_000, 1_550_000]);
        assert_eq!(seeker.duration_us(), Some(1_550_000));
    }

    #[test]
    fn interpolates_between_references() {
        let seeker = MlltSeeker::new(200, &frame());
        let point = seeker.seek_points(250_000).first;
        assert_eq!(point, SeekPoint::new(250_000, 700));
        assert_eq!(seeker.time_us(700), 250_000);

        for time_us in [0, 500_000, 775_000, 1_550_000] {
            let position = seeker.seek_points(time_us).first.position;
            assert_eq!(seeker.time_us(position), time_us);
        }

        assert_eq!(seeker.seek_points(9_000_000).first.position, 3_300);
        assert_monotonic(&seeker, (0..40).map(|i| i * 50_000));
    }
}
