use std::sync::Arc;

use anyhow::{bail, Result};

use super::page::{OggPageHeader, MAX_PAGE_SIZE};
use crate::input::ExtractorInput;
use crate::seek::{SeekMap, SeekPoint, SeekPoints, Unseekable};
use crate::utils::errors::OggError;

/// Seek targets within this many granules before a page are close enough
/// to finish bisecting and skip forward page by page.
const MATCH_RANGE: i64 = 72_000;
const MATCH_BYTE_RANGE: u64 = 100_000;
const DEFAULT_OFFSET: u64 = 30_000;

pub(super) fn granule_to_time_us(granule: i64, sample_rate: u32) -> i64 {
    if sample_rate == 0 {
        return 0;
    }
    (granule as i128 * 1_000_000 / sample_rate as i128) as i64
}

pub(super) fn time_us_to_granule(time_us: i64, sample_rate: u32) -> i64 {
    (sample_rate as i128 * time_us as i128 / 1_000_000) as i64
}

/// Outcome of one step of an [`OggSeeker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SeekerStep {
    /// Nothing to do; read the next packet.
    Idle,
    /// Continue reading at the given position.
    Seek(u64),
    /// The seek ended at a page whose preceding granule is given.
    SeekEnded(i64),
}

#[derive(Debug)]
pub(super) enum OggSeeker {
    Unseekable,
    Default(DefaultOggSeeker),
}

impl OggSeeker {
    pub(super) fn read(&mut self, input: &mut dyn ExtractorInput) -> Result<SeekerStep> {
        match self {
            OggSeeker::Unseekable => Ok(SeekerStep::Idle),
            OggSeeker::Default(seeker) => seeker.read(input),
        }
    }

    pub(super) fn start_seek(&mut self, target_granule: i64) {
        if let OggSeeker::Default(seeker) = self {
            seeker.start_seek(target_granule);
        }
    }

    pub(super) fn create_seek_map(&self, sample_rate: u32) -> Arc<dyn SeekMap> {
        match self {
            OggSeeker::Default(seeker) if seeker.total_granules > 0 => Arc::new(OggSeekMap {
                payload_start_position: seeker.payload_start_position,
                payload_end_position: seeker.payload_end_position,
                total_granules: seeker.total_granules,
                sample_rate,
            }),
            _ => Arc::new(Unseekable::new(None)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    SeekToEnd,
    ReadLastPage,
    Seek,
    Skip,
}

/// Finds the stream duration from the last page, and seeks by bisecting
/// over page granule positions.
#[derive(Debug)]
pub(super) struct DefaultOggSeeker {
    page_header: OggPageHeader,
    payload_start_position: u64,
    payload_end_position: u64,

    state: State,
    total_granules: i64,
    position_before_seek_to_end: u64,
    target_granule: i64,

    start: u64,
    end: u64,
    start_granule: i64,
    end_granule: i64,
}

impl DefaultOggSeeker {
    pub(super) fn new(
        payload_start_position: u64,
        payload_end_position: u64,
        first_payload_page_size: usize,
        first_payload_page_granule_position: i64,
        first_payload_page_is_last_page: bool,
    ) -> Self {
        let single_page =
            first_payload_page_size as u64 == payload_end_position.saturating_sub(payload_start_position);
        let (state, total_granules) = if single_page || first_payload_page_is_last_page {
            (State::Idle, first_payload_page_granule_position)
        } else {
            (State::SeekToEnd, 0)
        };

        Self {
            page_header: OggPageHeader::default(),
            payload_start_position,
            payload_end_position,
            state,
            total_granules,
            position_before_seek_to_end: 0,
            target_granule: 0,
            start: 0,
            end: 0,
            start_granule: 0,
            end_granule: 0,
        }
    }

    pub(super) fn total_granules(&self) -> i64 {
        self.total_granules
    }

    fn read(&mut self, input: &mut dyn ExtractorInput) -> Result<SeekerStep> {
        match self.state {
            State::Idle => Ok(SeekerStep::Idle),
            State::SeekToEnd => {
                self.position_before_seek_to_end = input.position();
                self.state = State::ReadLastPage;
                let last_page_search_position =
                    self.payload_end_position.saturating_sub(MAX_PAGE_SIZE as u64);
                if last_page_search_position > self.position_before_seek_to_end {
                    return Ok(SeekerStep::Seek(last_page_search_position));
                }
                self.read_last_page(input)
            }
            State::ReadLastPage => self.read_last_page(input),
            State::Seek => {
                if let Some(position) = self.next_seek_position(input)? {
                    return Ok(SeekerStep::Seek(position));
                }
                self.state = State::Skip;
                self.skip(input)
            }
            State::Skip => self.skip(input),
        }
    }

    fn read_last_page(&mut self, input: &mut dyn ExtractorInput) -> Result<SeekerStep> {
        self.total_granules = self.read_granule_of_last_page(input)?;
        log::debug!("Ogg stream holds {} granules", self.total_granules);
        self.state = State::Idle;
        Ok(SeekerStep::Seek(self.position_before_seek_to_end))
    }

    fn skip(&mut self, input: &mut dyn ExtractorInput) -> Result<SeekerStep> {
        self.skip_to_page_of_target_granule(input)?;
        self.state = State::Idle;
        Ok(SeekerStep::SeekEnded(self.start_granule))
    }

    fn start_seek(&mut self, target_granule: i64) {
        self.target_granule = target_granule.clamp(0, (self.total_granules - 1).max(0));
        self.state = State::Seek;
        self.start = self.payload_start_position;
        self.end = self.payload_end_position;
        self.start_granule = 0;
        self.end_granule = self.total_granules;
    }

    /// Next bisection position, or `None` when the current page is close
    /// enough to the target.
    fn next_seek_position(&mut self, input: &mut dyn ExtractorInput) -> Result<Option<u64>> {
        if self.start == self.end {
            return Ok(None);
        }

        let current_position = input.position();
        if !self.page_header.skip_to_next_page(input, Some(self.end))? {
            if self.start == current_position {
                bail!(OggError::NoPageFound);
            }
            return Ok(Some(self.start));
        }

        self.page_header.populate(input, false)?;
        input.reset_peek_position();

        let granule_distance = self.target_granule - self.page_header.granule_position;
        let page_size = self.page_header.page_size() as u64;
        if (0..MATCH_RANGE).contains(&granule_distance) {
            return Ok(None);
        }

        if granule_distance < 0 {
            self.end = current_position;
            self.end_granule = self.page_header.granule_position;
        } else {
            self.start = input.position() + page_size;
            self.start_granule = self.page_header.granule_position;
        }

        if self.end.saturating_sub(self.start) < MATCH_BYTE_RANGE {
            self.end = self.start;
            return Ok(Some(self.start));
        }

        let offset = page_size as i128 * if granule_distance <= 0 { 2 } else { 1 };
        let granule_span = (self.end_granule - self.start_granule).max(1) as i128;
        let next_position = input.position() as i128 - offset
            + granule_distance as i128 * (self.end - self.start) as i128 / granule_span;
        Ok(Some(next_position.clamp(self.start as i128, self.end as i128 - 1) as u64))
    }

    fn skip_to_page_of_target_granule(&mut self, input: &mut dyn ExtractorInput) -> Result<()> {
        loop {
            if !self.page_header.skip_to_next_page(input, None)? {
                bail!(OggError::NoPageFound);
            }
            self.page_header.populate(input, false)?;
            if self.page_header.granule_position > self.target_granule {
                break;
            }
            input.reset_peek_position();
            input.skip_fully(self.page_header.page_size(), false)?;
            self.start = input.position();
            self.start_granule = self.page_header.granule_position;
        }
        input.reset_peek_position();
        Ok(())
    }

    fn read_granule_of_last_page(&mut self, input: &mut dyn ExtractorInput) -> Result<i64> {
        self.page_header.reset();
        if !self.page_header.skip_to_next_page(input, None)? {
            bail!(OggError::NoPageFound);
        }
        self.page_header.populate(input, false)?;
        input.reset_peek_position();
        input.skip_fully(self.page_header.page_size(), false)?;

        let mut granule_position = self.page_header.granule_position;
        while !self.page_header.is_last_page()
            && self.page_header.skip_to_next_page(input, None)?
            && input.position() < self.payload_end_position
            && self.page_header.populate(input, true)?
        {
            input.reset_peek_position();
            if !input.skip_fully(self.page_header.page_size(), true)? {
                break;
            }
            granule_position = self.page_header.granule_position;
        }
        Ok(granule_position)
    }
}

/// Estimates positions by assuming a constant bitrate over granules.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OggSeekMap {
    payload_start_position: u64,
    payload_end_position: u64,
    total_granules: i64,
    sample_rate: u32,
}

impl SeekMap for OggSeekMap {
    fn is_seekable(&self) -> bool {
        true
    }

    fn duration_us(&self) -> Option<i64> {
        Some(granule_to_time_us(self.total_granules, self.sample_rate))
    }

    fn seek_points(&self, time_us: i64) -> SeekPoints {
        let target_granule = time_us_to_granule(time_us, self.sample_rate) as i128;
        let span = (self.payload_end_position - self.payload_start_position) as i128;
        let estimated = self.payload_start_position as i128
            + target_granule * span / self.total_granules as i128
            - DEFAULT_OFFSET as i128;
        let position = estimated.clamp(
            self.payload_start_position as i128,
            self.payload_end_position as i128 - 1,
        ) as u64;
        SeekPoints::single(SeekPoint::new(time_us, position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seek::tests::assert_monotonic;

    #[test]
    fn seek_map_estimates_by_granule() {
        let map = OggSeekMap {
            payload_start_position: 1_000,
            payload_end_position: 1_001_000,
            total_granules: 480_000,
            sample_rate: 48_000,
        };
        assert_eq!(map.duration_us(), Some(10_000_000));
        assert_eq!(map.seek_points(0).first.position, 1_000);
        assert_eq!(map.seek_points(5_000_000).first.position, 471_000);
        assert_eq!(map.seek_points(60_000_000).first.position, 1_000_999);
        assert_monotonic(&map, (0..20).map(|i| i * 600_000));
    }

    #[test]
    fn single_page_stream_knows_its_length() {
        let seeker = DefaultOggSeeker::new(100, 600, 500, 9_600, false);
        assert_eq!(seeker.total_granules(), 9_600);
        assert_eq!(seeker.state, State::Idle);

        let seeker = DefaultOggSeeker::new(100, 900_000, 500, 9_600, false);
        assert_eq!(seeker.state, State::SeekToEnd);
    }

    #[test]
    fn granule_conversions() {
        assert_eq!(granule_to_time_us(48_000, 48_000), 1_000_000);
        assert_eq!(time_us_to_granule(1_500_000, 44_100), 66_150);
        assert_eq!(granule_to_time_us(5, 0), 0);
    }
}
