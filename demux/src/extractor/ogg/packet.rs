use anyhow::Result;
use log::Level;

use super::page::{OggPageHeader, MAX_PAGE_PAYLOAD, PAGE_TYPE_CONTINUATION};
use crate::input::ExtractorInput;
use crate::log_or_err;
use crate::utils::errors::OggError;

/// Reassembles Ogg packets that may span several pages.
#[derive(Debug)]
pub struct OggPacket {
    page_header: OggPageHeader,
    payload: Vec<u8>,
    current_segment_index: Option<usize>,
    segment_count: usize,
    populated: bool,
    pub(super) fail_level: Level,
}

impl Default for OggPacket {
    fn default() -> Self {
        Self {
            page_header: OggPageHeader::default(),
            payload: Vec::with_capacity(MAX_PAGE_PAYLOAD),
            current_segment_index: None,
            segment_count: 0,
            populated: false,
            fail_level: Level::Error,
        }
    }
}

impl OggPacket {
    pub fn reset(&mut self) {
        self.page_header.reset();
        self.payload.clear();
        self.current_segment_index = None;
        self.populated = false;
    }

    /// Reads the next complete packet. Returns `false` at end of input.
    pub fn populate(&mut self, input: &mut dyn ExtractorInput) -> Result<bool> {
        if self.populated {
            self.populated = false;
            self.payload.clear();
        }

        while !self.populated {
            let segment_index = match self.current_segment_index {
                Some(index) => index,
                None => {
                    if !self.page_header.skip_to_next_page(input, None)?
                        || !self.page_header.populate(input, true)?
                    {
                        return Ok(false);
                    }
                    self.verify_checksum(input)?;

                    let mut segment_index = 0;
                    let mut bytes_to_skip = self.page_header.header_size;
                    // A continued packet whose start was not seen is dropped.
                    if self.page_header.page_type & PAGE_TYPE_CONTINUATION != 0
                        && self.payload.is_empty()
                    {
                        bytes_to_skip += self.calculate_packet_size(segment_index);
                        segment_index += self.segment_count;
                    }
                    input.skip_fully(bytes_to_skip, false)?;
                    segment_index
                }
            };

            let size = self.calculate_packet_size(segment_index);
            let next_segment_index = segment_index + self.segment_count;
            if size > 0 {
                let start = self.payload.len();
                self.payload.resize(start + size, 0);
                input.read_fully(&mut self.payload[start..], false)?;
                self.populated = self.page_header.laces[next_segment_index - 1] != 255;
            }

            self.current_segment_index = (next_segment_index != self.page_header.page_segment_count)
                .then_some(next_segment_index);
        }
        Ok(true)
    }

    pub fn page_header(&self) -> &OggPageHeader {
        &self.page_header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Vec<u8> {
        &mut self.payload
    }

    /// Releases memory held for oversized header packets.
    pub fn trim_payload(&mut self) {
        self.payload.shrink_to(MAX_PAGE_PAYLOAD);
    }

    fn calculate_packet_size(&mut self, start_segment_index: usize) -> usize {
        self.segment_count = 0;
        let mut size = 0;
        while start_segment_index + self.segment_count < self.page_header.page_segment_count {
            let segment_length = self.page_header.laces[start_segment_index + self.segment_count];
            self.segment_count += 1;
            size += segment_length as usize;
            if segment_length != 255 {
                break;
            }
        }
        size
    }

    fn verify_checksum(&mut self, input: &mut dyn ExtractorInput) -> Result<()> {
        let Some(calculated) = self.page_header.calculate_checksum(input)? else {
            return Ok(());
        };

        if calculated != self.page_header.page_checksum {
            log_or_err!(
                self,
                Level::Warn,
                OggError::ChecksumMismatch {
                    sequence: self.page_header.page_sequence_number,
                    stored: self.page_header.page_checksum,
                    calculated,
                }
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ogg::page::tests::{page, page_with_packets};
    use crate::input::tests::{input_for, ChunkedReader};
    use crate::input::StreamInput;

    #[test]
    fn packet_spanning_two_pages() -> Result<()> {
        let first: Vec<u8> = (0..255).map(|i| i as u8).collect();
        let second = [0xA0, 0xA1, 0xA2];

        let mut data = page(0, -1, 0, &[255], &first);
        data.extend_from_slice(&page(PAGE_TYPE_CONTINUATION, 258, 1, &[3], &second));

        let mut packet = OggPacket::default();
        let mut input = StreamInput::new(ChunkedReader::new(data, 7), 0, None);
        assert!(packet.populate(&mut input)?);

        let mut expected = first.clone();
        expected.extend_from_slice(&second);
        assert_eq!(packet.payload(), &expected[..]);
        assert_eq!(packet.page_header().granule_position, 258);

        assert!(!packet.populate(&mut input)?);
        Ok(())
    }

    #[test]
    fn several_packets_per_page() -> Result<()> {
        let data = page_with_packets(0, 10, 0, &[&[1, 2], &[3], &[4, 5, 6]]);
        let mut input = input_for(&data);
        let mut packet = OggPacket::default();

        let mut packets = Vec::new();
        while packet.populate(&mut input)? {
            packets.push(packet.payload().to_vec());
        }
        assert_eq!(packets, vec![vec![1, 2], vec![3], vec![4, 5, 6]]);
        Ok(())
    }

    #[test]
    fn orphaned_continuation_is_dropped() -> Result<()> {
        let mut data = page(PAGE_TYPE_CONTINUATION, 0, 3, &[2, 1], &[9, 9, 7]);
        data.extend_from_slice(&page_with_packets(0, 0, 4, &[&[8]]));
        let mut input = input_for(&data);
        let mut packet = OggPacket::default();

        assert!(packet.populate(&mut input)?);
        assert_eq!(packet.payload(), &[7]);
        assert!(packet.populate(&mut input)?);
        assert_eq!(packet.payload(), &[8]);
        Ok(())
    }

    #[test]
    fn checksum_mismatch_follows_fail_level() -> Result<()> {
        let mut data = page_with_packets(0, 0, 5, &[&[1, 2, 3]]);
        let last = data.len() - 1;
        data[last] ^= 0xFF;

        let mut packet = OggPacket::default();
        assert!(packet.populate(&mut input_for(&data))?);

        let mut strict = OggPacket {
            fail_level: Level::Warn,
            ..Default::default()
        };
        let err = strict.populate(&mut input_for(&data)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OggError>(),
            Some(OggError::ChecksumMismatch { sequence: 5, .. })
        ));
        Ok(())
    }
}
