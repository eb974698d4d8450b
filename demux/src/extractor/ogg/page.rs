use anyhow::{bail, Result};

use crate::input::{peek_fully_quietly, ExtractorInput};
use crate::utils::crc::OGG_PAGE_CRC;
use crate::utils::errors::OggError;

pub const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
pub const EMPTY_PAGE_HEADER_SIZE: usize = 27;
pub const MAX_SEGMENT_COUNT: usize = 255;
pub const MAX_PAGE_PAYLOAD: usize = 255 * 255;
pub const MAX_PAGE_SIZE: usize = EMPTY_PAGE_HEADER_SIZE + MAX_SEGMENT_COUNT + MAX_PAGE_PAYLOAD;

const CHECKSUM_OFFSET: usize = 22;

pub const PAGE_TYPE_CONTINUATION: u8 = 0x01;
pub const PAGE_TYPE_BOS: u8 = 0x02;
pub const PAGE_TYPE_EOS: u8 = 0x04;

/// Header of an Ogg page, populated by peeking.
#[derive(Debug, Clone)]
pub struct OggPageHeader {
    pub revision: u8,
    pub page_type: u8,
    pub granule_position: i64,
    pub stream_serial_number: u32,
    pub page_sequence_number: u32,
    pub page_checksum: u32,
    pub page_segment_count: usize,
    pub header_size: usize,
    pub body_size: usize,
    pub laces: [u8; MAX_SEGMENT_COUNT],
}

impl Default for OggPageHeader {
    fn default() -> Self {
        Self {
            revision: 0,
            page_type: 0,
            granule_position: 0,
            stream_serial_number: 0,
            page_sequence_number: 0,
            page_checksum: 0,
            page_segment_count: 0,
            header_size: 0,
            body_size: 0,
            laces: [0; MAX_SEGMENT_COUNT],
        }
    }
}

impl OggPageHeader {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn page_size(&self) -> usize {
        self.header_size + self.body_size
    }

    pub fn is_last_page(&self) -> bool {
        self.page_type & PAGE_TYPE_EOS != 0
    }

    /// Advances the input to the next capture pattern without consuming it,
    /// stopping at `limit` when given. The peek position must equal the read
    /// position.
    pub fn skip_to_next_page(
        &mut self,
        input: &mut dyn ExtractorInput,
        limit: Option<u64>,
    ) -> Result<bool> {
        let within = |input: &dyn ExtractorInput, extra: u64| {
            limit.is_none_or(|limit| input.position() + extra < limit)
        };

        let mut scratch = [0u8; 4];
        while within(&*input, CAPTURE_PATTERN.len() as u64)
            && peek_fully_quietly(input, &mut scratch, true)?
        {
            input.reset_peek_position();
            if &scratch == CAPTURE_PATTERN {
                return Ok(true);
            }
            input.skip_fully(1, false)?;
        }

        input.reset_peek_position();
        while within(&*input, 0) && input.skip(1)? > 0 {}
        Ok(false)
    }

    /// Peeks a page header at the current peek position. With `quiet`, an
    /// invalid or truncated header yields `Ok(false)` instead of an error.
    pub fn populate(&mut self, input: &mut dyn ExtractorInput, quiet: bool) -> Result<bool> {
        self.reset();

        let mut header = [0u8; EMPTY_PAGE_HEADER_SIZE];
        let peeked = if quiet {
            peek_fully_quietly(input, &mut header, true)?
        } else {
            input.peek_fully(&mut header, true)?
        };
        if !peeked || &header[..4] != CAPTURE_PATTERN {
            if quiet {
                return Ok(false);
            }
            bail!(OggError::NoPageFound);
        }

        self.revision = header[4];
        if self.revision != 0 {
            if quiet {
                return Ok(false);
            }
            bail!(OggError::UnsupportedRevision(self.revision));
        }

        let le_u32 = |at: usize| u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]]);
        self.page_type = header[5];
        self.granule_position = i64::from_le_bytes([
            header[6], header[7], header[8], header[9], header[10], header[11], header[12], header[13],
        ]);
        self.stream_serial_number = le_u32(14);
        self.page_sequence_number = le_u32(18);
        self.page_checksum = le_u32(CHECKSUM_OFFSET);
        self.page_segment_count = header[26] as usize;
        self.header_size = EMPTY_PAGE_HEADER_SIZE + self.page_segment_count;

        let laces = &mut self.laces[..self.page_segment_count];
        let peeked = if quiet {
            peek_fully_quietly(input, laces, true)?
        } else {
            input.peek_fully(laces, false)?
        };
        if !peeked {
            return Ok(false);
        }
        self.body_size = laces.iter().map(|&lace| lace as usize).sum();
        Ok(true)
    }

    /// Checksum of the whole page at the current read position, or `None` if
    /// the page is truncated. Leaves the peek position reset.
    pub fn calculate_checksum(&self, input: &mut dyn ExtractorInput) -> Result<Option<u32>> {
        input.reset_peek_position();
        let mut page = vec![0u8; self.page_size()];
        let peeked = peek_fully_quietly(input, &mut page, true)?;
        input.reset_peek_position();
        if !peeked {
            return Ok(None);
        }

        page[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].fill(0);
        Ok(Some(OGG_PAGE_CRC.checksum(&page)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::input::tests::input_for;

    /// Builds a page carrying `segments` with the given lacing values, and a
    /// valid checksum.
    pub(crate) fn page(page_type: u8, granule: i64, sequence: u32, laces: &[u8], body: &[u8]) -> Vec<u8> {
        let mut data = CAPTURE_PATTERN.to_vec();
        data.push(0);
        data.push(page_type);
        data.extend_from_slice(&granule.to_le_bytes());
        data.extend_from_slice(&0x1234u32.to_le_bytes());
        data.extend_from_slice(&sequence.to_le_bytes());
        data.extend_from_slice(&[0; 4]);
        data.push(laces.len() as u8);
        data.extend_from_slice(laces);
        data.extend_from_slice(body);

        let checksum = OGG_PAGE_CRC.checksum(&data);
        data[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
        data
    }

    /// A page holding one packet per entry of `packets`.
    pub(crate) fn page_with_packets(page_type: u8, granule: i64, sequence: u32, packets: &[&[u8]]) -> Vec<u8> {
        let mut laces = Vec::new();
        let mut body = Vec::new();
        for packet in packets {
            let mut len = packet.len();
            while len >= 255 {
                laces.push(255);
                len -= 255;
            }
            laces.push(len as u8);
            body.extend_from_slice(packet);
        }
        page(page_type, granule, sequence, &laces, &body)
    }

    #[test]
    fn header_fields() -> Result<()> {
        let data = page(PAGE_TYPE_BOS, 0x0102, 7, &[3, 2], &[1, 2, 3, 4, 5]);
        let mut input = input_for(&data);
        let mut header = OggPageHeader::default();
        assert!(header.populate(&mut input, false)?);

        assert_eq!(header.page_type, PAGE_TYPE_BOS);
        assert_eq!(header.granule_position, 0x0102);
        assert_eq!(header.stream_serial_number, 0x1234);
        assert_eq!(header.page_sequence_number, 7);
        assert_eq!(header.header_size, 29);
        assert_eq!(header.body_size, 5);
        assert_eq!(header.calculate_checksum(&mut input)?, Some(header.page_checksum));
        assert_eq!(input.position(), 0);
        Ok(())
    }

    #[test]
    fn skips_garbage_before_capture_pattern() -> Result<()> {
        let mut data = vec![0x4F, 0x67, 0x00, 0x4F];
        data.extend_from_slice(&page(0, 0, 0, &[1], &[9]));
        let mut input = input_for(&data);

        let mut header = OggPageHeader::default();
        assert!(header.skip_to_next_page(&mut input, None)?);
        assert_eq!(input.position(), 4);

        let mut input = input_for(&[0x4F, 0x67, 0x67, 0x53, 0x00]);
        assert!(!header.skip_to_next_page(&mut input, Some(2))?);
        assert_eq!(input.position(), 2);
        Ok(())
    }

    #[test]
    fn quiet_populate_rejects_bad_revision() -> Result<()> {
        let mut data = page(0, 0, 0, &[1], &[9]);
        data[4] = 1;
        let mut header = OggPageHeader::default();
        assert!(!header.populate(&mut input_for(&data), true)?);

        let err = header.populate(&mut input_for(&data), false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OggError>(),
            Some(OggError::UnsupportedRevision(1))
        ));
        Ok(())
    }
}
