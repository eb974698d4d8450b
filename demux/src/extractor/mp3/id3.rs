//! ID3v2 tags found in front of MPEG audio streams.
//!
//! Only the frames the MP3 extractor acts on are decoded: `MLLT` location
//! tables, `COMM` comments (for gapless playback data) and text frames such
//! as `TLEN`. Other frames are skipped.

use anyhow::{bail, ensure, Result};

use crate::input::{peek_fully_quietly, ExtractorInput};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::Mp3Error;

pub const ID3_HEADER_LENGTH: usize = 10;
pub const ID3_TAG: &[u8; 3] = b"ID3";

const ENCODING_ISO_8859_1: u8 = 0;
const ENCODING_UTF16: u8 = 1;
const ENCODING_UTF16BE: u8 = 2;
const ENCODING_UTF8: u8 = 3;

/// Decides from the major version and the frame id whether a frame is decoded.
pub type FramePredicate = fn(major_version: u8, id: &[u8; 4]) -> bool;

/// The frames needed for seeking and gapless playback.
pub fn required_frames(major_version: u8, id: &[u8; 4]) -> bool {
    let v2 = major_version == 2;
    (id[..3] == *b"COM" && (id[3] == b'M' || v2)) || (id[..3] == *b"MLL" && (id[3] == b'T' || v2))
}

/// MPEG location lookup table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MlltFrame {
    pub bytes_between_reference: u32,
    pub milliseconds_between_reference: u32,
    pub bytes_deviations: Vec<u32>,
    pub milliseconds_deviations: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentFrame {
    pub language: String,
    pub description: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Id3Frame {
    Mllt(MlltFrame),
    Comment(CommentFrame),
    Text { id: String, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Id3Tag {
    pub major_version: u8,
    pub frames: Vec<Id3Frame>,
}

impl Id3Tag {
    pub fn mllt(&self) -> Option<&MlltFrame> {
        self.frames.iter().find_map(|frame| match frame {
            Id3Frame::Mllt(mllt) => Some(mllt),
            _ => None,
        })
    }

    pub fn comments(&self) -> impl Iterator<Item = &CommentFrame> {
        self.frames.iter().filter_map(|frame| match frame {
            Id3Frame::Comment(comment) => Some(comment),
            _ => None,
        })
    }

    pub fn text(&self, frame_id: &str) -> Option<&str> {
        self.frames.iter().find_map(|frame| match frame {
            Id3Frame::Text { id, value } if id == frame_id => Some(value.as_str()),
            _ => None,
        })
    }

    /// Duration declared by a `TLEN` frame.
    pub fn length_us(&self) -> Option<i64> {
        let ms: i64 = self.text("TLEN")?.trim().parse().ok()?;
        (ms > 0).then_some(ms * 1000)
    }
}

/// Peeks every ID3 tag at the start of `input` and decodes the first one.
///
/// Leaves the peek position just after the last tag, so that the caller can
/// skip `input.peek_position()` bytes to reach the audio data.
pub fn peek_id3_data(
    input: &mut dyn ExtractorInput,
    predicate: Option<FramePredicate>,
) -> Result<Option<Id3Tag>> {
    let mut peeked_id3_bytes = 0;
    let mut tag = None;

    loop {
        let mut header = [0u8; ID3_HEADER_LENGTH];
        if !peek_fully_quietly(input, &mut header, true)? || &header[..3] != ID3_TAG {
            break;
        }

        let frames_length = syncsafe(&header[6..10]) as usize;
        let tag_length = ID3_HEADER_LENGTH + frames_length;

        if tag.is_none() {
            let mut data = vec![0u8; tag_length];
            data[..ID3_HEADER_LENGTH].copy_from_slice(&header);
            if !peek_fully_quietly(input, &mut data[ID3_HEADER_LENGTH..], true)? {
                break;
            }
            tag = Some(decode(&data, predicate)?);
        } else if !input.advance_peek_position(frames_length, true)? {
            break;
        }
        peeked_id3_bytes += tag_length;
    }

    input.reset_peek_position();
    input.advance_peek_position(peeked_id3_bytes, false)?;
    Ok(tag.flatten())
}

fn syncsafe(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0, |acc, &b| (acc << 7) | (b & 0x7F) as u32)
}

/// Decodes a whole tag, header included. Returns `None` for versions and
/// layouts that are not supported.
pub fn decode(data: &[u8], predicate: Option<FramePredicate>) -> Result<Option<Id3Tag>> {
    ensure!(
        data.len() >= ID3_HEADER_LENGTH && &data[..3] == ID3_TAG,
        Mp3Error::InvalidId3Frame("header")
    );

    let major_version = data[3];
    let flags = data[5];
    let mut frames_size = syncsafe(&data[6..10]) as usize;
    let mut frames_start = ID3_HEADER_LENGTH;

    match major_version {
        2 => {
            if flags & 0x40 != 0 {
                log::debug!("Skipped ID3v2.2 tag with compression");
                return Ok(None);
            }
        }
        3 => {
            if flags & 0x40 != 0 {
                let Some(size) = data.get(10..14) else {
                    bail!(Mp3Error::InvalidId3Frame("extended header"));
                };
                let extended_header_size = u32::from_be_bytes([size[0], size[1], size[2], size[3]]) as usize;
                frames_start += 4 + extended_header_size;
                frames_size = frames_size.saturating_sub(extended_header_size + 4);
            }
        }
        4 => {
            if flags & 0x40 != 0 {
                let Some(size) = data.get(10..14) else {
                    bail!(Mp3Error::InvalidId3Frame("extended header"));
                };
                let extended_header_size = syncsafe(size) as usize;
                frames_start += extended_header_size;
                frames_size = frames_size.saturating_sub(extended_header_size);
            }
            if flags & 0x10 != 0 {
                frames_size = frames_size.saturating_sub(ID3_HEADER_LENGTH);
            }
        }
        _ => {
            log::debug!("Skipped ID3 tag with unsupported major version {major_version}");
            return Ok(None);
        }
    }

    let frames_end = (frames_start + frames_size).min(data.len());
    let mut frames = data.get(frames_start..frames_end).unwrap_or_default().to_vec();
    if major_version < 4 && flags & 0x80 != 0 {
        frames = remove_unsynchronization(&frames);
    }

    let frame_header_size = if major_version == 2 { 6 } else { 10 };
    let mut tag = Id3Tag {
        major_version,
        frames: Vec::new(),
    };
    let mut position = 0;
    while frames.len() - position >= frame_header_size {
        match decode_frame(major_version, &frames, &mut position, predicate) {
            Ok(Some(frame)) => tag.frames.push(frame),
            Ok(None) => {}
            Err(e) => log::warn!("Skipped ID3 frame: {e}"),
        }
    }
    Ok(Some(tag))
}

/// Decodes the frame at `*position` and advances past it.
fn decode_frame(
    major_version: u8,
    data: &[u8],
    position: &mut usize,
    predicate: Option<FramePredicate>,
) -> Result<Option<Id3Frame>> {
    let header = &data[*position..];
    let (id, mut frame_size, flags, header_size) = if major_version == 2 {
        let id = [header[0], header[1], header[2], 0];
        let size = u32::from_be_bytes([0, header[3], header[4], header[5]]) as usize;
        (id, size, 0u16, 6)
    } else {
        let id = [header[0], header[1], header[2], header[3]];
        let size_bytes = &header[4..8];
        let size = if major_version == 4 {
            syncsafe(size_bytes) as usize
        } else {
            u32::from_be_bytes([size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]]) as usize
        };
        (id, size, u16::from_be_bytes([header[8], header[9]]), 10)
    };

    // Padding fills the rest of the tag.
    if id == [0; 4] && frame_size == 0 && flags == 0 {
        *position = data.len();
        return Ok(None);
    }

    let body_start = *position + header_size;
    let next_frame_position = body_start + frame_size;
    if next_frame_position > data.len() {
        *position = data.len();
        bail!(Mp3Error::InvalidId3Frame("size"));
    }
    *position = next_frame_position;

    if predicate.is_some_and(|accept| !accept(major_version, &id)) {
        return Ok(None);
    }

    let (compressed, encrypted, grouped, unsynchronized, has_data_length) = match major_version {
        3 => (flags & 0x80 != 0, flags & 0x40 != 0, flags & 0x20 != 0, false, flags & 0x80 != 0),
        4 => (
            flags & 0x08 != 0,
            flags & 0x04 != 0,
            flags & 0x40 != 0,
            flags & 0x02 != 0,
            flags & 0x01 != 0,
        ),
        _ => (false, false, false, false, false),
    };
    if compressed || encrypted {
        log::debug!("Skipped compressed or encrypted ID3 frame {}", frame_id(&id));
        return Ok(None);
    }

    let mut body_start = body_start;
    if grouped {
        body_start += 1;
        frame_size = frame_size.saturating_sub(1);
    }
    if has_data_length {
        body_start += 4;
        frame_size = frame_size.saturating_sub(4);
    }
    let mut body = data[body_start.min(next_frame_position)..next_frame_position].to_vec();
    if unsynchronized {
        body = remove_unsynchronization(&body);
    }

    let id_string = frame_id(&id);
    let frame = match id_string.as_str() {
        "MLLT" | "MLL" => Some(Id3Frame::Mllt(decode_mllt(&body)?)),
        "COMM" | "COM" => Some(Id3Frame::Comment(decode_comment(&body)?)),
        _ if id[0] == b'T' && id_string != "TXXX" && id_string != "TXX" => {
            let (&encoding, text) = body
                .split_first()
                .ok_or(Mp3Error::InvalidId3Frame("text"))?;
            let end = index_of_eos(text, 0, encoding);
            Some(Id3Frame::Text {
                id: id_string,
                value: decode_string(&text[..end], encoding),
            })
        }
        _ => None,
    };
    Ok(frame)
}

fn frame_id(id: &[u8; 4]) -> String {
    id.iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

fn decode_mllt(body: &[u8]) -> Result<MlltFrame> {
    let mut reader = BsIoSliceReader::from_slice(body);
    let mut read = || -> std::io::Result<MlltFrame> {
        let _mpeg_frames_between_reference: u16 = reader.get_n(16)?;
        let bytes_between_reference = reader.get_n(24)?;
        let milliseconds_between_reference = reader.get_n(24)?;
        let bits_for_bytes: u32 = reader.get_n(8)?;
        let bits_for_milliseconds: u32 = reader.get_n(8)?;

        let mut frame = MlltFrame {
            bytes_between_reference,
            milliseconds_between_reference,
            bytes_deviations: Vec::new(),
            milliseconds_deviations: Vec::new(),
        };
        if bits_for_bytes > 32 || bits_for_milliseconds > 32 {
            return Err(std::io::ErrorKind::InvalidData.into());
        }
        let bits_per_reference = (bits_for_bytes + bits_for_milliseconds) as usize;
        if bits_per_reference == 0 {
            return Ok(frame);
        }

        let references = (body.len() - 10) * 8 / bits_per_reference;
        for _ in 0..references {
            let bytes = if bits_for_bytes > 0 { reader.get_n(bits_for_bytes)? } else { 0 };
            let ms = if bits_for_milliseconds > 0 {
                reader.get_n(bits_for_milliseconds)?
            } else {
                0
            };
            frame.bytes_deviations.push(bytes);
            frame.milliseconds_deviations.push(ms);
        }
        Ok(frame)
    };

    read().map_err(|_| Mp3Error::InvalidId3Frame("MLLT").into())
}

fn decode_comment(body: &[u8]) -> Result<CommentFrame> {
    ensure!(body.len() >= 4, Mp3Error::InvalidId3Frame("COMM"));

    let encoding = body[0];
    let language = body[1..4].iter().map(|&b| b as char).collect();
    let data = &body[4..];

    let description_end = index_of_eos(data, 0, encoding);
    let description = decode_string(&data[..description_end], encoding);

    let text_start = (description_end + delimiter_length(encoding)).min(data.len());
    let text_end = index_of_eos(data, text_start, encoding);
    let text = decode_string(&data[text_start..text_end], encoding);

    Ok(CommentFrame {
        language,
        description,
        text,
    })
}

fn delimiter_length(encoding: u8) -> usize {
    match encoding {
        ENCODING_ISO_8859_1 | ENCODING_UTF8 => 1,
        _ => 2,
    }
}

/// Index of the string terminator at or after `from`, or `data.len()`.
fn index_of_eos(data: &[u8], from: usize, encoding: u8) -> usize {
    let tail = data.get(from..).unwrap_or_default();
    let found = match encoding {
        ENCODING_UTF16 | ENCODING_UTF16BE => tail
            .chunks_exact(2)
            .position(|pair| pair == [0, 0])
            .map(|i| i * 2),
        _ => tail.iter().position(|&b| b == 0),
    };
    found.map_or(data.len(), |i| from + i)
}

fn decode_string(data: &[u8], encoding: u8) -> String {
    match encoding {
        ENCODING_UTF8 => String::from_utf8_lossy(data).into_owned(),
        ENCODING_UTF16 | ENCODING_UTF16BE => {
            let (little_endian, data) = match data {
                [0xFF, 0xFE, rest @ ..] if encoding == ENCODING_UTF16 => (true, rest),
                [0xFE, 0xFF, rest @ ..] if encoding == ENCODING_UTF16 => (false, rest),
                _ => (false, data),
            };
            let units: Vec<u16> = data
                .chunks_exact(2)
                .map(|pair| {
                    if little_endian {
                        u16::from_le_bytes([pair[0], pair[1]])
                    } else {
                        u16::from_be_bytes([pair[0], pair[1]])
                    }
                })
                .collect();
            String::from_utf16_lossy(&units)
        }
        // ISO-8859-1, which maps one to one onto the first Unicode code points.
        _ => data.iter().map(|&b| b as char).collect(),
    }
}

/// Undoes ID3 unsynchronization, dropping the zero byte after every 0xFF.
fn remove_unsynchronization(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut previous = 0u8;
    for &b in data {
        if !(previous == 0xFF && b == 0) {
            out.push(b);
        }
        previous = b;
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::input::tests::input_for;

    fn syncsafe_bytes(value: usize) -> [u8; 4] {
        [
            ((value >> 21) & 0x7F) as u8,
            ((value >> 14) & 0x7F) as u8,
            ((value >> 7) & 0x7F) as u8,
            (value & 0x7F) as u8,
        ]
    }

    /// An ID3v2.4 tag holding the given `(id, body)` frames.
    pub(crate) fn tag(frames: &[(&[u8; 4], &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (id, frame) in frames {
            body.extend_from_slice(*id);
            body.extend_from_slice(&syncsafe_bytes(frame.len()));
            body.extend_from_slice(&[0, 0]);
            body.extend_from_slice(frame);
        }
        let mut data = b"ID3\x04\x00\x00".to_vec();
        data.extend_from_slice(&syncsafe_bytes(body.len()));
        data.extend_from_slice(&body);
        data
    }

    pub(crate) fn comment(description: &str, text: &str) -> Vec<u8> {
        let mut body = vec![ENCODING_ISO_8859_1];
        body.extend_from_slice(b"eng");
        body.extend_from_slice(description.as_bytes());
        body.push(0);
        body.extend_from_slice(text.as_bytes());
        body
    }

    /// 4 bytes and 4 ms deviations per reference, then references
    /// `(0, 0)`, `(5, 2)` and `(15, 15)`.
    pub(crate) fn mllt() -> Vec<u8> {
        let mut body = vec![0x00, 0x01];
        body.extend_from_slice(&[0x00, 0x03, 0xE8]);
        body.extend_from_slice(&[0x00, 0x01, 0xF4]);
        body.extend_from_slice(&[4, 4]);
        body.extend_from_slice(&[0x00, 0x52, 0xFF]);
        body
    }

    #[test]
    fn decodes_required_frames() -> Result<()> {
        let data = tag(&[
            (b"TLEN", b"\x0312345"),
            (b"COMM", &comment("iTunSMPB", " 00000000 00000210 000003C4")),
            (b"MLLT", &mllt()),
        ]);

        let tag = decode(&data, None)?.expect("v2.4 tag");
        assert_eq!(tag.length_us(), Some(12_345_000));
        let comment = tag.comments().next().expect("comment");
        assert_eq!(comment.language, "eng");
        assert_eq!(comment.description, "iTunSMPB");

        let mllt = tag.mllt().expect("MLLT");
        assert_eq!(mllt.bytes_between_reference, 1000);
        assert_eq!(mllt.milliseconds_between_reference, 500);
        assert_eq!(mllt.bytes_deviations, vec![0, 5, 15]);
        assert_eq!(mllt.milliseconds_deviations, vec![0, 2, 15]);

        let filtered = decode(&data, Some(required_frames))?.expect("v2.4 tag");
        assert_eq!(filtered.frames.len(), 2);
        assert_eq!(filtered.length_us(), None);
        Ok(())
    }

    #[test]
    fn peeks_past_consecutive_tags() -> Result<()> {
        let mut data = tag(&[(b"TIT2", b"\x00first")]);
        let first_length = data.len();
        data.extend_from_slice(&tag(&[(b"TIT2", b"\x00second")]));
        let tags_length = data.len();
        data.extend_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);

        let mut input = input_for(&data);
        let tag = peek_id3_data(&mut input, None)?.expect("tag");
        assert_eq!(tag.text("TIT2"), Some("first"));
        assert!(first_length < tags_length);
        assert_eq!(input.peek_position(), tags_length as u64);
        assert_eq!(input.position(), 0);

        let mut input = input_for(&[0xFF, 0xFB, 0x90, 0x00]);
        assert_eq!(peek_id3_data(&mut input, None)?, None);
        assert_eq!(input.peek_position(), 0);
        Ok(())
    }

    #[test]
    fn string_encodings() {
        assert_eq!(decode_string(&[0x63, 0xE9], ENCODING_ISO_8859_1), "cé");
        assert_eq!(decode_string(&[0xFF, 0xFE, 0x41, 0x00], ENCODING_UTF16), "A");
        assert_eq!(decode_string(&[0x00, 0x41], ENCODING_UTF16BE), "A");
        assert_eq!(decode_string("é".as_bytes(), ENCODING_UTF8), "é");
        assert_eq!(index_of_eos(&[0x41, 0x00, 0x00, 0x00, 0x42], 0, ENCODING_UTF16), 2);
        assert_eq!(remove_unsynchronization(&[0xFF, 0x00, 0xE0, 0xFF, 0x00]), vec![0xFF, 0xE0, 0xFF]);
    }
}
