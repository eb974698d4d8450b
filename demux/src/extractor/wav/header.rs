use anyhow::{bail, ensure, Result};

use crate::input::{peek_fully_quietly, ExtractorInput};
use crate::output::{mime, PcmEncoding};
use crate::utils::errors::{CodecError, WavError};

pub const RIFF_HEADER_SIZE: usize = 12;
const CHUNK_HEADER_SIZE: usize = 8;
const MIN_FMT_CHUNK_SIZE: u32 = 16;
/// Offset of the subformat GUID past the basic `fmt ` fields: `cbSize`,
/// valid bits per sample and the channel mask come first.
const EXTENSIBLE_SUBFORMAT_OFFSET: usize = 8;

const RIFF: &[u8; 4] = b"RIFF";
const WAVE: &[u8; 4] = b"WAVE";
const FMT: &[u8; 4] = b"fmt ";
const DATA: &[u8; 4] = b"data";

pub const TYPE_PCM: u16 = 0x0001;
pub const TYPE_FLOAT: u16 = 0x0003;
pub const TYPE_ALAW: u16 = 0x0006;
pub const TYPE_MLAW: u16 = 0x0007;
pub const TYPE_EXTENSIBLE: u16 = 0xFFFE;

/// Contents of the `fmt ` chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavHeader {
    /// Format tag, resolved through the subformat of extensible headers.
    pub format_type: u16,
    pub channels: u16,
    pub frame_rate_hz: u32,
    pub average_bytes_per_second: u32,
    pub block_size: u16,
    pub bits_per_sample: u16,
    pub extra_data: Vec<u8>,
}

/// How the samples of a stream are passed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavEncoding {
    pub mime_type: &'static str,
    pub pcm_encoding: Option<PcmEncoding>,
}

impl WavHeader {
    pub fn parse(chunk: &[u8]) -> Result<Self> {
        ensure!(
            chunk.len() >= MIN_FMT_CHUNK_SIZE as usize,
            WavError::FmtChunkTooShort(chunk.len() as u32)
        );

        let u16_at = |i: usize| u16::from_le_bytes([chunk[i], chunk[i + 1]]);
        let u32_at = |i: usize| u32::from_le_bytes([chunk[i], chunk[i + 1], chunk[i + 2], chunk[i + 3]]);

        let mut format_type = u16_at(0);
        let extra_data = chunk[MIN_FMT_CHUNK_SIZE as usize..].to_vec();
        if format_type == TYPE_EXTENSIBLE {
            // The first two bytes of the subformat GUID hold the format tag.
            let Some(subformat) = extra_data.get(EXTENSIBLE_SUBFORMAT_OFFSET..EXTENSIBLE_SUBFORMAT_OFFSET + 2) else {
                bail!(WavError::FmtChunkTooShort(chunk.len() as u32));
            };
            format_type = u16::from_le_bytes([subformat[0], subformat[1]]);
        }

        Ok(Self {
            format_type,
            channels: u16_at(2),
            frame_rate_hz: u32_at(4),
            average_bytes_per_second: u32_at(8),
            block_size: u16_at(12),
            bits_per_sample: u16_at(14),
            extra_data,
        })
    }

    pub fn encoding(&self) -> Result<WavEncoding> {
        let pcm = |encoding| WavEncoding {
            mime_type: mime::AUDIO_RAW,
            pcm_encoding: Some(encoding),
        };
        let encoding = match (self.format_type, self.bits_per_sample) {
            (TYPE_PCM, 8) => pcm(PcmEncoding::U8),
            (TYPE_PCM, 16) => pcm(PcmEncoding::S16Le),
            (TYPE_PCM, 24) => pcm(PcmEncoding::S24Le),
            (TYPE_PCM, 32) => pcm(PcmEncoding::S32Le),
            (TYPE_FLOAT, 32) => pcm(PcmEncoding::F32Le),
            (TYPE_FLOAT, 64) => pcm(PcmEncoding::F64Le),
            (TYPE_ALAW, 8) => WavEncoding {
                mime_type: mime::AUDIO_ALAW,
                pcm_encoding: None,
            },
            (TYPE_MLAW, 8) => WavEncoding {
                mime_type: mime::AUDIO_MLAW,
                pcm_encoding: None,
            },
            (format_type, bits) => bail!(CodecError::UnsupportedFormat(format!(
                "WAV format {format_type:#06X} with {bits} bits per sample"
            ))),
        };

        let expected = self.channels as u32 * self.bits_per_sample as u32 / 8;
        ensure!(
            self.block_size as u32 == expected && expected > 0,
            WavError::InvalidBlockSize {
                block_size: self.block_size,
                expected,
            }
        );
        ensure!(
            self.frame_rate_hz > 0,
            CodecError::UnsupportedFormat("WAV stream with a sample rate of 0".into())
        );
        Ok(encoding)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkHeader {
    id: [u8; 4],
    size: u32,
}

impl ChunkHeader {
    fn from_bytes(bytes: &[u8; CHUNK_HEADER_SIZE]) -> Self {
        Self {
            id: [bytes[0], bytes[1], bytes[2], bytes[3]],
            size: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    /// Chunks are padded to an even size.
    fn padded_size(&self) -> u64 {
        self.size as u64 + (self.size & 1) as u64
    }
}

/// Whether the input starts with a RIFF/WAVE header. Only peeks.
pub fn sniff(input: &mut dyn ExtractorInput) -> Result<bool> {
    let mut header = [0u8; RIFF_HEADER_SIZE];
    if !peek_fully_quietly(input, &mut header, true)? {
        return Ok(false);
    }
    Ok(&header[..4] == RIFF && &header[8..] == WAVE)
}

/// Consumes the RIFF/WAVE header. Returns `false` at the end of the input.
pub fn read_riff_header(input: &mut dyn ExtractorInput) -> Result<bool> {
    let mut header = [0u8; RIFF_HEADER_SIZE];
    if !input.read_fully(&mut header, true)? {
        return Ok(false);
    }
    ensure!(&header[..4] == RIFF && &header[8..] == WAVE, WavError::MissingRiffHeader);
    Ok(true)
}

/// Skips chunks until one with `id`, and consumes its header.
fn skip_to_chunk(input: &mut dyn ExtractorInput, id: &[u8; 4], missing: WavError) -> Result<ChunkHeader> {
    let mut bytes = [0u8; CHUNK_HEADER_SIZE];
    loop {
        if !input.read_fully(&mut bytes, true)? {
            bail!(missing);
        }
        let chunk = ChunkHeader::from_bytes(&bytes);
        if &chunk.id == id {
            return Ok(chunk);
        }

        log::trace!(
            "Skipping WAV chunk {:?} of {} bytes",
            String::from_utf8_lossy(&chunk.id),
            chunk.size
        );
        if !input.skip_fully(chunk.padded_size() as usize, true)? {
            bail!(missing);
        }
    }
}

/// Reads the `fmt ` chunk, skipping any chunk before it.
pub fn read_format(input: &mut dyn ExtractorInput) -> Result<WavHeader> {
    let chunk = skip_to_chunk(input, FMT, WavError::MissingFmtChunk)?;
    ensure!(chunk.size >= MIN_FMT_CHUNK_SIZE, WavError::FmtChunkTooShort(chunk.size));

    let mut data = vec![0u8; chunk.size as usize];
    input.read_fully(&mut data, false)?;
    input.skip_fully(chunk.padded_size() as usize - data.len(), true)?;
    WavHeader::parse(&data)
}

/// Skips to the sample data. Returns its start and end positions; an end of
/// `None` means the data runs to the end of an input of unknown length.
pub fn skip_to_data(input: &mut dyn ExtractorInput) -> Result<(u64, Option<u64>)> {
    let chunk = skip_to_chunk(input, DATA, WavError::MissingDataChunk)?;
    let start = input.position();

    let declared_end = (chunk.size != u32::MAX).then(|| start + chunk.size as u64);
    let end = match (declared_end, input.length()) {
        (Some(end), Some(length)) => {
            if end > length {
                log::warn!("WAV data chunk of {} bytes runs past the end of the input", chunk.size);
            }
            Some(end.min(length))
        }
        (Some(end), None) => Some(end),
        (None, length) => length,
    };
    Ok((start, end))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::input::tests::input_for;

    pub(crate) fn fmt_chunk(format_type: u16, channels: u16, rate: u32, bits: u16) -> Vec<u8> {
        let block_size = channels * bits / 8;
        let mut chunk = Vec::new();
        chunk.extend_from_slice(&format_type.to_le_bytes());
        chunk.extend_from_slice(&channels.to_le_bytes());
        chunk.extend_from_slice(&rate.to_le_bytes());
        chunk.extend_from_slice(&(rate * block_size as u32).to_le_bytes());
        chunk.extend_from_slice(&block_size.to_le_bytes());
        chunk.extend_from_slice(&bits.to_le_bytes());
        chunk
    }

    /// WAVE_FORMAT_EXTENSIBLE wrapping `subformat`.
    pub(crate) fn extensible_fmt_chunk(subformat: u16, channels: u16, rate: u32, bits: u16) -> Vec<u8> {
        let mut chunk = fmt_chunk(TYPE_EXTENSIBLE, channels, rate, bits);
        chunk.extend_from_slice(&22u16.to_le_bytes());
        chunk.extend_from_slice(&bits.to_le_bytes());
        chunk.extend_from_slice(&3u32.to_le_bytes());
        chunk.extend_from_slice(&subformat.to_le_bytes());
        chunk.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71]);
        chunk
    }

    pub(crate) fn wav_file(chunks: &[(&[u8; 4], &[u8])]) -> Vec<u8> {
        let mut body = WAVE.to_vec();
        for (id, data) in chunks {
            body.extend_from_slice(*id);
            body.extend_from_slice(&(data.len() as u32).to_le_bytes());
            body.extend_from_slice(data);
            if data.len() % 2 == 1 {
                body.push(0);
            }
        }
        let mut file = RIFF.to_vec();
        file.extend_from_slice(&(body.len() as u32).to_le_bytes());
        file.extend_from_slice(&body);
        file
    }

    #[test]
    fn encodings() -> Result<()> {
        let header = WavHeader::parse(&fmt_chunk(TYPE_PCM, 2, 48000, 24))?;
        assert_eq!(header.block_size, 6);
        assert_eq!(header.encoding()?.pcm_encoding, Some(PcmEncoding::S24Le));

        let header = WavHeader::parse(&extensible_fmt_chunk(TYPE_FLOAT, 2, 44100, 32))?;
        assert_eq!(header.format_type, TYPE_FLOAT);
        assert_eq!(header.extra_data.len(), 24);
        assert_eq!(header.encoding()?.pcm_encoding, Some(PcmEncoding::F32Le));

        let header = WavHeader::parse(&fmt_chunk(TYPE_MLAW, 1, 8000, 8))?;
        assert_eq!(header.encoding()?.mime_type, mime::AUDIO_MLAW);

        // MS ADPCM
        let header = WavHeader::parse(&fmt_chunk(0x0002, 1, 8000, 4))?;
        let err = header.encoding().unwrap_err();
        assert!(matches!(err.downcast_ref::<CodecError>(), Some(CodecError::UnsupportedFormat(_))));
        Ok(())
    }

    #[test]
    fn block_size_must_match_channels() -> Result<()> {
        let mut chunk = fmt_chunk(TYPE_PCM, 2, 8000, 16);
        chunk[12] = 3;
        let err = WavHeader::parse(&chunk)?.encoding().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WavError>(),
            Some(WavError::InvalidBlockSize { block_size: 3, expected: 4 })
        ));
        assert!(WavHeader::parse(&chunk[..14]).is_err());
        Ok(())
    }

    #[test]
    fn skips_padded_chunks() -> Result<()> {
        let file = wav_file(&[
            (b"LIST", b"abc"),
            (b"fmt ", &fmt_chunk(TYPE_PCM, 1, 8000, 8)),
            (b"fact", &[0; 4]),
            (b"data", &[0x80; 10]),
        ]);
        let mut input = input_for(&file);
        assert!(sniff(&mut input)?);
        assert!(read_riff_header(&mut input)?);
        let header = read_format(&mut input)?;
        assert_eq!(header.channels, 1);

        let (start, end) = skip_to_data(&mut input)?;
        assert_eq!(start, file.len() as u64 - 10);
        assert_eq!(end, Some(file.len() as u64));

        let mut input = input_for(&wav_file(&[(b"fmt ", &fmt_chunk(TYPE_PCM, 1, 8000, 8))]));
        read_riff_header(&mut input)?;
        read_format(&mut input)?;
        let err = skip_to_data(&mut input).unwrap_err();
        assert!(matches!(err.downcast_ref::<WavError>(), Some(WavError::MissingDataChunk)));
        Ok(())
    }
}
