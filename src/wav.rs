use std::io::{self, BufWriter, Seek, SeekFrom, Write};

use demux::output::PcmEncoding;

use crate::byteorder::WriteBytesLe;
use crate::join_bytes_le;
use demuxd_macros::ToBytes;

pub const WAVE_FORMAT_PCM: u16 = 0x0001;
pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;

/// Bytes from the start of the file to the first data byte.
pub const HEADER_SIZE: u64 = 44;

/// Body of the `fmt ` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ToBytes)]
pub struct WaveFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

impl WaveFormat {
    pub fn new(encoding: PcmEncoding, sample_rate: u32, channels: u16) -> Self {
        let bits_per_sample = encoding.bits_per_sample() as u16;
        let block_align = channels * (bits_per_sample / 8);
        Self {
            format_tag: if encoding.is_float() {
                WAVE_FORMAT_IEEE_FLOAT
            } else {
                WAVE_FORMAT_PCM
            },
            channels,
            sample_rate,
            byte_rate: sample_rate * block_align as u32,
            block_align,
            bits_per_sample,
        }
    }
}

/// RIFF/WAVE writer for interleaved little-endian samples. Sizes are patched
/// by [`finish`](Self::finish), so the data length need not be known upfront.
pub struct WAVWriter<W: Write + Seek> {
    writer: BufWriter<W>,
    format: WaveFormat,
    header_written: bool,
    data_written: u64,
}

impl<W: Write + Seek> WAVWriter<W> {
    pub fn new(writer: W, format: WaveFormat) -> Self {
        Self {
            writer: BufWriter::new(writer),
            format,
            header_written: false,
            data_written: 0,
        }
    }

    /// Write RIFF, `fmt ` and `data` headers with placeholder sizes
    pub fn write_header(&mut self) -> io::Result<()> {
        if self.header_written {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Header already written",
            ));
        }

        let mut fmt = Vec::new();
        self.format.write_le(&mut fmt);
        let header = join_bytes_le!(
            *b"RIFF",
            0u32,
            *b"WAVE",
            *b"fmt ",
            fmt.len() as u32,
            fmt,
            *b"data",
            0u32,
        );
        self.writer.write_all(&header)?;
        self.header_written = true;
        Ok(())
    }

    /// Append sample data. Partial sample frames are written as given.
    pub fn write_data(&mut self, data: &[u8]) -> io::Result<()> {
        if !self.header_written {
            self.write_header()?;
        }
        self.writer.write_all(data)?;
        self.data_written += data.len() as u64;
        Ok(())
    }

    /// Update the RIFF and `data` sizes and pad the data to an even length.
    pub fn finish(&mut self) -> io::Result<()> {
        if !self.header_written {
            self.write_header()?;
        }
        if self.data_written % 2 == 1 {
            self.writer.write_all(&[0])?;
        }
        self.writer.flush()?;

        let current_pos = self.writer.stream_position()?;
        let data_size = self.data_written.min(u32::MAX as u64) as u32;
        let riff_size = current_pos.saturating_sub(8).min(u32::MAX as u64) as u32;

        self.writer.seek(SeekFrom::Start(4))?;
        self.writer.write_all(&riff_size.to_le_bytes())?;
        self.writer.seek(SeekFrom::Start(HEADER_SIZE - 4))?;
        self.writer.write_all(&data_size.to_le_bytes())?;

        self.writer.seek(SeekFrom::Start(current_pos))?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn data_written(&self) -> u64 {
        self.data_written
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn le_u32(bytes: &[u8]) -> u32 {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[test]
    fn writes_pcm_header_and_sizes() -> io::Result<()> {
        let format = WaveFormat::new(PcmEncoding::S16Le, 8000, 2);
        let mut writer = WAVWriter::new(Cursor::new(Vec::new()), format);
        writer.write_header()?;
        writer.write_data(&[1, 2, 3, 4])?;
        writer.write_data(&[5, 6, 7, 8])?;
        writer.finish()?;
        let buffer = writer.into_inner()?.into_inner();

        assert_eq!(buffer.len(), HEADER_SIZE as usize + 8);
        assert_eq!(&buffer[0..4], b"RIFF");
        assert_eq!(le_u32(&buffer[4..]), 36 + 8);
        assert_eq!(&buffer[8..16], b"WAVEfmt ");
        assert_eq!(le_u32(&buffer[16..]), 16);
        assert_eq!(&buffer[20..22], &[1, 0]);
        assert_eq!(&buffer[22..24], &[2, 0]);
        assert_eq!(le_u32(&buffer[24..]), 8000);
        assert_eq!(le_u32(&buffer[28..]), 32_000);
        assert_eq!(&buffer[32..36], &[4, 0, 16, 0]);
        assert_eq!(&buffer[36..40], b"data");
        assert_eq!(le_u32(&buffer[40..]), 8);
        assert_eq!(&buffer[44..], &[1, 2, 3, 4, 5, 6, 7, 8]);
        Ok(())
    }

    #[test]
    fn float_format_and_odd_length_padding() -> io::Result<()> {
        let format = WaveFormat::new(PcmEncoding::F32Le, 48_000, 1);
        assert_eq!(format.format_tag, WAVE_FORMAT_IEEE_FLOAT);
        assert_eq!(format.block_align, 4);

        let mut writer = WAVWriter::new(Cursor::new(Vec::new()), format);
        writer.write_data(&[9, 9, 9])?;
        writer.finish()?;
        let buffer = writer.into_inner()?.into_inner();

        assert_eq!(buffer.len(), HEADER_SIZE as usize + 4);
        assert_eq!(le_u32(&buffer[40..]), 3);
        assert_eq!(le_u32(&buffer[4..]), 36 + 4);
        Ok(())
    }
}
