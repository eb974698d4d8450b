use std::io::{self, Seek, SeekFrom, Write};

use demux::output::{MediaType, SampleFlags};
use demux::seek::SeekMap;

use crate::byteorder::{WriteBytesBe, WriteBytesLe, to_be_vec};
use crate::impl_u32_enum;
use demuxd_macros::{ToBytes, index_chunk};

pub const INDEX_MAGIC: &[u8; 4] = b"DMXI";
pub const INDEX_VERSION: u16 = 1;

/// Size of a `smpl` chunk entry in bytes.
pub const SAMPLE_ENTRY_SIZE: u64 = 24;

pub fn write_index_file_header<W: Write>(writer: &mut W) -> io::Result<()> {
    writer.write_all(INDEX_MAGIC)?;
    writer.write_all(&INDEX_VERSION.to_be_bytes())?;
    writer.write_all(&0u16.to_be_bytes())?;

    Ok(())
}

/// A chunk of a sample index file: a 4-byte type, a big-endian `u64` size
/// and the body.
pub trait IndexChunk {
    fn chunk_type(&self) -> &[u8; 4];
    fn chunk_data(&self) -> Vec<u8>;

    fn write_all<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let chunk_data = self.chunk_data();
        writer.write_all(self.chunk_type())?;
        writer.write_all(&(chunk_data.len() as u64).to_be_bytes())?;
        writer.write_all(&chunk_data)?;

        Ok(())
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio = 1,
    Video = 2,
    Text = 3,
    Metadata = 4,
}

impl From<MediaType> for TrackKind {
    fn from(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Audio => TrackKind::Audio,
            MediaType::Video => TrackKind::Video,
            MediaType::Text => TrackKind::Text,
            MediaType::Metadata => TrackKind::Metadata,
        }
    }
}

impl_u32_enum!(TrackKind);

/// `trak`: which track the index describes. The MIME type follows as a
/// length-prefixed string.
#[derive(Debug, ToBytes)]
#[index_chunk(b"trak")]
pub struct TrackDescription {
    pub track_id: u32,
    pub kind: TrackKind,
    pub mime_type_length: u16,
    pub mime_type: Vec<u8>,
}

impl TrackDescription {
    pub fn new(track_id: u32, media_type: MediaType, mime_type: &str) -> Self {
        let mime_type = mime_type.as_bytes()[..mime_type.len().min(u16::MAX as usize)].to_vec();
        Self {
            track_id,
            kind: media_type.into(),
            mime_type_length: mime_type.len() as u16,
            mime_type,
        }
    }
}

/// `seek`: the seek points of the source stream at a fixed interval.
#[derive(Debug, ToBytes)]
#[index_chunk(b"seek")]
pub struct SeekTable {
    pub duration_us: i64,
    pub points: Vec<SeekEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ToBytes)]
pub struct SeekEntry {
    pub time_us: i64,
    pub position: u64,
}

impl SeekTable {
    /// Samples `seek_map` every `interval_us` up to its duration. Unseekable
    /// maps and maps without a duration give an empty table.
    pub fn sample(seek_map: &dyn SeekMap, interval_us: i64) -> Self {
        let duration_us = seek_map.duration_us().unwrap_or(-1);
        let mut points: Vec<SeekEntry> = Vec::new();
        if seek_map.is_seekable() && duration_us > 0 && interval_us > 0 {
            let mut time_us = 0;
            while time_us < duration_us {
                let point = seek_map.seek_points(time_us).first;
                let entry = SeekEntry {
                    time_us: point.time_us,
                    position: point.position,
                };
                if points.last() != Some(&entry) {
                    points.push(entry);
                }
                time_us += interval_us;
            }
        }
        Self {
            duration_us,
            points,
        }
    }
}

/// One `smpl` entry: where a sample's payload sits in the `.bin` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ToBytes)]
pub struct SampleEntry {
    pub time_us: i64,
    pub offset: u64,
    pub size: u32,
    pub flags: u32,
}

impl SampleEntry {
    pub fn new(time_us: i64, offset: u64, size: u32, flags: SampleFlags) -> Self {
        Self {
            time_us,
            offset,
            size,
            flags: flags.bits(),
        }
    }
}

/// Sample index writer. The `smpl` chunk is written with an unknown size that
/// [`finish`](Self::finish) patches, so samples can be streamed.
pub struct IndexWriter<W: Write + Seek> {
    writer: W,
    samples_size_position: Option<u64>,
    samples_written: u64,
    finished: bool,
}

impl<W: Write + Seek> IndexWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            samples_size_position: None,
            samples_written: 0,
            finished: false,
        }
    }

    fn check_not_finished(&self) -> io::Result<()> {
        if self.finished {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Writer already finished",
            ));
        }
        Ok(())
    }

    /// Writes the file header and the `trak` chunk. Must be called before
    /// write_sample.
    pub fn write_header(&mut self, track: &TrackDescription) -> io::Result<()> {
        self.check_not_finished()?;
        if self.samples_size_position.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Header already written",
            ));
        }

        write_index_file_header(&mut self.writer)?;
        track.write_all(&mut self.writer)?;

        self.writer.write_all(b"smpl")?;
        self.samples_size_position = Some(self.writer.stream_position()?);
        self.writer.write_all(&(-1i64).to_be_bytes())?; // unknown size
        Ok(())
    }

    pub fn write_sample(&mut self, entry: &SampleEntry) -> io::Result<()> {
        self.check_not_finished()?;
        if self.samples_size_position.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Must call write_header() before write_sample()",
            ));
        }

        self.writer.write_all(&to_be_vec(entry))?;
        self.samples_written += 1;
        Ok(())
    }

    pub fn finish(&mut self) -> io::Result<()> {
        self.finish_with_seek_table(None)
    }

    /// Patches the `smpl` chunk size and appends the `seek` chunk, if any.
    pub fn finish_with_seek_table(&mut self, seek_table: Option<&SeekTable>) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        let size_position = self.samples_size_position.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "Must call write_header() before finish()",
            )
        })?;

        let current_pos = self.writer.stream_position()?;
        let chunk_size = self.samples_written * SAMPLE_ENTRY_SIZE;
        self.writer.seek(SeekFrom::Start(size_position))?;
        self.writer.write_all(&chunk_size.to_be_bytes())?;
        self.writer.seek(SeekFrom::Start(current_pos))?;
        if let Some(seek_table) = seek_table {
            seek_table.write_all(&mut self.writer)?;
        }
        self.writer.flush()?;

        self.finished = true;
        Ok(())
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn into_inner(mut self) -> io::Result<W> {
        self.finish()?;
        let this = std::mem::ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the writer is moved out exactly once.
        Ok(unsafe { std::ptr::read(&this.writer) })
    }
}

impl<W: Write + Seek> Drop for IndexWriter<W> {
    fn drop(&mut self) {
        if !self.finished && self.samples_size_position.is_some() {
            let _ = self.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use demux::seek::ConstantBitrateSeekMap;
    use std::io::Cursor;

    fn be_u64(bytes: &[u8]) -> u64 {
        u64::from_be_bytes(bytes[..8].try_into().expect("8 bytes"))
    }

    #[test]
    fn writes_chunks_and_patches_sample_size() -> io::Result<()> {
        let mut writer = IndexWriter::new(Cursor::new(Vec::new()));
        let track = TrackDescription::new(9, MediaType::Audio, "audio/mpeg");
        writer.write_header(&track)?;
        writer.write_sample(&SampleEntry::new(0, 0, 417, SampleFlags::KEY_FRAME))?;
        writer.write_sample(&SampleEntry::new(26_122, 417, 418, SampleFlags::KEY_FRAME))?;
        let table = SeekTable {
            duration_us: 52_244,
            points: vec![SeekEntry {
                time_us: 0,
                position: 0,
            }],
        };
        writer.finish_with_seek_table(Some(&table))?;
        let buffer = writer.into_inner()?.into_inner();

        assert_eq!(&buffer[0..4], b"DMXI");
        assert_eq!(&buffer[4..6], &[0, 1]);

        // trak: id, kind, length-prefixed MIME type.
        assert_eq!(&buffer[8..12], b"trak");
        assert_eq!(be_u64(&buffer[12..]), 4 + 4 + 2 + 10);
        assert_eq!(&buffer[20..24], &[0, 0, 0, 9]);
        assert_eq!(&buffer[24..28], &[0, 0, 0, 1]);
        assert_eq!(&buffer[28..30], &[0, 10]);
        assert_eq!(&buffer[30..40], b"audio/mpeg");

        assert_eq!(&buffer[40..44], b"smpl");
        assert_eq!(be_u64(&buffer[44..]), 2 * SAMPLE_ENTRY_SIZE);

        let second = &buffer[52 + SAMPLE_ENTRY_SIZE as usize..];
        assert_eq!(be_u64(second), 26_122);
        assert_eq!(be_u64(&second[8..]), 417);
        assert_eq!(&second[16..24], &[0, 0, 1, 0xA2, 0, 0, 0, 1]);

        // The seek table follows the samples.
        let seek = &buffer[52 + 2 * SAMPLE_ENTRY_SIZE as usize..];
        assert_eq!(&seek[0..4], b"seek");
        assert_eq!(be_u64(&seek[4..]), 8 + 16);
        assert_eq!(be_u64(&seek[12..]), 52_244);
        assert_eq!(seek.len(), 12 + 24);
        Ok(())
    }

    #[test]
    fn samples_seek_map_into_table() {
        // 16000 bytes per second starting at byte 100, 4 seconds long.
        let seek_map = ConstantBitrateSeekMap::new(Some(64_100), 100, 128_000, None);
        let table = SeekTable::sample(&seek_map, 1_000_000);
        assert_eq!(table.duration_us, 4_000_000);
        assert_eq!(table.points.len(), 4);
        assert_eq!(
            table.points[1],
            SeekEntry {
                time_us: 1_000_000,
                position: 16_100,
            }
        );
        assert_eq!(table.chunk_data().len(), 8 + 4 * 16);
    }

    #[test]
    fn requires_header_first() {
        let mut writer = IndexWriter::new(Cursor::new(Vec::new()));
        let err = writer
            .write_sample(&SampleEntry::new(0, 0, 1, SampleFlags::NONE))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(writer.finish().is_err());
    }
}
