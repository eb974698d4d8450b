use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::Result;

/// Unified input reader that handles both file and pipe input with buffered reading
pub struct InputReader {
    source: Source,
    length: Option<u64>,
}

enum Source {
    File(BufReader<File>),
    Pipe(ForwardOnly<io::StdinLock<'static>>),
}

impl InputReader {
    /// Create a new InputReader from a path
    /// Use "-" for stdin pipe input
    pub fn new<P: AsRef<Path>>(input_path: P) -> Result<Self> {
        let path_str = input_path.as_ref().to_string_lossy();

        if path_str == "-" {
            return Ok(Self {
                source: Source::Pipe(ForwardOnly::new(io::stdin().lock())),
                length: None,
            });
        }

        let file = File::open(input_path)?;
        let length = file.metadata()?.len();
        Ok(Self {
            source: Source::File(BufReader::new(file)),
            length: Some(length),
        })
    }

    /// Check if this is pipe input
    pub fn is_pipe(&self) -> bool {
        matches!(self.source, Source::Pipe(_))
    }

    /// Total input length, unknown for pipes
    pub fn length(&self) -> Option<u64> {
        self.length
    }
}

impl Read for InputReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.source {
            Source::File(reader) => reader.read(buf),
            Source::Pipe(reader) => reader.read(buf),
        }
    }
}

impl Seek for InputReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.source {
            Source::File(reader) => reader.seek(pos),
            Source::Pipe(reader) => reader.seek(pos),
        }
    }
}

/// Seek adapter for streams that can only move forward. Forward seeks skip
/// bytes, backward seeks fail with `Unsupported`.
pub struct ForwardOnly<R> {
    inner: R,
    position: u64,
}

impl<R: Read> ForwardOnly<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }
}

impl<R: Read> Read for ForwardOnly<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read> Seek for ForwardOnly<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(target) => Some(target),
            SeekFrom::Current(offset) => self.position.checked_add_signed(offset),
            SeekFrom::End(_) => None,
        };
        let Some(target) = target.filter(|&target| target >= self.position) else {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "Pipe input can only move forward",
            ));
        };

        let skip = target - self.position;
        let skipped = io::copy(&mut (&mut self.inner).take(skip), &mut io::sink())?;
        self.position += skipped;
        if skipped < skip {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_only_skips_and_refuses_rewinds() -> io::Result<()> {
        let mut reader = ForwardOnly::new(&[0u8, 1, 2, 3, 4, 5, 6, 7][..]);
        assert_eq!(reader.stream_position()?, 0);

        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        assert_eq!(reader.seek(SeekFrom::Start(4))?, 4);
        reader.read_exact(&mut byte)?;
        assert_eq!(byte, [4]);

        let err = reader.seek(SeekFrom::Start(2)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        assert!(reader.seek(SeekFrom::End(0)).is_err());

        let err = reader.seek(SeekFrom::Current(10)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        Ok(())
    }
}
