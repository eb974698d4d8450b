//! Byte cursor consumed by the extractors.
//!
//! [`ExtractorInput`] offers sequential reads plus a peek window that can be
//! advanced ahead of the read position and reset back to it. Bytes fetched
//! while peeking are buffered and handed out again by later reads, so an
//! extractor can look ahead on a non-seekable source.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom};

const SCRATCH_SIZE: usize = 4096;

pub trait ExtractorInput {
    /// Reads up to `buf.len()` bytes. Returns 0 at the end of the input.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Fills `buf` completely.
    ///
    /// Returns `Ok(false)` if `allow_end_of_input` is set and the input ended
    /// before any byte was read. Ending part way through is an
    /// [`ErrorKind::UnexpectedEof`] error.
    fn read_fully(&mut self, buf: &mut [u8], allow_end_of_input: bool) -> io::Result<bool>;

    /// Skips up to `len` bytes. Returns 0 at the end of the input.
    fn skip(&mut self, len: usize) -> io::Result<usize>;

    /// Skips exactly `len` bytes, with the same end-of-input rules as
    /// [`ExtractorInput::read_fully`].
    fn skip_fully(&mut self, len: usize, allow_end_of_input: bool) -> io::Result<bool>;

    /// Copies the next `buf.len()` bytes after the peek position and advances
    /// the peek position past them.
    fn peek_fully(&mut self, buf: &mut [u8], allow_end_of_input: bool) -> io::Result<bool>;

    /// Advances the peek position by `len` bytes without copying them.
    fn advance_peek_position(&mut self, len: usize, allow_end_of_input: bool) -> io::Result<bool>;

    /// Moves the peek position back to the read position.
    fn reset_peek_position(&mut self);

    fn peek_position(&self) -> u64;

    fn position(&self) -> u64;

    /// Total length of the stream, if known.
    fn length(&self) -> Option<u64>;
}

/// Peeks like [`ExtractorInput::peek_fully`] but reports a truncated peek as
/// `Ok(false)` instead of an error.
pub fn peek_fully_quietly(
    input: &mut dyn ExtractorInput,
    buf: &mut [u8],
    allow_end_of_input: bool,
) -> io::Result<bool> {
    match input.peek_fully(buf, allow_end_of_input) {
        Ok(peeked) => Ok(peeked),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn end_of_input(context: &str) -> io::Error {
    io::Error::new(
        ErrorKind::UnexpectedEof,
        format!("{context}: input ended mid-structure"),
    )
}

/// [`ExtractorInput`] over any [`Read`] source.
#[derive(Debug)]
pub struct StreamInput<R> {
    reader: R,
    position: u64,
    length: Option<u64>,
    peek_buffer: VecDeque<u8>,
    peek_offset: usize,
}

impl<R: Read> StreamInput<R> {
    /// Wraps `reader`, whose next byte is at absolute `position` in a stream of
    /// `length` bytes.
    pub fn new(reader: R, position: u64, length: Option<u64>) -> Self {
        Self {
            reader,
            position,
            length,
            peek_buffer: VecDeque::new(),
            peek_offset: 0,
        }
    }

    /// Returns the wrapped reader. Buffered peek bytes are dropped.
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn read_upstream(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.reader.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn read_from_peek_buffer(&mut self, buf: &mut [u8]) -> usize {
        let len = buf.len().min(self.peek_buffer.len());
        for (dst, src) in buf.iter_mut().zip(self.peek_buffer.drain(..len)) {
            *dst = src;
        }
        self.consume(len);
        len
    }

    fn skip_from_peek_buffer(&mut self, len: usize) -> usize {
        let len = len.min(self.peek_buffer.len());
        self.peek_buffer.drain(..len);
        self.consume(len);
        len
    }

    fn consume(&mut self, len: usize) {
        self.position += len as u64;
        self.peek_offset = self.peek_offset.saturating_sub(len);
    }
}

impl<R: Read + Seek> StreamInput<R> {
    /// Moves the reader to absolute `position`, dropping peeked bytes.
    pub fn seek_to(&mut self, position: u64) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(position))?;
        self.position = position;
        self.peek_buffer.clear();
        self.peek_offset = 0;
        Ok(())
    }
}

impl<R: Read> ExtractorInput for StreamInput<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let from_peek = self.read_from_peek_buffer(buf);
        if from_peek > 0 {
            return Ok(from_peek);
        }

        let n = self.read_upstream(buf)?;
        self.consume(n);
        Ok(n)
    }

    fn read_fully(&mut self, buf: &mut [u8], allow_end_of_input: bool) -> io::Result<bool> {
        let mut done = self.read_from_peek_buffer(buf);

        while done < buf.len() {
            let n = self.read_upstream(&mut buf[done..])?;
            if n == 0 {
                if done == 0 && allow_end_of_input {
                    return Ok(false);
                }
                return Err(end_of_input("read_fully"));
            }
            self.consume(n);
            done += n;
        }

        Ok(true)
    }

    fn skip(&mut self, len: usize) -> io::Result<usize> {
        if len == 0 {
            return Ok(0);
        }

        let from_peek = self.skip_from_peek_buffer(len);
        if from_peek > 0 {
            return Ok(from_peek);
        }

        let mut scratch = [0u8; SCRATCH_SIZE];
        let want = len.min(SCRATCH_SIZE);
        let n = self.read_upstream(&mut scratch[..want])?;
        self.consume(n);
        Ok(n)
    }

    fn skip_fully(&mut self, len: usize, allow_end_of_input: bool) -> io::Result<bool> {
        let mut done = self.skip_from_peek_buffer(len);
        let mut scratch = [0u8; SCRATCH_SIZE];

        while done < len {
            let want = (len - done).min(SCRATCH_SIZE);
            let n = self.read_upstream(&mut scratch[..want])?;
            if n == 0 {
                if done == 0 && allow_end_of_input {
                    return Ok(false);
                }
                return Err(end_of_input("skip_fully"));
            }
            self.consume(n);
            done += n;
        }

        Ok(true)
    }

    fn peek_fully(&mut self, buf: &mut [u8], allow_end_of_input: bool) -> io::Result<bool> {
        if !self.advance_peek_position(buf.len(), allow_end_of_input)? {
            return Ok(false);
        }

        let start = self.peek_offset - buf.len();
        for (dst, src) in buf.iter_mut().zip(self.peek_buffer.range(start..self.peek_offset)) {
            *dst = *src;
        }

        Ok(true)
    }

    fn advance_peek_position(&mut self, len: usize, allow_end_of_input: bool) -> io::Result<bool> {
        let mut peeked = self.peek_buffer.len() - self.peek_offset;
        let mut scratch = [0u8; SCRATCH_SIZE];

        while peeked < len {
            let want = (len - peeked).min(SCRATCH_SIZE);
            let n = self.read_upstream(&mut scratch[..want])?;
            if n == 0 {
                if peeked == 0 && allow_end_of_input {
                    return Ok(false);
                }
                return Err(end_of_input("advance_peek_position"));
            }
            self.peek_buffer.extend(&scratch[..n]);
            peeked += n;
        }

        self.peek_offset += len;
        Ok(true)
    }

    fn reset_peek_position(&mut self) {
        self.peek_offset = 0;
    }

    fn peek_position(&self) -> u64 {
        self.position + self.peek_offset as u64
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn length(&self) -> Option<u64> {
        self.length
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out at most `chunk` bytes per read, like a slow network source.
    pub(crate) struct ChunkedReader {
        data: Vec<u8>,
        offset: usize,
        chunk: usize,
    }

    impl ChunkedReader {
        pub(crate) fn new(data: Vec<u8>, chunk: usize) -> Self {
            Self {
                data,
                offset: 0,
                chunk,
            }
        }
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = buf.len().min(self.chunk).min(self.data.len() - self.offset);
            buf[..len].copy_from_slice(&self.data[self.offset..self.offset + len]);
            self.offset += len;
            Ok(len)
        }
    }

    pub(crate) fn input_for(data: &[u8]) -> StreamInput<Cursor<Vec<u8>>> {
        StreamInput::new(Cursor::new(data.to_vec()), 0, Some(data.len() as u64))
    }

    #[test]
    fn peeked_bytes_are_read_again() -> io::Result<()> {
        let mut input = StreamInput::new(ChunkedReader::new((0u8..16).collect(), 3), 0, None);

        let mut peek = [0u8; 6];
        assert!(input.peek_fully(&mut peek, false)?);
        assert_eq!(peek, [0, 1, 2, 3, 4, 5]);
        assert_eq!(input.peek_position(), 6);
        assert_eq!(input.position(), 0);

        input.reset_peek_position();
        let mut read = [0u8; 8];
        assert!(input.read_fully(&mut read, false)?);
        assert_eq!(read, [0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(input.position(), 8);
        assert_eq!(input.peek_position(), 8);

        Ok(())
    }

    #[test]
    fn peek_position_survives_partial_consumption() -> io::Result<()> {
        let mut input = input_for(&[10, 11, 12, 13, 14, 15]);

        assert!(input.advance_peek_position(4, false)?);
        assert!(input.skip_fully(2, false)?);
        assert_eq!(input.peek_position(), 4);

        let mut next = [0u8; 2];
        assert!(input.peek_fully(&mut next, false)?);
        assert_eq!(next, [14, 15]);

        Ok(())
    }

    #[test]
    fn end_of_input_rules() -> io::Result<()> {
        let mut input = input_for(&[1, 2, 3]);

        let mut buf = [0u8; 4];
        let err = input.read_fully(&mut buf, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);

        let mut input = input_for(&[1, 2, 3]);
        assert!(input.skip_fully(3, true)?);
        assert!(!input.read_fully(&mut buf, true)?);
        assert!(!input.peek_fully(&mut buf, true)?);
        assert!(!input.skip_fully(1, true)?);
        assert_eq!(input.read(&mut buf)?, 0);

        Ok(())
    }

    #[test]
    fn quiet_peek_reports_truncation() -> io::Result<()> {
        let mut input = input_for(&[1, 2]);
        let mut buf = [0u8; 4];

        assert!(!peek_fully_quietly(&mut input, &mut buf, false)?);
        Ok(())
    }
}
