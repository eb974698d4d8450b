//! Bit-level reading for codec headers embedded in container payloads.
//!
//! Wraps [`bitstream_io::BitReader`] with bounds-checked accessors and the
//! Exp-Golomb codes used by H.264 parameter sets.

use std::io;
use std::io::SeekFrom;

use bitstream_io::{BigEndian, BitRead, BitReader, SignedInteger, UnsignedInteger};

#[derive(Debug)]
pub struct BitstreamIoReader<R: io::Read + io::Seek> {
    bs: BitReader<R, BigEndian>,
    len: u64,
}

pub type BsIoSliceReader<'a> = BitstreamIoReader<io::Cursor<&'a [u8]>>;

impl<R> BitstreamIoReader<R>
where
    R: io::Read + io::Seek,
{
    pub fn new(read: R, len_bytes: u64) -> Self {
        Self {
            bs: BitReader::new(read),
            len: len_bytes << 3,
        }
    }

    #[inline(always)]
    pub fn get(&mut self) -> io::Result<bool> {
        self.bs.read_bit()
    }

    #[inline(always)]
    pub fn get_n<I: UnsignedInteger>(&mut self, n: u32) -> io::Result<I> {
        if n as u64 > self.available()? {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "get_n({}): out of bounds bits at {}",
                    n,
                    self.bs.position_in_bits().unwrap_or(0)
                ),
            ));
        }

        self.bs.read_unsigned_var(n)
    }

    #[inline(always)]
    pub fn get_s<S: SignedInteger>(&mut self, n: u32) -> io::Result<S> {
        if n as u64 > self.available()? {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "get_s({}): out of bounds bits at {}",
                    n,
                    self.bs.position_in_bits().unwrap_or(0)
                ),
            ));
        }

        self.bs.read_signed_var(n)
    }

    /// Reads an unsigned Exp-Golomb code, `ue(v)`.
    pub fn get_ue(&mut self) -> io::Result<u32> {
        let mut leading_zeros = 0u32;
        while !self.get()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "get_ue: code longer than 32 bits",
                ));
            }
        }

        if leading_zeros == 0 {
            return Ok(0);
        }

        let suffix: u32 = self.get_n(leading_zeros)?;
        Ok(((1u64 << leading_zeros) - 1 + suffix as u64) as u32)
    }

    /// Reads a signed Exp-Golomb code, `se(v)`.
    pub fn get_se(&mut self) -> io::Result<i32> {
        let code = self.get_ue()? as i64;
        let magnitude = (code + 1) / 2;
        Ok(if code % 2 == 0 {
            -magnitude as i32
        } else {
            magnitude as i32
        })
    }

    /// Reads `n` whole bytes. The reader must be byte aligned.
    pub fn get_bytes(&mut self, n: usize) -> io::Result<Vec<u8>> {
        if (n as u64) << 3 > self.available()? {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("get_bytes({n}): out of bounds bytes"),
            ));
        }

        let mut buf = vec![0u8; n];
        self.bs.read_bytes(&mut buf)?;
        Ok(buf)
    }

    #[inline(always)]
    pub fn seek(&mut self, offset: i64) -> io::Result<u64> {
        if (offset < 0 && self.position()? as i64 + offset >= 0)
            || (offset >= 0 && self.available()? as i64 >= offset)
        {
            return self.bs.seek_bits(SeekFrom::Current(offset));
        }

        Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "seek({}): out of bounds bits at {}",
                offset,
                self.position()?
            ),
        ))
    }

    #[inline(always)]
    pub fn byte_align(&mut self) {
        self.bs.byte_align();
    }

    #[inline(always)]
    pub fn available(&mut self) -> io::Result<u64> {
        self.bs
            .position_in_bits()
            .map(|pos| self.len.saturating_sub(pos))
    }

    #[inline(always)]
    pub fn skip_n(&mut self, n: u32) -> io::Result<()> {
        if n as u64 > self.available()? {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "skip_n: out of bounds bits",
            ));
        }

        self.bs.skip(n)
    }

    #[inline(always)]
    pub fn position(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits()
    }
}

impl<'a> BsIoSliceReader<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        let len = buf.len() as u64;
        let read = io::Cursor::new(buf);

        Self::new(read, len)
    }
}

impl Default for BsIoSliceReader<'_> {
    fn default() -> Self {
        Self::from_slice(&[])
    }
}
