use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// numeric cast helper (u32 as T)
pub trait FromU32 {
    fn from_u32(v: u32) -> Self;
}

impl FromU32 for bool {
    #[inline]
    fn from_u32(v: u32) -> Self {
        v != 0
    }
}

macro_rules! impl_from_u32 {
    ($($ty:ty)*) => {
        $(
            impl FromU32 for $ty {
                #[inline]
                fn from_u32(v: u32) -> $ty {
                    v as $ty
                }
            }
        )*
    }
}

impl_from_u32!(u8 u16 u32 u64 usize);

///
/// Bitwise reader (MSB first) over an immutable buffer
///
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bitpos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> BitReader<'a> {
        BitReader { data, bitpos: 0 }
    }

    #[inline]
    fn truncated(&self) -> Error {
        Error::TruncatedInput {
            context: "bitstream",
            offset: self.bitpos >> 3,
        }
    }

    /// read 1 bit
    pub fn read_bit(&mut self) -> Result<bool> {
        let byte = *self.data.get(self.bitpos >> 3).ok_or_else(|| self.truncated())?;
        let bit = (byte >> (7 - (self.bitpos & 7))) & 1;
        self.bitpos += 1;
        Ok(bit == 1)
    }

    /// f(n): read n-bits
    pub fn read_bits<T: FromU32>(&mut self, nbit: usize) -> Result<T> {
        assert!(nbit <= 32);
        if nbit > self.bits_remaining() {
            return Err(self.truncated());
        }
        let mut x: u32 = 0;
        for _ in 0..nbit {
            x = (x << 1) | self.read_bit()? as u32;
        }
        Ok(FromU32::from_u32(x))
    }

    /// s(n): n-bit magnitude followed by a sign bit
    pub fn read_signed(&mut self, nbit: usize) -> Result<i32> {
        let value = self.read_bits::<u32>(nbit)? as i32;
        if self.read_bit()? {
            Ok(-value)
        } else {
            Ok(value)
        }
    }

    /// f(8)
    pub fn read_u8(&mut self) -> Result<u8> {
        if self.is_aligned() {
            let byte = *self.data.get(self.bitpos >> 3).ok_or_else(|| self.truncated())?;
            self.bitpos += 8;
            return Ok(byte);
        }
        self.read_bits(8)
    }

    /// f(16)
    pub fn read_u16(&mut self) -> Result<u16> {
        if self.is_aligned() && self.bytes_remaining() >= 2 {
            let pos = self.bitpos >> 3;
            self.bitpos += 16;
            return Ok(BigEndian::read_u16(&self.data[pos..pos + 2]));
        }
        Ok((self.read_u8()? as u16) << 8 | self.read_u8()? as u16)
    }

    /// f(32)
    pub fn read_u32(&mut self) -> Result<u32> {
        if self.is_aligned() && self.bytes_remaining() >= 4 {
            let pos = self.bitpos >> 3;
            self.bitpos += 32;
            return Ok(BigEndian::read_u32(&self.data[pos..pos + 4]));
        }
        self.read_bits(32)
    }

    /// skip whole bytes, the cursor must sit on a byte boundary
    pub fn skip_bytes(&mut self, n: usize) -> Result<()> {
        debug_assert!(self.is_aligned());
        if n > self.bytes_remaining() {
            return Err(self.truncated());
        }
        self.bitpos += n * 8;
        Ok(())
    }

    #[inline]
    pub fn is_aligned(&self) -> bool {
        self.bitpos & 7 == 0
    }

    #[inline]
    pub fn position_in_bits(&self) -> usize {
        self.bitpos
    }

    /// byte offset of the next untouched byte
    #[inline]
    pub fn byte_position(&self) -> usize {
        (self.bitpos + 7) >> 3
    }

    #[inline]
    pub fn bits_remaining(&self) -> usize {
        self.data.len() * 8 - self.bitpos
    }

    /// whole bytes not yet touched by the cursor
    #[inline]
    pub fn bytes_remaining(&self) -> usize {
        self.data.len() - self.byte_position()
    }
}
