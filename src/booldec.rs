//
// VP9 Bitstream & Decoding Process Specification, 9.2 "Boolean decoding process"
//
use crate::bitio::{BitReader, FromU32};
use crate::error::{Error, Result};

///
/// Range-coded boolean decoder layered on a BitReader
///
#[derive(Debug)]
pub struct BoolDecoder<'r, 'a> {
    br: &'r mut BitReader<'a>,
    value: u32,      // BoolValue
    range: u32,      // BoolRange
    max_bits: usize, // BoolMaxBits
}

impl<'r, 'a> BoolDecoder<'r, 'a> {
    /// init_bool(sz)
    pub fn new(br: &'r mut BitReader<'a>, size: usize) -> Result<BoolDecoder<'r, 'a>> {
        if size < 1 {
            return Err(Error::ConstraintViolation(
                "bool decoder requires at least one byte",
            ));
        }
        let value = br.read_u8()? as u32; // f(8)
        let mut bd = BoolDecoder {
            br,
            value,
            range: 255,
            max_bits: 8 * size - 8,
        };
        if bd.read_bool(128)? {
            return Err(Error::ConstraintViolation("bool decoder marker bit is set"));
        }
        Ok(bd)
    }

    /// read_bool(p)
    pub fn read_bool(&mut self, probability: u8) -> Result<bool> {
        let split = 1 + (((self.range - 1) * probability as u32) >> 8);
        let bit = if self.value < split {
            self.range = split;
            false
        } else {
            self.range -= split;
            self.value -= split;
            true
        };

        while self.range < 128 {
            let new_bit = if self.max_bits > 0 {
                self.max_bits -= 1;
                self.br.read_bit()?
            } else {
                false
            };
            self.range <<= 1;
            self.value = (self.value << 1) | new_bit as u32;
        }
        Ok(bit)
    }

    /// L(n): unsigned n-bit literal, MSB first
    pub fn read_literal<T: FromU32>(&mut self, n: usize) -> Result<T> {
        assert!(n <= 32);
        let mut x: u32 = 0;
        for _ in 0..n {
            x = (x << 1) | self.read_bool(128)? as u32;
        }
        Ok(FromU32::from_u32(x))
    }

    /// bits still owed to the underlying reader
    #[inline]
    pub fn max_bits(&self) -> usize {
        self.max_bits
    }

    /// exit_bool(): the unread part of the budget is padding and must be zero
    pub fn exit_bool(self) -> Result<()> {
        let padding = self.max_bits.min(self.br.bits_remaining());
        for _ in 0..padding {
            if self.br.read_bit()? {
                return Err(Error::ConstraintViolation(
                    "bool decoder padding is not zero",
                ));
            }
        }
        Ok(())
    }
}
