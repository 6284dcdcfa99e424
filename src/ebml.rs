//!
//! EBML variable-length integers and primitive element readers
//!
//! https://www.rfc-editor.org/rfc/rfc8794.html
//!
use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// maximum VINT length in octets
pub const MAX_VINT_LENGTH: usize = 8;

///
/// Octet cursor over an immutable EBML buffer
///
#[derive(Debug, Clone)]
pub struct EbmlReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> EbmlReader<'a> {
    pub fn new(data: &'a [u8]) -> EbmlReader<'a> {
        EbmlReader { data, pos: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    #[inline]
    fn truncated(&self, context: &'static str) -> Error {
        Error::TruncatedInput {
            context,
            offset: self.pos,
        }
    }

    pub fn read_octet(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| self.truncated("octet"))?;
        self.pos += 1;
        Ok(b)
    }

    /// borrow the next `len` octets and advance past them
    pub fn read_bytes(&mut self, len: usize, context: &'static str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(self.truncated(context));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len, "element body").map(|_| ())
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        let buf = self.read_bytes(2, "16-bit integer")?;
        Ok(BigEndian::read_i16(buf))
    }

    /// variable length coded integer, return (value, length)
    fn read_vint_raw(&mut self, keep_marker: bool) -> Result<(u64, usize)> {
        let b0 = self.read_octet()?;
        let lzcnt = b0.leading_zeros() as usize;
        if lzcnt >= MAX_VINT_LENGTH {
            return Err(Error::mismatch(
                "variable-length integer",
                "a length marker in the first octet",
                "0x00",
            ));
        }
        let length = lzcnt + 1;
        let mut value = if keep_marker {
            b0 as u64
        } else {
            (b0 as u64) & ((1 << (7 - lzcnt)) - 1)
        };
        if self.remaining() < lzcnt {
            return Err(self.truncated("variable-length integer"));
        }
        for _ in 0..lzcnt {
            value = (value << 8) | self.read_octet()? as u64;
        }
        Ok((value, length))
    }

    /// unsigned VINT, marker bit removed
    pub fn read_vint(&mut self) -> Result<(u64, usize)> {
        self.read_vint_raw(false)
    }

    /// Element ID: the marker bit is part of the ID
    pub fn read_element_id(&mut self) -> Result<u64> {
        let (id, _) = self.read_vint_raw(true)?;
        Ok(id)
    }

    /// Element data size, `None` for the reserved "unknown size" value
    pub fn read_element_size(&mut self) -> Result<Option<u64>> {
        let (value, length) = self.read_vint()?;
        if value == unknown_size(length) {
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// signed VINT (EBML lacing deltas), return (value, length)
    pub fn read_signed_vint(&mut self) -> Result<(i64, usize)> {
        let (value, length) = self.read_vint()?;
        Ok((value as i64 - signed_bias(length), length))
    }

    /// Unsigned integer element body (0-8 octets)
    pub fn read_uint(&mut self, len: usize) -> Result<u64> {
        if len > 8 {
            return Err(Error::mismatch("unsigned integer element", "at most 8 octets", len));
        }
        let buf = self.read_bytes(len, "unsigned integer element")?;
        Ok(buf.iter().fold(0u64, |acc, &b| acc << 8 | b as u64))
    }

    /// String element body, trailing NUL padding is dropped
    pub fn read_string(&mut self, len: usize) -> Result<String> {
        let buf = self.read_bytes(len, "string element")?;
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
    }
}

/// all value bits set: reserved "unknown size"
#[inline]
pub fn unknown_size(length: usize) -> u64 {
    (1u64 << (7 * length)) - 1
}

/// 2^(7*length-1) - 1
#[inline]
pub fn signed_bias(length: usize) -> i64 {
    (1i64 << (7 * length - 1)) - 1
}

/// shortest VINT length able to carry `value` without colliding with "unknown size"
pub fn vint_length(value: u64) -> usize {
    (1..=MAX_VINT_LENGTH)
        .find(|&len| value < unknown_size(len))
        .unwrap_or(MAX_VINT_LENGTH)
}

/// encode an unsigned VINT on exactly `length` octets
pub fn encode_vint(value: u64, length: usize) -> Result<Vec<u8>> {
    if !(1..=MAX_VINT_LENGTH).contains(&length) {
        return Err(Error::ConstraintViolation("VINT length must be 1 to 8 octets"));
    }
    if value > unknown_size(length) {
        return Err(Error::ConstraintViolation("value does not fit in the VINT length"));
    }
    let mut buf = [0; 8];
    BigEndian::write_u64(&mut buf, value | 1 << (7 * length));
    Ok(buf[8 - length..].to_vec())
}

/// encode a signed VINT (EBML lacing delta) on exactly `length` octets
pub fn encode_signed_vint(value: i64, length: usize) -> Result<Vec<u8>> {
    if !(1..=MAX_VINT_LENGTH).contains(&length) {
        return Err(Error::ConstraintViolation("VINT length must be 1 to 8 octets"));
    }
    let biased = value
        .checked_add(signed_bias(length))
        .filter(|&b| b >= 0)
        .ok_or(Error::ConstraintViolation("value does not fit in the VINT length"))?;
    encode_vint(biased as u64, length)
}

/// encode an Element ID (the marker is already part of the ID)
pub fn encode_element_id(id: u64) -> Result<Vec<u8>> {
    let length = 8 - (id.leading_zeros() / 8) as usize;
    if length == 0 || length > 4 {
        return Err(Error::ConstraintViolation("Element IDs are 1 to 4 octets"));
    }
    let mut buf = [0; 8];
    BigEndian::write_u64(&mut buf, id);
    Ok(buf[8 - length..].to_vec())
}
