//! Bitstream builders shared by the integration tests
#![allow(dead_code)]

use vp9parser::ebml;

/// MSB-first bit writer for uncompressed headers
#[derive(Debug, Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    nbits: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_bit(&mut self, bit: bool) -> &mut Self {
        if self.nbits % 8 == 0 {
            self.buf.push(0);
        }
        if bit {
            let last = self.buf.len() - 1;
            self.buf[last] |= 0x80 >> (self.nbits % 8);
        }
        self.nbits += 1;
        self
    }

    pub fn put_bits(&mut self, value: u32, n: usize) -> &mut Self {
        for i in (0..n).rev() {
            self.put_bit((value >> i) & 1 != 0);
        }
        self
    }

    /// zero bits up to the next byte boundary
    pub fn align(&mut self) -> &mut Self {
        while self.nbits % 8 != 0 {
            self.put_bit(false);
        }
        self
    }

    pub fn bit_len(&self) -> usize {
        self.nbits
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Boolean encoder producing streams the crate's BoolDecoder reads back
#[derive(Debug)]
pub struct BoolEncoder {
    buf: Vec<u8>,
    low: u32,
    range: u32,
    count: i32,
}

impl BoolEncoder {
    /// starts with the zero marker bit
    pub fn new() -> Self {
        let mut enc = BoolEncoder {
            buf: Vec::new(),
            low: 0,
            range: 255,
            count: -24,
        };
        enc.put_bool(false, 128);
        enc
    }

    pub fn put_bool(&mut self, bit: bool, probability: u8) {
        let split = 1 + (((self.range - 1) * probability as u32) >> 8);
        if bit {
            self.low = self.low.wrapping_add(split);
            self.range -= split;
        } else {
            self.range = split;
        }

        let mut shift = self.range.leading_zeros() as i32 - 24;
        self.range <<= shift;
        self.count += shift;
        if self.count >= 0 {
            let offset = shift - self.count;
            if (self.low << (offset - 1)) & 0x8000_0000 != 0 {
                self.propagate_carry();
            }
            self.buf.push(((self.low >> (24 - offset)) & 0xff) as u8);
            self.low = (self.low << offset) & 0x00ff_ffff;
            shift = self.count;
            self.count -= 8;
        }
        self.low <<= shift;
    }

    fn propagate_carry(&mut self) {
        for byte in self.buf.iter_mut().rev() {
            if *byte == 0xff {
                *byte = 0;
            } else {
                *byte += 1;
                return;
            }
        }
    }

    /// L(n)
    pub fn put_literal(&mut self, value: u32, n: usize) {
        for i in (0..n).rev() {
            self.put_bool((value >> i) & 1 != 0, 128);
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        for _ in 0..32 {
            self.put_bool(false, 128);
        }
        self.buf
    }
}

/// EBML element with a minimal-length size field
pub fn element(id: u64, payload: &[u8]) -> Vec<u8> {
    let size = payload.len() as u64;
    let mut out = ebml::encode_element_id(id).unwrap();
    out.extend(ebml::encode_vint(size, ebml::vint_length(size)).unwrap());
    out.extend_from_slice(payload);
    out
}

pub fn uint_element(id: u64, value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take(7).take_while(|&&b| b == 0).count();
    element(id, &bytes[skip..])
}
