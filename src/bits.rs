//! MSB-first bit streams used by the picture table.

use crate::error::DecodeError;

pub struct BitReader<'a> {
    data: &'a [u8],
    bit: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit: 0 }
    }

    pub fn read(&mut self, width: u32) -> Result<u32, DecodeError> {
        debug_assert!(width <= 32);
        if self.bit + width as usize > self.data.len() * 8 {
            return Err(DecodeError::BitUnderrun);
        }
        let mut value = 0u32;
        for _ in 0..width {
            let byte = self.data[self.bit / 8];
            let bit = (byte >> (7 - (self.bit % 8))) & 1;
            value = (value << 1) | bit as u32;
            self.bit += 1;
        }
        Ok(value)
    }

    /// Reads a two's-complement value of `width` bits.
    pub fn read_signed(&mut self, width: u32) -> Result<i32, DecodeError> {
        let raw = self.read(width)?;
        let shift = 32 - width;
        Ok(((raw << shift) as i32) >> shift)
    }

    /// Bytes consumed once the stream is aligned to the next byte.
    pub fn aligned_len(&self) -> usize {
        self.bit.div_ceil(8)
    }
}

#[derive(Default)]
pub struct BitWriter {
    data: Vec<u8>,
    bit: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, value: u32, width: u32) {
        for i in (0..width).rev() {
            if self.bit % 8 == 0 {
                self.data.push(0);
            }
            let bit = ((value >> i) & 1) as u8;
            let last = self.data.len() - 1;
            self.data[last] |= bit << (7 - (self.bit % 8));
            self.bit += 1;
        }
    }

    pub fn write_signed(&mut self, value: i32, width: u32) {
        let mask = if width == 32 { u32::MAX } else { (1 << width) - 1 };
        self.write(value as u32 & mask, width);
    }

    /// The written bytes, zero-padded to a byte boundary.
    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}
