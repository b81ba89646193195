// MIT License - Copyright (c) 2026 Peter Wright
// MSB-first bit cursor over frame bytes

use crate::error::FrameError;

/// Reads bit fields MSB-first from a byte slice.
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read `width` bits (at most 64) as an unsigned integer.
    pub fn read(&mut self, width: usize) -> Result<u64, FrameError> {
        if width > 64 {
            return Err(FrameError::InvalidValue {
                field: "bits".to_string(),
                details: format!("bit width {width} exceeds 64"),
            });
        }
        if self.pos + width > self.data.len() * 8 {
            return Err(FrameError::Truncated {
                needed: (self.pos + width).div_ceil(8),
                available: self.data.len(),
            });
        }
        let mut value = 0u64;
        for _ in 0..width {
            let byte = self.data[self.pos / 8];
            let bit = (byte >> (7 - (self.pos % 8))) & 1;
            value = (value << 1) | u64::from(bit);
            self.pos += 1;
        }
        Ok(value)
    }

    pub fn read_flag(&mut self) -> Result<bool, FrameError> {
        Ok(self.read(1)? == 1)
    }

    pub fn skip(&mut self, width: usize) -> Result<(), FrameError> {
        self.read_wide(width).map(|_| ())
    }

    fn read_wide(&mut self, mut width: usize) -> Result<(), FrameError> {
        while width > 0 {
            let chunk = width.min(64);
            self.read(chunk)?;
            width -= chunk;
        }
        Ok(())
    }

    /// Bits consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Writes bit fields MSB-first into a growing byte buffer.
#[derive(Default)]
pub struct BitWriter {
    data: Vec<u8>,
    pos: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the low `width` bits of `value`. Fails if the value does not fit.
    pub fn write(&mut self, value: u64, width: usize) -> Result<(), FrameError> {
        if width < 64 && value >> width != 0 {
            return Err(FrameError::InvalidValue {
                field: "bits".to_string(),
                details: format!("value {value} does not fit in {width} bits"),
            });
        }
        for i in (0..width).rev() {
            if self.pos % 8 == 0 {
                self.data.push(0);
            }
            let bit = ((value >> i) & 1) as u8;
            let last = self.data.len() - 1;
            self.data[last] |= bit << (7 - (self.pos % 8));
            self.pos += 1;
        }
        Ok(())
    }

    pub fn write_flag(&mut self, flag: bool) -> Result<(), FrameError> {
        self.write(u64::from(flag), 1)
    }

    pub fn pad(&mut self, mut width: usize) -> Result<(), FrameError> {
        while width > 0 {
            let chunk = width.min(64);
            self.write(0, chunk)?;
            width -= chunk;
        }
        Ok(())
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns the written bytes. A partial final byte is zero-filled.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Reverse the whole bit sequence of a byte string, so bit 0 of the result
/// is the least significant bit of the last input byte.
pub fn swap_bits(data: &[u8]) -> Vec<u8> {
    data.iter().rev().map(|b| b.reverse_bits()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_nibbles_msb_first() {
        let mut reader = BitReader::new(&[0xE2, 0x81]);
        assert_eq!(reader.read(4).unwrap(), 0xE);
        assert_eq!(reader.read(4).unwrap(), 0x2);
        assert!(reader.read_flag().unwrap());
        assert_eq!(reader.read(7).unwrap(), 1);
        assert!(reader.read(1).is_err());
    }

    #[test]
    fn test_write_spans_bytes() {
        let mut writer = BitWriter::new();
        writer.write(0x5, 4).unwrap();
        writer.write(0x1F, 6).unwrap();
        writer.pad(6).unwrap();
        assert_eq!(writer.position(), 16);
        assert_eq!(writer.into_bytes(), vec![0x50 | 0x07, 0xC0]);
    }

    #[test]
    fn test_write_rejects_overflow() {
        let mut writer = BitWriter::new();
        assert!(writer.write(4, 2).is_err());
    }

    #[test]
    fn test_swap_bits() {
        assert_eq!(swap_bits(&[0x00, 0x01]), vec![0x80, 0x00]);
        assert_eq!(swap_bits(&[0x04, 0x00]), vec![0x00, 0x20]);
    }
}
