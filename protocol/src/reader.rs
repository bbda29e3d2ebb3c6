use crate::STRING_TERMINATOR;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("unexpected end of payload")]
    UnexpectedEnd,
    #[error("string missing its terminator byte")]
    UnterminatedString,
    #[error("byte access attempted while in bit mode")]
    ExpectedByteMode,
    #[error("bit access attempted while in byte mode")]
    ExpectedBitMode,
    #[error("bit reads take 1..=32 bits, got {0}")]
    BitCount(u32),
}

// Positional reader for a single frame payload. Byte reads advance the byte
// cursor; bit mode mirrors the writer, consuming from the most significant
// bit of each byte left to right.
pub struct FrameReader<'a> {
    data: &'a [u8],
    position: usize,
    bit_position: usize,
    in_bit_mode: bool,
}

impl<'a> FrameReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        FrameReader {
            data,
            position: 0,
            bit_position: 0,
            in_bit_mode: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], ReadError> {
        if self.in_bit_mode {
            return Err(ReadError::ExpectedByteMode);
        }
        if self.remaining() < count {
            return Err(ReadError::UnexpectedEnd);
        }
        let slice = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    pub fn skip(&mut self, count: usize) -> Result<(), ReadError> {
        self.take(count).map(|_| ())
    }

    pub fn get_u8(&mut self) -> Result<u8, ReadError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u8_add(&mut self) -> Result<u8, ReadError> {
        Ok(self.get_u8()?.wrapping_sub(128))
    }

    pub fn get_u8_neg(&mut self) -> Result<u8, ReadError> {
        Ok(self.get_u8()?.wrapping_neg())
    }

    pub fn get_u8_sub(&mut self) -> Result<u8, ReadError> {
        Ok(128u8.wrapping_sub(self.get_u8()?))
    }

    pub fn get_u16(&mut self) -> Result<u16, ReadError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn get_u16_le(&mut self) -> Result<u16, ReadError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32, ReadError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64, ReadError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(raw))
    }

    pub fn get_string(&mut self) -> Result<String, ReadError> {
        if self.in_bit_mode {
            return Err(ReadError::ExpectedByteMode);
        }
        let rest = &self.data[self.position..];
        let end = rest
            .iter()
            .position(|&b| b == STRING_TERMINATOR)
            .ok_or(ReadError::UnterminatedString)?;
        self.position += end + 1;
        Ok(String::from_utf8_lossy(&rest[..end]).into_owned())
    }

    pub fn bit_mode(&mut self) -> Result<(), ReadError> {
        if self.in_bit_mode {
            return Err(ReadError::ExpectedByteMode);
        }
        self.bit_position = self.position * 8;
        self.in_bit_mode = true;
        Ok(())
    }

    pub fn byte_mode(&mut self) -> Result<(), ReadError> {
        if !self.in_bit_mode {
            return Err(ReadError::ExpectedBitMode);
        }
        self.position = (self.bit_position + 7) / 8;
        self.in_bit_mode = false;
        Ok(())
    }

    pub fn get_bits(&mut self, count: u32) -> Result<u32, ReadError> {
        if !self.in_bit_mode {
            return Err(ReadError::ExpectedBitMode);
        }
        if count == 0 || count > 32 {
            return Err(ReadError::BitCount(count));
        }
        let mut value = 0u32;
        for _ in 0..count {
            let byte_pos = self.bit_position >> 3;
            if byte_pos >= self.data.len() {
                return Err(ReadError::UnexpectedEnd);
            }
            let bit = (self.data[byte_pos] >> (7 - (self.bit_position & 7))) & 1;
            value = (value << 1) | bit as u32;
            self.bit_position += 1;
        }
        Ok(value)
    }
}
