use crate::cipher::Isaac;
use crate::STRING_TERMINATOR;
use thiserror::Error;

pub const DEFAULT_FRAME_CAPACITY: usize = 4096;

const BIT_MASK: [u32; 33] = [
    0,
    0x1,
    0x3,
    0x7,
    0xf,
    0x1f,
    0x3f,
    0x7f,
    0xff,
    0x1ff,
    0x3ff,
    0x7ff,
    0xfff,
    0x1fff,
    0x3fff,
    0x7fff,
    0xffff,
    0x1ffff,
    0x3ffff,
    0x7ffff,
    0xfffff,
    0x1fffff,
    0x3fffff,
    0x7fffff,
    0xffffff,
    0x1ffffff,
    0x3ffffff,
    0x7ffffff,
    0xfffffff,
    0x1fffffff,
    0x3fffffff,
    0x7fffffff,
    0xffffffff,
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("write exceeds frame capacity of {capacity} bytes")]
    Overflow { capacity: usize },
    #[error("byte access attempted while in bit mode")]
    ExpectedByteMode,
    #[error("bit access attempted while in byte mode")]
    ExpectedBitMode,
    #[error("bit writes take 1..=32 bits, got {0}")]
    BitCount(u32),
    #[error("a sized frame is already open")]
    FrameAlreadyOpen,
    #[error("no sized frame open to finish")]
    NoOpenFrame,
    #[error("payload of {length} bytes does not fit the length prefix")]
    PayloadTooLong { length: usize },
}

#[derive(Clone, Copy)]
enum LengthWidth {
    Byte,
    Short,
}

impl LengthWidth {
    fn bytes(self) -> usize {
        match self {
            LengthWidth::Byte => 1,
            LengthWidth::Short => 2,
        }
    }
}

struct OpenFrame {
    length_at: usize,
    width: LengthWidth,
}

// Frame writer with a dual byte/bit cursor. Byte writes append at the end of
// the buffer; bit writes pack from the most significant unwritten bit, left
// to right. The two cursors reconcile on an explicit mode switch, padding the
// trailing partial byte with zero bits. The raw buffer is never handed out
// for mutation.
pub struct FrameBuilder {
    buffer: Vec<u8>,
    capacity: usize,
    bit_position: usize,
    in_bit_mode: bool,
    open: Option<OpenFrame>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FRAME_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        FrameBuilder {
            buffer: Vec::with_capacity(capacity.min(256)),
            capacity,
            bit_position: 0,
            in_bit_mode: false,
            open: None,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    // Fixed frame: obfuscated opcode only, payload length known to both ends.
    pub fn start_fixed(&mut self, opcode: u8, cipher: &mut Isaac) -> Result<(), FrameError> {
        self.put_u8(opcode.wrapping_add(cipher.next_key() as u8))
    }

    pub fn start_byte_sized(&mut self, opcode: u8, cipher: &mut Isaac) -> Result<(), FrameError> {
        self.start_sized(opcode, cipher, LengthWidth::Byte)
    }

    pub fn start_short_sized(&mut self, opcode: u8, cipher: &mut Isaac) -> Result<(), FrameError> {
        self.start_sized(opcode, cipher, LengthWidth::Short)
    }

    fn start_sized(
        &mut self,
        opcode: u8,
        cipher: &mut Isaac,
        width: LengthWidth,
    ) -> Result<(), FrameError> {
        if self.open.is_some() {
            return Err(FrameError::FrameAlreadyOpen);
        }
        self.put_u8(opcode.wrapping_add(cipher.next_key() as u8))?;
        let length_at = self.buffer.len();
        for _ in 0..width.bytes() {
            self.put_u8(0)?;
        }
        self.open = Some(OpenFrame { length_at, width });
        Ok(())
    }

    // Backpatches the reserved length slot with the payload size accumulated
    // since the frame was opened.
    pub fn finish_sized(&mut self) -> Result<(), FrameError> {
        if self.in_bit_mode {
            return Err(FrameError::ExpectedByteMode);
        }
        let open = self.open.take().ok_or(FrameError::NoOpenFrame)?;
        let length = self.buffer.len() - open.length_at - open.width.bytes();
        match open.width {
            LengthWidth::Byte => {
                if length > u8::MAX as usize {
                    return Err(FrameError::PayloadTooLong { length });
                }
                self.buffer[open.length_at] = length as u8;
            }
            LengthWidth::Short => {
                if length > u16::MAX as usize {
                    return Err(FrameError::PayloadTooLong { length });
                }
                self.buffer[open.length_at] = (length >> 8) as u8;
                self.buffer[open.length_at + 1] = length as u8;
            }
        }
        Ok(())
    }

    fn ensure(&self, extra: usize) -> Result<(), FrameError> {
        if self.in_bit_mode {
            return Err(FrameError::ExpectedByteMode);
        }
        if self.buffer.len() + extra > self.capacity {
            return Err(FrameError::Overflow {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) -> Result<(), FrameError> {
        self.ensure(1)?;
        self.buffer.push(value);
        Ok(())
    }

    pub fn put_u8_add(&mut self, value: u8) -> Result<(), FrameError> {
        self.put_u8(value.wrapping_add(128))
    }

    pub fn put_u8_neg(&mut self, value: u8) -> Result<(), FrameError> {
        self.put_u8(value.wrapping_neg())
    }

    pub fn put_u8_sub(&mut self, value: u8) -> Result<(), FrameError> {
        self.put_u8(128u8.wrapping_sub(value))
    }

    pub fn put_u16(&mut self, value: u16) -> Result<(), FrameError> {
        self.ensure(2)?;
        self.buffer.push((value >> 8) as u8);
        self.buffer.push(value as u8);
        Ok(())
    }

    pub fn put_u16_le(&mut self, value: u16) -> Result<(), FrameError> {
        self.ensure(2)?;
        self.buffer.push(value as u8);
        self.buffer.push((value >> 8) as u8);
        Ok(())
    }

    pub fn put_u32(&mut self, value: u32) -> Result<(), FrameError> {
        self.ensure(4)?;
        self.buffer.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn put_u64(&mut self, value: u64) -> Result<(), FrameError> {
        self.ensure(8)?;
        self.buffer.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        self.ensure(bytes.len())?;
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    pub fn put_string(&mut self, value: &str) -> Result<(), FrameError> {
        self.ensure(value.len() + 1)?;
        self.buffer.extend_from_slice(value.as_bytes());
        self.buffer.push(STRING_TERMINATOR);
        Ok(())
    }

    pub fn bit_mode(&mut self) -> Result<(), FrameError> {
        if self.in_bit_mode {
            return Err(FrameError::ExpectedByteMode);
        }
        self.bit_position = self.buffer.len() * 8;
        self.in_bit_mode = true;
        Ok(())
    }

    // Re-aligns to the next byte boundary; unwritten bits in the trailing
    // byte stay zero.
    pub fn byte_mode(&mut self) -> Result<(), FrameError> {
        if !self.in_bit_mode {
            return Err(FrameError::ExpectedBitMode);
        }
        let aligned = (self.bit_position + 7) / 8;
        self.buffer.resize(aligned, 0);
        self.in_bit_mode = false;
        Ok(())
    }

    pub fn put_bit(&mut self, flag: bool) -> Result<(), FrameError> {
        self.put_bits(1, flag as u32)
    }

    pub fn put_bits(&mut self, count: u32, value: u32) -> Result<(), FrameError> {
        if !self.in_bit_mode {
            return Err(FrameError::ExpectedBitMode);
        }
        if count == 0 || count > 32 {
            return Err(FrameError::BitCount(count));
        }
        let mut count = count as usize;
        let mut byte_pos = self.bit_position >> 3;
        let mut bit_offset = 8 - (self.bit_position & 7);
        self.bit_position += count;

        let needed = (self.bit_position + 7) / 8;
        if needed > self.capacity {
            return Err(FrameError::Overflow {
                capacity: self.capacity,
            });
        }
        if self.buffer.len() < needed {
            self.buffer.resize(needed, 0);
        }

        while count > bit_offset {
            let mask = BIT_MASK[bit_offset];
            self.buffer[byte_pos] &= !(mask as u8);
            self.buffer[byte_pos] |= ((value >> (count - bit_offset)) & mask) as u8;
            byte_pos += 1;
            count -= bit_offset;
            bit_offset = 8;
        }
        let mask = BIT_MASK[count];
        if count == bit_offset {
            self.buffer[byte_pos] &= !(mask as u8);
            self.buffer[byte_pos] |= (value & mask) as u8;
        } else {
            self.buffer[byte_pos] &= !((mask << (bit_offset - count)) as u8);
            self.buffer[byte_pos] |= ((value & mask) << (bit_offset - count)) as u8;
        }
        Ok(())
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}
