//! Little-endian bit packing for variable-width residuals.

use super::CodecError;

/// Maximum number of bits moved by a single `write`/`read`.
pub const MAX_BITS: usize = 32;

const BYTE_BITS: usize = 8;

/// Appends variable-width integers to a growable buffer.
#[derive(Debug, Default)]
pub struct BitWriter {
    buff: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buff: Vec::with_capacity(capacity),
            bits: 0,
        }
    }

    /// Write the low `bits` bits of `value`.
    pub fn write(&mut self, mut value: u32, mut bits: usize) -> Result<(), CodecError> {
        if bits > MAX_BITS {
            return Err(CodecError::BitWidthExceeded(bits));
        }
        if bits < MAX_BITS {
            value &= (1u32 << bits) - 1;
        }

        while bits > 0 {
            let offset = self.bits % BYTE_BITS;
            if offset == 0 {
                self.buff.push(0);
            }
            let room = BYTE_BITS - offset;
            let take = bits.min(room);
            let chunk = (value & ((1u32 << take) - 1)) as u8;
            if let Some(last) = self.buff.last_mut() {
                *last |= chunk << offset;
            }
            value = value.checked_shr(take as u32).unwrap_or(0);
            bits -= take;
            self.bits += take;
        }

        Ok(())
    }

    /// Write up to 64 bits, split into two 32-bit halves when needed.
    pub fn write_wide(&mut self, value: u64, bits: usize) -> Result<(), CodecError> {
        if bits <= MAX_BITS {
            return self.write(value as u32, bits);
        }
        self.write(value as u32, MAX_BITS)?;
        self.write((value >> MAX_BITS) as u32, bits - MAX_BITS)
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buff
    }
}

/// Reads integers written by [`BitWriter`] back out of a byte slice.
#[derive(Debug)]
pub struct BitReader<'a> {
    buff: &'a [u8],
    bits: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(buff: &'a [u8]) -> Self {
        Self { buff, bits: 0 }
    }

    #[inline]
    fn available(&self) -> usize {
        self.buff.len() * BYTE_BITS - self.bits
    }

    pub fn read(&mut self, mut bits: usize) -> Result<u32, CodecError> {
        if bits > MAX_BITS {
            return Err(CodecError::BitWidthExceeded(bits));
        }
        if self.available() < bits {
            return Err(CodecError::BufferOverflow {
                attempted: bits,
                available: self.available(),
            });
        }

        let mut output = 0u32;
        let mut filled = 0usize;
        while bits > 0 {
            let byte = self.buff[self.bits / BYTE_BITS] as u32;
            let offset = self.bits % BYTE_BITS;
            let take = bits.min(BYTE_BITS - offset);
            let chunk = (byte >> offset) & ((1u32 << take) - 1);
            output |= chunk << filled;
            filled += take;
            bits -= take;
            self.bits += take;
        }

        Ok(output)
    }

    pub fn read_wide(&mut self, bits: usize) -> Result<u64, CodecError> {
        if bits <= MAX_BITS {
            return Ok(self.read(bits)? as u64);
        }
        let low = self.read(MAX_BITS)? as u64;
        let high = self.read(bits - MAX_BITS)? as u64;
        Ok(low | (high << MAX_BITS))
    }
}
