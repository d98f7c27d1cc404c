// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BitWriterError {
    #[error("invalid bit count {0}")]
    InvalidBitCount(usize),
    #[error("invalid starting bit offset {0}")]
    InvalidBitOffset(u8),
    #[error("buffer exhausted: {requested} bits requested, {available} available")]
    BufferExhausted { requested: usize, available: usize },
    #[error("value increment caused value overflow")]
    Overflow,
}

pub type BitWriterResult<T> = std::result::Result<T, BitWriterError>;

/// Largest write [`BitWriter::put_bits`] performs without splitting. Together
/// with a starting bit offset of at most 7 it always fits one `u32`.
const MAX_UNSPLIT_BITS: usize = 24;

/// An MSB-first bit writer over a caller-owned byte window.
///
/// The writer never allocates and never writes past the window: every write
/// is checked up front and rejected as a whole with
/// [`BitWriterError::BufferExhausted`] if it does not fit. Bits of the first
/// byte that precede the starting bit offset are preserved.
pub struct BitWriter<'a> {
    buf: &'a mut [u8],
    /// Bit position in `buf[0]` at which writing started.
    start: usize,
    /// Absolute bit position of the next bit to write.
    pos: usize,
}

impl<'a> BitWriter<'a> {
    pub fn new(buf: &'a mut [u8], bit_offset: u8) -> BitWriterResult<Self> {
        if bit_offset > 7 {
            return Err(BitWriterError::InvalidBitOffset(bit_offset));
        }

        // The offset points into the first byte, so it needs one.
        if bit_offset > 0 && buf.is_empty() {
            return Err(BitWriterError::BufferExhausted {
                requested: usize::from(bit_offset),
                available: 0,
            });
        }

        Ok(Self {
            buf,
            start: usize::from(bit_offset),
            pos: usize::from(bit_offset),
        })
    }

    /// Rewinds the cursor to the start of the window.
    pub fn reset(&mut self) {
        self.pos = self.start;
    }

    /// Returns the number of bits written since the writer's start.
    pub fn bit_offset(&self) -> usize {
        self.pos - self.start
    }

    /// Returns `true` if next bits will be aligned to 8
    pub fn byte_aligned(&self) -> bool {
        self.pos % 8 == 0
    }

    /// Number of bytes of the window touched so far, including a partially
    /// written last byte.
    pub fn bytes_used(&self) -> usize {
        self.pos.div_ceil(8)
    }

    /// Bits that can still be written before the window is exhausted.
    pub fn remaining_bits(&self) -> usize {
        (self.buf.len() * 8).saturating_sub(self.pos)
    }

    fn ensure(&self, bits: usize) -> BitWriterResult<()> {
        let available = self.remaining_bits();
        if bits > available {
            return Err(BitWriterError::BufferExhausted {
                requested: bits,
                available,
            });
        }

        Ok(())
    }

    /// Writes the low `bits` bits of `value`, most significant first. Corresponds to `f(n)` and
    /// `u(n)` in the H.265 spec.
    pub fn put_bits<T: Into<u32>>(&mut self, bits: usize, value: T) -> BitWriterResult<()> {
        let value = value.into();

        if bits > 32 {
            return Err(BitWriterError::InvalidBitCount(bits));
        }
        self.ensure(bits)?;

        if bits > MAX_UNSPLIT_BITS {
            // High bits go first.
            self.put_bits_unchecked(bits - 16, value >> 16);
            self.put_bits_unchecked(16, value & 0xffff);
        } else {
            self.put_bits_unchecked(bits, value);
        }

        Ok(())
    }

    /// Writes at most [`MAX_UNSPLIT_BITS`] bits. Capacity must have been checked.
    fn put_bits_unchecked(&mut self, bits: usize, value: u32) {
        if bits == 0 {
            return;
        }

        let byte = self.pos / 8;
        let shift = self.pos % 8;
        let value = value & ((1u32 << bits) - 1);
        let code = (value << (32 - bits - shift)).to_be_bytes();

        // Keep the bits already written in the current byte.
        self.buf[byte] = (self.buf[byte] & !(0xffu8 >> shift)) | code[0];
        let touched = (shift + bits).div_ceil(8);
        self.buf[byte + 1..byte + touched].copy_from_slice(&code[1..touched]);

        self.pos += bits;
    }

    /// Writes a single bit.
    pub fn put_bit(&mut self, bit: bool) -> BitWriterResult<()> {
        self.ensure(1)?;

        let byte = self.pos / 8;
        let shift = self.pos % 8;
        self.buf[byte] = (self.buf[byte] & !(0xffu8 >> shift)) | ((bit as u8) << (7 - shift));
        self.pos += 1;

        Ok(())
    }

    /// Writes an unsigned integer in exponential golomb format.
    /// Corresponds to `ue(v)` in the H.265 spec.
    pub fn put_ue<T: Into<u32>>(&mut self, value: T) -> BitWriterResult<()> {
        let value = value.into();

        if value == 0 {
            return self.put_bit(true);
        }

        let value = value.checked_add(1).ok_or(BitWriterError::Overflow)?;
        let bits = 32 - value.leading_zeros() as usize;
        self.ensure(2 * bits - 1)?;

        self.put_bits(bits - 1, 0u32)?;
        self.put_bits(bits, value)
    }

    /// Writes a signed integer in exponential golomb format.
    /// Corresponds to `se(v)` in the H.265 spec.
    pub fn put_se<T: Into<i32>>(&mut self, value: T) -> BitWriterResult<()> {
        let value: i32 = value.into();
        let doubled = value
            .unsigned_abs()
            .checked_mul(2)
            .ok_or(BitWriterError::Overflow)?;

        if value > 0 {
            self.put_ue(doubled - 1)
        } else {
            self.put_ue(doubled)
        }
    }

    /// Writes the RBSP stop bit followed by zero bits up to the next byte
    /// boundary. With `check_aligned` set an already aligned writer is left
    /// untouched.
    pub fn put_trailing_bits(&mut self, check_aligned: bool) -> BitWriterResult<()> {
        if check_aligned && self.byte_aligned() {
            return Ok(());
        }

        let padding = 7 - self.pos % 8;
        self.ensure(1 + padding)?;

        self.put_bit(true)?;
        self.put_bits(padding, 0u32)
    }
}

/// A minimal MSB-first reader used to check what [`BitWriter`] produced.
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    /// Absolute position of the next unread bit.
    position: usize,
}

#[cfg(test)]
impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Read a single bit from the stream.
    pub fn read_bit(&mut self) -> Result<bool, String> {
        Ok(self.read_bits::<u32>(1)? == 1)
    }

    /// Read up to 32 bits from the stream.
    pub fn read_bits<U: TryFrom<u32>>(&mut self, num_bits: usize) -> Result<U, String> {
        if num_bits > 32 {
            return Err(format!("more than 32 ({}) bits were requested", num_bits));
        }

        if self.position + num_bits > self.data.len() * 8 {
            return Err("reader ran out of bits".into());
        }

        let mut out = 0u64;
        for _ in 0..num_bits {
            let byte = self.data[self.position / 8];
            let bit = (byte >> (7 - self.position % 8)) & 1;
            out = (out << 1) | u64::from(bit);
            self.position += 1;
        }

        U::try_from(out as u32).map_err(|_| "conversion error".into())
    }

    /// Reads an Unsigned Exponential golomb coding number from the next bytes in the
    /// bitstream.
    pub fn read_ue<U: TryFrom<u32>>(&mut self) -> Result<U, String> {
        let mut num_bits = 0;

        while self.read_bits::<u32>(1)? == 0 {
            num_bits += 1;
            if num_bits > 31 {
                return Err("invalid stream".into());
            }
        }

        let value = ((1u64 << num_bits) - 1) + u64::from(self.read_bits::<u32>(num_bits)?);
        let value = u32::try_from(value).map_err(|_| String::from("read number cannot fit in 32 bits"))?;

        U::try_from(value).map_err(|_| "conversion error".into())
    }

    /// Reads a signed exponential golomb coding number.
    pub fn read_se<U: TryFrom<i32>>(&mut self) -> Result<U, String> {
        let ue = i64::from(self.read_ue::<u32>()?);

        let value = if ue % 2 == 0 { -(ue / 2) } else { ue / 2 + 1 };

        U::try_from(value as i32).map_err(|_| String::from("Conversion error"))
    }

    /// Skip `num_bits` bits from the stream.
    pub fn skip_bits(&mut self, num_bits: usize) -> Result<(), String> {
        if self.position + num_bits > self.data.len() * 8 {
            return Err("reader ran out of bits".into());
        }
        self.position += num_bits;
        Ok(())
    }

    /// Return the position of this bitstream in bits.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn byte_aligned(&self) -> bool {
        self.position % 8 == 0
    }
}
