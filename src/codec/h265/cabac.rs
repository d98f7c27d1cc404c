// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! H.265 binary arithmetic encoder (9.3.4.3).
//!
//! The encoder borrows a [`BitWriter`] and keeps the coder registers private,
//! so the carry propagation state can only move through [`CabacEncoder::encode_bin`],
//! [`CabacEncoder::encode_bin_ep`], [`CabacEncoder::encode_bin_trm`] and
//! [`CabacEncoder::slice_finish`].

use crate::bitstream_utils::BitWriter;
use crate::bitstream_utils::BitWriterResult;

/// Table 9-52 – Specification of rangeTabLps depending on the values of pStateIdx and qRangeIdx
const RANGE_TAB_LPS: [[u8; 4]; 64] = [
    [128, 176, 208, 240],
    [128, 167, 197, 227],
    [128, 158, 187, 216],
    [123, 150, 178, 205],
    [116, 142, 169, 195],
    [111, 135, 160, 185],
    [105, 128, 152, 175],
    [100, 122, 144, 166],
    [95, 116, 137, 158],
    [90, 110, 130, 150],
    [85, 104, 123, 142],
    [81, 99, 117, 135],
    [77, 94, 111, 128],
    [73, 89, 105, 122],
    [69, 85, 100, 116],
    [66, 80, 95, 110],
    [62, 76, 90, 104],
    [59, 72, 86, 99],
    [56, 69, 81, 94],
    [53, 65, 77, 89],
    [51, 62, 73, 85],
    [48, 59, 69, 80],
    [46, 56, 66, 76],
    [43, 53, 63, 72],
    [41, 50, 59, 69],
    [39, 48, 56, 65],
    [37, 45, 54, 62],
    [35, 43, 51, 59],
    [33, 41, 48, 56],
    [32, 39, 46, 53],
    [30, 37, 43, 50],
    [29, 35, 41, 48],
    [27, 33, 39, 45],
    [26, 31, 37, 43],
    [24, 30, 35, 41],
    [23, 28, 33, 39],
    [22, 27, 32, 37],
    [21, 26, 30, 35],
    [20, 24, 29, 33],
    [19, 23, 27, 31],
    [18, 22, 26, 30],
    [17, 21, 25, 28],
    [16, 20, 23, 27],
    [15, 19, 22, 25],
    [14, 18, 21, 24],
    [14, 17, 20, 23],
    [13, 16, 19, 22],
    [12, 15, 18, 21],
    [12, 14, 17, 20],
    [11, 14, 16, 19],
    [11, 13, 15, 18],
    [10, 12, 15, 17],
    [10, 12, 14, 16],
    [9, 11, 13, 15],
    [9, 11, 12, 14],
    [8, 10, 12, 14],
    [8, 9, 11, 13],
    [7, 9, 11, 12],
    [7, 9, 10, 12],
    [7, 8, 10, 11],
    [6, 8, 9, 11],
    [6, 7, 9, 10],
    [6, 7, 8, 9],
    [2, 2, 2, 2],
];

/// Table 9-53 – State transition table, transIdxLps
const TRANS_IDX_LPS: [u8; 64] = [
    0, 0, 1, 2, 2, 4, 4, 5, 6, 7, 8, 9, 9, 11, 11, 12, 13, 13, 15, 15, 16, 16, 18, 18, 19, 19, 21,
    21, 22, 22, 23, 24, 24, 25, 26, 26, 27, 27, 28, 29, 29, 30, 30, 30, 31, 32, 32, 33, 33, 33, 34,
    34, 35, 35, 35, 36, 36, 36, 37, 37, 37, 38, 38, 63,
];

/// Table 9-53 – State transition table, transIdxMps
const TRANS_IDX_MPS: [u8; 64] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26,
    27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48, 49, 50,
    51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 62, 63,
];

/// A context variable: `pStateIdx` and `valMps` packed as `(pStateIdx << 1) | valMps`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CabacContext(u8);

impl CabacContext {
    pub fn new(state: u8, mps: bool) -> Self {
        Self(((state & 0x3f) << 1) | mps as u8)
    }

    /// Initializes a context from its `initValue` for the given `SliceQpY` (9.3.2.2).
    pub fn init(init_value: u8, slice_qp_y: i32) -> Self {
        let slope_idx = i32::from(init_value >> 4);
        let offset_idx = i32::from(init_value & 15);
        let m = slope_idx * 5 - 45;
        let n = (offset_idx << 3) - 16;
        let pre_ctx_state = (((m * slice_qp_y.clamp(0, 51)) >> 4) + n).clamp(1, 126);

        if pre_ctx_state <= 63 {
            Self::new((63 - pre_ctx_state) as u8, false)
        } else {
            Self::new((pre_ctx_state - 64) as u8, true)
        }
    }

    /// `pStateIdx`.
    pub fn state(&self) -> u8 {
        self.0 >> 1
    }

    /// `valMps`.
    pub fn mps(&self) -> bool {
        self.0 & 1 == 1
    }
}

/// Binary arithmetic encoder writing into a [`BitWriter`].
pub struct CabacEncoder<'w, 'a> {
    writer: &'w mut BitWriter<'a>,
    low: u32,
    range: u32,
    bits_outstanding: u32,
    first_bit_flag: bool,
}

impl<'w, 'a> CabacEncoder<'w, 'a> {
    /// Initializes the arithmetic encoding engine (9.3.2.5).
    pub fn new(writer: &'w mut BitWriter<'a>) -> Self {
        Self {
            writer,
            low: 0,
            range: 510,
            bits_outstanding: 0,
            first_bit_flag: true,
        }
    }

    /// Encodes `bin` with the context-adaptive engine, updating `ctx` (9.3.4.3.2).
    pub fn encode_bin(&mut self, ctx: &mut CabacContext, bin: bool) -> BitWriterResult<()> {
        let mut state = ctx.state();
        let mut mps = ctx.mps();

        let q_range_idx = ((self.range >> 6) & 3) as usize;
        let lps_range = u32::from(RANGE_TAB_LPS[usize::from(state)][q_range_idx]);
        self.range -= lps_range;

        if bin != mps {
            self.low += self.range;
            self.range = lps_range;
            if state == 0 {
                mps = !mps;
            }
            state = TRANS_IDX_LPS[usize::from(state)];
        } else {
            state = TRANS_IDX_MPS[usize::from(state)];
        }

        *ctx = CabacContext::new(state, mps);

        self.renorm_e()
    }

    /// Encodes `bin` in bypass mode (9.3.4.3.4).
    pub fn encode_bin_ep(&mut self, bin: bool) -> BitWriterResult<()> {
        self.low <<= 1;
        if bin {
            self.low += self.range;
        }

        if self.low >= 1024 {
            self.put_bit_c(true)?;
            self.low -= 1024;
        } else if self.low < 512 {
            self.put_bit_c(false)?;
        } else {
            self.low -= 512;
            self.bits_outstanding += 1;
        }

        Ok(())
    }

    /// Encodes a bin with the terminating engine (9.3.4.3.5). Encoding a `1`
    /// flushes the coder; only [`Self::slice_finish`] needs to follow.
    pub fn encode_bin_trm(&mut self, bin: bool) -> BitWriterResult<()> {
        self.range -= 2;

        if bin {
            self.low += self.range;
            self.flush()
        } else {
            self.renorm_e()
        }
    }

    /// Terminates the slice: encodes `end_of_slice_segment_flag` equal to 1,
    /// flushes the coder and appends the RBSP trailing bits.
    pub fn slice_finish(&mut self) -> BitWriterResult<()> {
        self.range -= 2;
        self.low += self.range;
        self.flush()?;

        self.writer.put_trailing_bits(false)
    }

    /// 9.3.4.3.6, minus the stop bit which is part of the trailing bits.
    fn flush(&mut self) -> BitWriterResult<()> {
        self.range = 2;
        self.renorm_e()?;
        self.put_bit_c((self.low >> 9) & 1 == 1)?;
        self.writer.put_bit((self.low >> 8) & 1 == 1)
    }

    fn renorm_e(&mut self) -> BitWriterResult<()> {
        while self.range < 256 {
            if self.low < 256 {
                self.put_bit_c(false)?;
            } else if self.low >= 512 {
                self.low -= 512;
                self.put_bit_c(true)?;
            } else {
                self.low -= 256;
                self.bits_outstanding += 1;
            }

            self.range <<= 1;
            self.low <<= 1;
        }

        debug_assert!((256..512).contains(&self.range));
        Ok(())
    }

    fn put_bit_c(&mut self, bit: bool) -> BitWriterResult<()> {
        if self.first_bit_flag {
            self.first_bit_flag = false;
        } else {
            self.writer.put_bit(bit)?;
        }

        while self.bits_outstanding > 0 {
            self.writer.put_bit(!bit)?;
            self.bits_outstanding -= 1;
        }

        Ok(())
    }

    #[cfg(test)]
    fn range(&self) -> u32 {
        self.range
    }
}
