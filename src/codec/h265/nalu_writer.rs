// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! RBSP to EBSP conversion (7.4.2) for packed headers that are not passed
//! through a hardware emulation prevention stage.

use std::io::Write;

/// Wrapper over [`std::io::Write`] inserting `emulation_prevention_three_byte`.
pub struct EmulationPrevention<W: Write> {
    out: W,
    /// Number of consecutive zero bytes last written to `out`.
    zeros: usize,
    /// Leading bytes still to be copied verbatim.
    skip: usize,
    inserted: usize,
}

impl<W: Write> EmulationPrevention<W> {
    /// `skip` leading bytes (start code and NALU header) are copied as is.
    pub fn new(out: W, skip: usize) -> Self {
        Self {
            out,
            zeros: 0,
            skip,
            inserted: 0,
        }
    }

    /// Number of `0x03` bytes inserted so far.
    pub fn inserted(&self) -> usize {
        self.inserted
    }

    fn write_byte(&mut self, byte: u8) -> std::io::Result<()> {
        if self.skip > 0 {
            self.skip -= 1;
            self.out.write_all(&[byte])?;
            return Ok(());
        }

        if self.zeros >= 2 && byte <= 0x03 {
            self.out.write_all(&[0x03])?;
            self.inserted += 1;
            self.zeros = 0;
        }

        self.out.write_all(&[byte])?;
        if byte == 0x00 {
            self.zeros += 1;
        } else {
            self.zeros = 0;
        }

        Ok(())
    }
}

impl<W: Write> Write for EmulationPrevention<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for byte in buf {
            self.write_byte(*byte)?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }
}

/// Copies `nal` to `out` with emulation prevention, leaving the first `skip`
/// bytes untouched. Returns the number of inserted bytes.
pub fn write_ebsp<W: Write>(out: W, nal: &[u8], skip: usize) -> std::io::Result<usize> {
    let mut writer = EmulationPrevention::new(out, skip);
    writer.write_all(nal)?;
    writer.flush()?;

    Ok(writer.inserted())
}
