// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bit-exact packing of H.265 headers for hardware encoders.
//!
//! [`codec::h265::synthesizer::HeaderPacker`] turns the encoder's choices for
//! a slice segment into its start code, NAL unit header and
//! `slice_segment_header()`. The building blocks are the MSB-first
//! [`bitstream_utils::BitWriter`] and the CABAC engine in
//! [`codec::h265::cabac`].

pub mod bitstream_utils;
pub mod codec;
