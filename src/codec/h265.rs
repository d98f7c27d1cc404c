// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod cabac;
pub mod nalu_writer;
pub mod params;
pub mod rps;
#[cfg(test)]
mod slice_reader;
pub mod synthesizer;
