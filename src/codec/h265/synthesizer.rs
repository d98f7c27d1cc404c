// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Packing of H.265 slice segment headers into a caller-provided window.
//!
//! A [`HeaderPacker`] is loaded with the SPS and PPS in use and then packs one
//! `slice_segment_header()`, preceded by its start code and NAL unit header,
//! per call. Input is validated before anything is written and the result is
//! staged, so a failed call leaves the destination window untouched.

use log::debug;
use log::trace;
use log::warn;
use thiserror::Error;

use crate::bitstream_utils::BitWriter;
use crate::bitstream_utils::BitWriterError;
use crate::codec::h265::params::ceil_log2;
use crate::codec::h265::params::NaluHeader;
use crate::codec::h265::params::NaluType;
use crate::codec::h265::params::Pps;
use crate::codec::h265::params::PredWeightTable;
use crate::codec::h265::params::ShortTermRefPicSet;
use crate::codec::h265::params::SliceHeader;
use crate::codec::h265::params::Sps;
use crate::codec::h265::params::MAX_EXTRA_SLICE_HEADER_BITS;
use crate::codec::h265::params::MAX_LONG_TERM_REF_PICS;
use crate::codec::h265::params::MAX_REF_IDX_ACTIVE;
use crate::codec::h265::params::MAX_SHORT_TERM_REF_PIC_SETS;
use crate::codec::h265::params::MAX_SLICE_HEADER_EXTENSION_LENGTH;
use crate::codec::h265::rps::derive_ref_pic_set;
use crate::codec::h265::rps::derive_ref_pic_sets;
use crate::codec::h265::rps::ref_rps_idx;
use crate::codec::h265::rps::DerivedRefPicSet;
use crate::codec::h265::rps::RpsError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackerError {
    #[error("input exceeds a supported table size: {0}")]
    Capacity(String),
    #[error("inconsistent input: {0}")]
    Inconsistent(String),
    #[error("no {0} loaded")]
    MissingParameterSet(&'static str),
    #[error(transparent)]
    BitWriter(#[from] BitWriterError),
}

impl From<RpsError> for PackerError {
    fn from(err: RpsError) -> Self {
        if err.is_capacity() {
            Self::Capacity(err.to_string())
        } else {
            Self::Inconsistent(err.to_string())
        }
    }
}

pub type PackerResult<T> = Result<T, PackerError>;

/// Result of a successful [`HeaderPacker::pack_slice_segment_header`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackedSliceHeader {
    /// Bits written, start code and NAL unit header included.
    pub bit_size: usize,
    /// Leading bytes (start code and NAL unit header) that emulation
    /// prevention must leave alone.
    pub skip_emulation_check_count: usize,
}

fn capacity<T>(msg: String) -> PackerResult<T> {
    Err(PackerError::Capacity(msg))
}

fn inconsistent<T>(msg: String) -> PackerResult<T> {
    Err(PackerError::Inconsistent(msg))
}

/// Values derived from the inputs once per slice, before packing.
#[derive(Clone, Copy)]
struct SliceContext {
    /// NumPicTotalCurr (7-55).
    num_pic_total_curr: u32,
}

/// Walks the syntax of a slice segment header, emitting each element.
struct Synthesizer<'p, 'w, 'a> {
    writer: &'w mut BitWriter<'a>,
    nalu: &'p NaluHeader,
    sps: &'p Sps,
    sps_rps: &'p [DerivedRefPicSet],
    pps: &'p Pps,
    slice: &'p SliceHeader,
    ctx: SliceContext,
}

impl Synthesizer<'_, '_, '_> {
    fn u<T: Into<u32>>(&mut self, bits: usize, value: T) -> PackerResult<()> {
        self.writer.put_bits(bits, value)?;
        Ok(())
    }

    fn flag(&mut self, value: bool) -> PackerResult<()> {
        self.writer.put_bit(value)?;
        Ok(())
    }

    fn ue<T: Into<u32>>(&mut self, value: T) -> PackerResult<()> {
        self.writer.put_ue(value)?;
        Ok(())
    }

    fn se<T: Into<i32>>(&mut self, value: T) -> PackerResult<()> {
        self.writer.put_se(value)?;
        Ok(())
    }

    fn is_idr(&self) -> bool {
        self.nalu.type_.is_idr()
    }

    /// slice_temporal_mvp_enabled_flag, inferred to be 0 when absent.
    fn temporal_mvp(&self) -> bool {
        !self.is_idr() && self.sps.temporal_mvp_enabled_flag && self.slice.temporal_mvp_enabled_flag
    }

    fn sao_luma(&self) -> bool {
        self.sps.sample_adaptive_offset_enabled_flag && self.slice.sao_luma_flag
    }

    fn sao_chroma(&self) -> bool {
        self.sps.sample_adaptive_offset_enabled_flag
            && self.sps.chroma_array_type() != 0
            && self.slice.sao_chroma_flag
    }

    fn deblocking_override(&self) -> bool {
        self.pps.deblocking_filter_override_enabled_flag
            && self.slice.deblocking_filter_override_flag
    }

    /// slice_deblocking_filter_disabled_flag, inferred from the PPS when absent.
    fn deblocking_disabled(&self) -> bool {
        if self.deblocking_override() {
            self.slice.deblocking_filter_disabled_flag
        } else {
            self.pps.deblocking_filter_disabled_flag
        }
    }

    fn collocated_from_l0(&self) -> bool {
        !self.slice.type_.is_b() || self.slice.collocated_from_l0_flag
    }

    fn slice_segment_header(&mut self, dynamic_slicing: bool) -> PackerResult<usize> {
        let skip = nalu_start_code_and_header(&mut *self.writer, self.nalu)?;

        // With dynamic slicing the addressing and the final alignment are
        // produced downstream, once the slice boundaries are known.
        if !dynamic_slicing {
            self.slice_addressing()?;
        }

        if !self.slice.dependent_slice_segment_flag {
            self.independent_slice_header()?;
        }

        if self.pps.tiles_enabled_flag || self.pps.entropy_coding_sync_enabled_flag {
            self.entry_points()?;
        }

        if self.pps.slice_segment_header_extension_present_flag {
            self.slice_header_extension()?;
        }

        if !dynamic_slicing {
            // byte_alignment()
            self.writer.put_trailing_bits(false)?;
        }

        Ok(skip)
    }

    fn slice_addressing(&mut self) -> PackerResult<()> {
        self.flag(self.slice.first_slice_segment_in_pic_flag)?;

        if self.nalu.type_.is_irap() {
            self.flag(self.slice.no_output_of_prior_pics_flag)?;
        }

        self.ue(self.pps.pic_parameter_set_id)?;

        if !self.slice.first_slice_segment_in_pic_flag {
            if self.pps.dependent_slice_segments_enabled_flag {
                self.flag(self.slice.dependent_slice_segment_flag)?;
            }

            let bits = ceil_log2(self.sps.pic_size_in_ctbs_y());
            self.u(bits, self.slice.segment_address)?;
        }

        Ok(())
    }

    fn independent_slice_header(&mut self) -> PackerResult<()> {
        // slice_reserved_flag[i]
        self.u(usize::from(self.pps.num_extra_slice_header_bits), 0u32)?;

        self.ue(self.slice.type_ as u32)?;

        if self.pps.output_flag_present_flag {
            self.flag(self.slice.pic_output_flag)?;
        }

        if self.sps.separate_colour_plane_flag {
            self.u(2, self.slice.colour_plane_id)?;
        }

        if !self.is_idr() {
            self.non_idr_fields()?;
        }

        if self.sps.sample_adaptive_offset_enabled_flag {
            self.flag(self.slice.sao_luma_flag)?;
            if self.sps.chroma_array_type() != 0 {
                self.flag(self.slice.sao_chroma_flag)?;
            }
        }

        if !self.slice.type_.is_i() {
            self.inter_fields()?;
        }

        self.qp_and_loop_filter()
    }

    fn non_idr_fields(&mut self) -> PackerResult<()> {
        self.u(
            self.sps.log2_max_pic_order_cnt_lsb() as usize,
            self.slice.pic_order_cnt_lsb,
        )?;

        let slice = self.slice;
        let num_sets = self.sps.num_short_term_ref_pic_sets();
        self.flag(slice.short_term_ref_pic_set_sps_flag)?;
        if !slice.short_term_ref_pic_set_sps_flag {
            self.short_term_ref_pic_set(&slice.short_term_ref_pic_set, num_sets, num_sets)?;
        } else if num_sets > 1 {
            self.u(ceil_log2(num_sets as u32), slice.short_term_ref_pic_set_idx)?;
        }

        if self.sps.long_term_ref_pics_present_flag {
            self.long_term_ref_pics()?;
        }

        if self.sps.temporal_mvp_enabled_flag {
            self.flag(self.slice.temporal_mvp_enabled_flag)?;
        }

        Ok(())
    }

    /// st_ref_pic_set(idx) (7.3.7) against a table of `num_sets` SPS sets.
    fn short_term_ref_pic_set(
        &mut self,
        set: &ShortTermRefPicSet,
        idx: usize,
        num_sets: usize,
    ) -> PackerResult<()> {
        let predicted = idx != 0 && set.inter_ref_pic_set_prediction_flag;
        if idx != 0 {
            self.flag(predicted)?;
        }

        if predicted {
            if idx == num_sets {
                self.ue(set.delta_idx_minus1)?;
            }
            self.flag(set.delta_rps_sign)?;
            self.ue(set.abs_delta_rps_minus1)?;

            let ref_idx = ref_rps_idx(set, idx, num_sets)?;
            let num_delta_pocs = self
                .sps_rps
                .get(ref_idx)
                .map(DerivedRefPicSet::num_delta_pocs)
                .ok_or_else(|| {
                    PackerError::Inconsistent(format!("RefRpsIdx {ref_idx} is not derived"))
                })?;
            trace!("st_ref_pic_set({idx}) predicted from {ref_idx}, {num_delta_pocs} pictures");

            for j in 0..=num_delta_pocs {
                self.flag(set.used_by_curr_pic_flag[j])?;
                if !set.used_by_curr_pic_flag[j] {
                    self.flag(set.use_delta_flag[j])?;
                }
            }
        } else {
            self.ue(set.num_negative_pics)?;
            self.ue(set.num_positive_pics)?;

            for i in 0..usize::from(set.num_negative_pics) {
                self.ue(set.delta_poc_s0_minus1[i])?;
                self.flag(set.used_by_curr_pic_s0_flag[i])?;
            }

            for i in 0..usize::from(set.num_positive_pics) {
                self.ue(set.delta_poc_s1_minus1[i])?;
                self.flag(set.used_by_curr_pic_s1_flag[i])?;
            }
        }

        Ok(())
    }

    fn long_term_ref_pics(&mut self) -> PackerResult<()> {
        let slice = self.slice;
        let num_lt_sps_candidates = u32::from(self.sps.num_long_term_ref_pics_sps);

        if num_lt_sps_candidates > 0 {
            self.ue(slice.num_long_term_sps)?;
        }
        self.ue(slice.num_long_term_pics)?;

        for i in 0..slice.num_long_term() {
            if i < usize::from(slice.num_long_term_sps) {
                if num_lt_sps_candidates > 1 {
                    self.u(ceil_log2(num_lt_sps_candidates), slice.lt_idx_sps[i])?;
                }
            } else {
                self.u(
                    self.sps.log2_max_pic_order_cnt_lsb() as usize,
                    slice.poc_lsb_lt[i],
                )?;
                self.flag(slice.used_by_curr_pic_lt_flag[i])?;
            }

            self.flag(slice.delta_poc_msb_present_flag[i])?;
            if slice.delta_poc_msb_present_flag[i] {
                self.ue(slice.delta_poc_msb_cycle_lt[i])?;
            }
        }

        Ok(())
    }

    fn inter_fields(&mut self) -> PackerResult<()> {
        let slice = self.slice;
        let is_b = slice.type_.is_b();

        self.flag(slice.num_ref_idx_active_override_flag)?;
        if slice.num_ref_idx_active_override_flag {
            self.ue(slice.num_ref_idx_l0_active_minus1)?;
            if is_b {
                self.ue(slice.num_ref_idx_l1_active_minus1)?;
            }
        }

        if self.pps.lists_modification_present_flag && self.ctx.num_pic_total_curr > 1 {
            self.ref_pic_lists_modification()?;
        }

        if is_b {
            self.flag(slice.mvd_l1_zero_flag)?;
        }

        if self.pps.cabac_init_present_flag {
            self.flag(slice.cabac_init_flag)?;
        }

        if self.temporal_mvp() {
            if is_b {
                self.flag(slice.collocated_from_l0_flag)?;
            }

            let col_l0 = self.collocated_from_l0();
            if (col_l0 && slice.num_ref_idx_l0_active_minus1 > 0)
                || (!col_l0 && slice.num_ref_idx_l1_active_minus1 > 0)
            {
                self.ue(slice.collocated_ref_idx)?;
            }
        }

        if slice.has_pred_weight_table(self.pps) {
            trace!("pred_weight_table present");
            self.pred_weight_table()?;
        }

        self.ue(slice.five_minus_max_num_merge_cand)
    }

    fn ref_pic_lists_modification(&mut self) -> PackerResult<()> {
        let slice = self.slice;
        let rplm = &slice.ref_pic_list_modification;
        let bits = ceil_log2(self.ctx.num_pic_total_curr);

        self.flag(rplm.ref_pic_list_modification_flag_l0)?;
        if rplm.ref_pic_list_modification_flag_l0 {
            for entry in &rplm.list_entry_l0 {
                self.u(bits, *entry)?;
            }
        }

        if slice.type_.is_b() {
            self.flag(rplm.ref_pic_list_modification_flag_l1)?;
            if rplm.ref_pic_list_modification_flag_l1 {
                for entry in &rplm.list_entry_l1 {
                    self.u(bits, *entry)?;
                }
            }
        }

        Ok(())
    }

    fn pred_weight_table(&mut self) -> PackerResult<()> {
        let slice = self.slice;
        let pwt = &slice.pred_weight_table;
        let has_chroma = self.sps.chroma_array_type() != 0;

        self.ue(pwt.luma_log2_weight_denom)?;
        if has_chroma {
            self.se(pwt.delta_chroma_log2_weight_denom)?;
        }

        self.pred_weight_list(
            pwt,
            usize::from(slice.num_ref_idx_l0_active_minus1) + 1,
            &pwt.luma_weight_l0_flag,
            &pwt.chroma_weight_l0_flag,
            &pwt.delta_luma_weight_l0,
            &pwt.luma_offset_l0,
            &pwt.delta_chroma_weight_l0,
            &pwt.chroma_offset_l0,
        )?;

        if slice.type_.is_b() {
            self.pred_weight_list(
                pwt,
                usize::from(slice.num_ref_idx_l1_active_minus1) + 1,
                &pwt.luma_weight_l1_flag,
                &pwt.chroma_weight_l1_flag,
                &pwt.delta_luma_weight_l1,
                &pwt.luma_offset_l1,
                &pwt.delta_chroma_weight_l1,
                &pwt.chroma_offset_l1,
            )?;
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn pred_weight_list(
        &mut self,
        pwt: &PredWeightTable,
        num_active: usize,
        luma_weight_flag: &[bool],
        chroma_weight_flag: &[bool],
        delta_luma_weight: &[i8],
        luma_offset: &[i32],
        delta_chroma_weight: &[[i8; 2]],
        chroma_offset: &[[i32; 2]],
    ) -> PackerResult<()> {
        let has_chroma = self.sps.chroma_array_type() != 0;
        let wp_offset_half_range_c = self.sps.wp_offset_half_range_c();

        for flag in &luma_weight_flag[..num_active] {
            self.flag(*flag)?;
        }

        if has_chroma {
            for flag in &chroma_weight_flag[..num_active] {
                self.flag(*flag)?;
            }
        }

        for i in 0..num_active {
            if luma_weight_flag[i] {
                self.se(delta_luma_weight[i])?;
                self.se(luma_offset[i])?;
            }

            if has_chroma && chroma_weight_flag[i] {
                for j in 0..2 {
                    self.se(delta_chroma_weight[i][j])?;
                    self.se(pwt.delta_chroma_offset(
                        chroma_offset[i][j],
                        delta_chroma_weight[i][j],
                        wp_offset_half_range_c,
                    ))?;
                }
            }
        }

        Ok(())
    }

    fn qp_and_loop_filter(&mut self) -> PackerResult<()> {
        let slice = self.slice;

        self.se(slice.qp_delta)?;

        if self.pps.slice_chroma_qp_offsets_present_flag {
            self.se(slice.cb_qp_offset)?;
            self.se(slice.cr_qp_offset)?;
        }

        if self.pps.chroma_qp_offset_list_enabled_flag {
            self.flag(slice.cu_chroma_qp_offset_enabled_flag)?;
        }

        if self.pps.deblocking_filter_override_enabled_flag {
            self.flag(slice.deblocking_filter_override_flag)?;
        }

        if self.deblocking_override() {
            self.flag(slice.deblocking_filter_disabled_flag)?;
            if !slice.deblocking_filter_disabled_flag {
                self.se(slice.beta_offset_div2)?;
                self.se(slice.tc_offset_div2)?;
            }
        }

        if self.pps.loop_filter_across_slices_enabled_flag
            && (self.sao_luma() || self.sao_chroma() || !self.deblocking_disabled())
        {
            self.flag(slice.loop_filter_across_slices_enabled_flag)?;
        }

        Ok(())
    }

    fn entry_points(&mut self) -> PackerResult<()> {
        let slice = self.slice;
        let offsets = &slice.entry_point_offset_minus1;

        self.ue(offsets.len() as u32)?;
        if !offsets.is_empty() {
            let bits = usize::from(slice.offset_len_minus1) + 1;
            self.ue(slice.offset_len_minus1)?;
            for offset in offsets {
                self.u(bits, *offset)?;
            }
        }

        Ok(())
    }

    fn slice_header_extension(&mut self) -> PackerResult<()> {
        let slice = self.slice;
        let data = &slice.slice_segment_header_extension_data;

        self.ue(data.len() as u32)?;
        for byte in data {
            self.u(8, *byte)?;
        }

        Ok(())
    }
}

/// Writes the Annex B start code and `nal_unit_header()`. Returns the number
/// of bytes written.
fn nalu_start_code_and_header(writer: &mut BitWriter, nalu: &NaluHeader) -> PackerResult<usize> {
    // zero_byte always precedes parameter sets and delimiters (B.2.2). Anywhere
    // else it is up to the caller.
    let long_start_code = nalu.long_start_code || nalu.type_.needs_zero_byte();

    let start_code_len = if long_start_code {
        writer.put_bits(32, 0x0000_0001u32)?;
        4
    } else {
        writer.put_bits(24, 0x00_0001u32)?;
        3
    };

    // forbidden_zero_bit
    writer.put_bit(false)?;
    writer.put_bits(6, nalu.type_ as u32)?;
    writer.put_bits(6, nalu.nuh_layer_id)?;
    writer.put_bits(3, nalu.nuh_temporal_id_plus1)?;

    Ok(start_code_len + 2)
}

/// Bytes staged by the first packing attempt. Headers without long entry
/// point or extension lists fit well within it.
const INITIAL_STAGING_BYTES: usize = 256;

/// Runs `pack` on a copy of a prefix of `window` and commits the touched bytes
/// only if it succeeds. The prefix doubles, up to the whole window, for as
/// long as `pack` runs out of room. Returns the value of `pack` and the number
/// of bits written.
fn pack_staged<T>(
    scratch: &mut Vec<u8>,
    window: &mut [u8],
    bit_offset: u8,
    mut pack: impl FnMut(&mut BitWriter<'_>) -> PackerResult<T>,
) -> PackerResult<(T, usize)> {
    let mut staged = window.len().min(INITIAL_STAGING_BYTES);

    loop {
        scratch.clear();
        scratch.extend_from_slice(&window[..staged]);

        let result = BitWriter::new(&mut scratch[..], bit_offset)
            .map_err(PackerError::from)
            .and_then(|mut writer| {
                let value = pack(&mut writer)?;
                Ok((value, writer.bit_offset(), writer.bytes_used()))
            });

        match result {
            Ok((value, bits, bytes)) => {
                window[..bytes].copy_from_slice(&scratch[..bytes]);
                return Ok((value, bits));
            }
            Err(PackerError::BitWriter(BitWriterError::BufferExhausted { .. }))
                if staged < window.len() =>
            {
                staged = window.len().min(staged * 2);
                trace!("Header does not fit, staging {staged} bytes");
            }
            Err(e) => return Err(e),
        }
    }
}

fn validate_sps(sps: &Sps) -> PackerResult<Vec<DerivedRefPicSet>> {
    if sps.num_short_term_ref_pic_sets() > MAX_SHORT_TERM_REF_PIC_SETS {
        return capacity(format!(
            "{} short-term RPS in the SPS",
            sps.num_short_term_ref_pic_sets()
        ));
    }

    if usize::from(sps.num_long_term_ref_pics_sps) > MAX_LONG_TERM_REF_PICS {
        return capacity(format!(
            "{} long-term pictures in the SPS",
            sps.num_long_term_ref_pics_sps
        ));
    }

    if sps.chroma_format_idc > 3 {
        return inconsistent(format!("chroma_format_idc {}", sps.chroma_format_idc));
    }

    if sps.bit_depth_chroma_minus8 > 8 {
        return inconsistent(format!(
            "bit_depth_chroma_minus8 {}",
            sps.bit_depth_chroma_minus8
        ));
    }

    if sps.log2_max_pic_order_cnt_lsb_minus4 > 12 {
        return inconsistent(format!(
            "log2_max_pic_order_cnt_lsb_minus4 {}",
            sps.log2_max_pic_order_cnt_lsb_minus4
        ));
    }

    Ok(derive_ref_pic_sets(&sps.short_term_ref_pic_set)?)
}

fn validate_nalu(nalu: &NaluHeader) -> PackerResult<()> {
    if !nalu.type_.is_vcl() {
        return inconsistent(format!("{:?} does not carry a slice segment", nalu.type_));
    }

    if nalu.nuh_layer_id > 63 {
        return inconsistent(format!("nuh_layer_id {}", nalu.nuh_layer_id));
    }

    if !(1..=7).contains(&nalu.nuh_temporal_id_plus1) {
        return inconsistent(format!(
            "nuh_temporal_id_plus1 {}",
            nalu.nuh_temporal_id_plus1
        ));
    }

    Ok(())
}

fn validate_addressing(sps: &Sps, pps: &Pps, slice: &SliceHeader) -> PackerResult<()> {
    if slice.dependent_slice_segment_flag {
        if slice.first_slice_segment_in_pic_flag {
            return inconsistent("dependent slice segment is the first of the picture".into());
        }

        if !pps.dependent_slice_segments_enabled_flag {
            return inconsistent("dependent slice segments are not enabled in the PPS".into());
        }
    }

    if !slice.first_slice_segment_in_pic_flag && slice.segment_address >= sps.pic_size_in_ctbs_y()
    {
        return inconsistent(format!(
            "slice_segment_address {} outside of a {} CTB picture",
            slice.segment_address,
            sps.pic_size_in_ctbs_y()
        ));
    }

    if sps.separate_colour_plane_flag && slice.colour_plane_id > 2 {
        return inconsistent(format!("colour_plane_id {}", slice.colour_plane_id));
    }

    Ok(())
}

/// Checks the RPS related fields and derives the short-term RPS of the slice.
fn validate_ref_pic_sets(
    sps: &Sps,
    sps_rps: &[DerivedRefPicSet],
    slice: &SliceHeader,
) -> PackerResult<DerivedRefPicSet> {
    let max_poc_lsb = 1u32 << sps.log2_max_pic_order_cnt_lsb();
    if slice.pic_order_cnt_lsb >= max_poc_lsb {
        return inconsistent(format!(
            "slice_pic_order_cnt_lsb {} does not fit {} bits",
            slice.pic_order_cnt_lsb,
            sps.log2_max_pic_order_cnt_lsb()
        ));
    }

    let num_sets = sps.num_short_term_ref_pic_sets();
    let rps = if slice.short_term_ref_pic_set_sps_flag {
        if num_sets == 0 {
            return inconsistent("SPS short-term RPS selected, but the SPS has none".into());
        }

        let idx = usize::from(slice.short_term_ref_pic_set_idx);
        match sps_rps.get(idx) {
            Some(rps) => rps.clone(),
            None => {
                return inconsistent(format!(
                    "short_term_ref_pic_set_idx {idx} with {num_sets} sets in the SPS"
                ))
            }
        }
    } else {
        let set = &slice.short_term_ref_pic_set;
        if set.inter_ref_pic_set_prediction_flag && num_sets == 0 {
            return Err(RpsError::PredictionAtIndexZero(0).into());
        }

        derive_ref_pic_set(set, num_sets, num_sets, sps_rps)?
    };

    Ok(rps)
}

fn validate_long_term(sps: &Sps, slice: &SliceHeader) -> PackerResult<()> {
    if slice.num_long_term() > MAX_LONG_TERM_REF_PICS {
        return capacity(format!(
            "{} long-term pictures in the slice",
            slice.num_long_term()
        ));
    }

    if slice.num_long_term_sps > sps.num_long_term_ref_pics_sps {
        return inconsistent(format!(
            "num_long_term_sps {} with {} candidates in the SPS",
            slice.num_long_term_sps, sps.num_long_term_ref_pics_sps
        ));
    }

    let max_poc_lsb = 1u32 << sps.log2_max_pic_order_cnt_lsb();
    for i in 0..slice.num_long_term() {
        if i < usize::from(slice.num_long_term_sps) {
            if slice.lt_idx_sps[i] >= sps.num_long_term_ref_pics_sps {
                return inconsistent(format!("lt_idx_sps[{i}] {}", slice.lt_idx_sps[i]));
            }
        } else if slice.poc_lsb_lt[i] >= max_poc_lsb {
            return inconsistent(format!("poc_lsb_lt[{i}] {}", slice.poc_lsb_lt[i]));
        }

        if slice.delta_poc_msb_present_flag[i] && slice.delta_poc_msb_cycle_lt[i] == u32::MAX {
            return inconsistent(format!("delta_poc_msb_cycle_lt[{i}] cannot be coded"));
        }
    }

    Ok(())
}

fn validate_inter(pps: &Pps, slice: &SliceHeader, num_pic_total_curr: u32) -> PackerResult<()> {
    let is_b = slice.type_.is_b();
    let num_l0 = usize::from(slice.num_ref_idx_l0_active_minus1) + 1;
    let num_l1 = usize::from(slice.num_ref_idx_l1_active_minus1) + 1;

    if num_l0 > MAX_REF_IDX_ACTIVE || (is_b && num_l1 > MAX_REF_IDX_ACTIVE) {
        return capacity(format!(
            "{num_l0}/{num_l1} active references, at most {MAX_REF_IDX_ACTIVE} per list"
        ));
    }

    if !slice.num_ref_idx_active_override_flag
        && (slice.num_ref_idx_l0_active_minus1 != pps.num_ref_idx_l0_default_active_minus1
            || (is_b
                && slice.num_ref_idx_l1_active_minus1
                    != pps.num_ref_idx_l1_default_active_minus1))
    {
        return inconsistent("active reference counts differ from the PPS defaults".into());
    }

    if pps.lists_modification_present_flag && num_pic_total_curr > 1 {
        let rplm = &slice.ref_pic_list_modification;
        let mut lists = vec![(
            rplm.ref_pic_list_modification_flag_l0,
            &rplm.list_entry_l0,
            num_l0,
        )];
        if is_b {
            lists.push((
                rplm.ref_pic_list_modification_flag_l1,
                &rplm.list_entry_l1,
                num_l1,
            ));
        }

        for (list, (flag, entries, num_active)) in lists.into_iter().enumerate() {
            if !flag {
                continue;
            }

            if entries.len() != num_active {
                return capacity(format!(
                    "{} list_entry_l{list} for {num_active} active references",
                    entries.len()
                ));
            }

            if let Some(entry) = entries.iter().find(|&&e| e >= num_pic_total_curr) {
                return inconsistent(format!(
                    "list_entry_l{list} {entry} with NumPicTotalCurr {num_pic_total_curr}"
                ));
            }
        }
    }

    let col_l0 = !is_b || slice.collocated_from_l0_flag;
    let num_col = if col_l0 { num_l0 } else { num_l1 };
    if usize::from(slice.collocated_ref_idx) >= num_col {
        return inconsistent(format!(
            "collocated_ref_idx {} with {num_col} references",
            slice.collocated_ref_idx
        ));
    }

    if slice.has_pred_weight_table(pps) {
        validate_pred_weight_table(&slice.pred_weight_table, num_l0, is_b.then_some(num_l1))?;
    }

    Ok(())
}

fn validate_pred_weight_table(
    pwt: &PredWeightTable,
    num_l0: usize,
    num_l1: Option<usize>,
) -> PackerResult<()> {
    if pwt.luma_log2_weight_denom > 7 || !(0..=7).contains(&pwt.chroma_log2_weight_denom()) {
        return inconsistent(format!(
            "weight denominators {} / {}",
            pwt.luma_log2_weight_denom,
            pwt.chroma_log2_weight_denom()
        ));
    }

    fn beyond(flags: &[bool], num_active: usize) -> bool {
        flags[num_active..].iter().any(|&f| f)
    }

    if beyond(&pwt.luma_weight_l0_flag, num_l0) || beyond(&pwt.chroma_weight_l0_flag, num_l0) {
        return capacity(format!("list 0 weights beyond {num_l0} active references"));
    }

    // List 1 is only coded for B slices.
    if let Some(num_l1) = num_l1 {
        if beyond(&pwt.luma_weight_l1_flag, num_l1) || beyond(&pwt.chroma_weight_l1_flag, num_l1)
        {
            return capacity(format!("list 1 weights beyond {num_l1} active references"));
        }
    }

    Ok(())
}

fn validate_trailer(pps: &Pps, slice: &SliceHeader) -> PackerResult<()> {
    let offsets = &slice.entry_point_offset_minus1;
    if !offsets.is_empty() {
        if !pps.tiles_enabled_flag && !pps.entropy_coding_sync_enabled_flag {
            return inconsistent("entry points without tiles or WPP".into());
        }

        if slice.offset_len_minus1 > 31 {
            return inconsistent(format!("offset_len_minus1 {}", slice.offset_len_minus1));
        }

        let bits = u32::from(slice.offset_len_minus1) + 1;
        if let Some(offset) = offsets.iter().find(|&&o| bits < 32 && o >> bits != 0) {
            return inconsistent(format!(
                "entry_point_offset_minus1 {offset} does not fit {bits} bits"
            ));
        }
    }

    if slice.slice_segment_header_extension_data.len() > MAX_SLICE_HEADER_EXTENSION_LENGTH {
        return inconsistent(format!(
            "{} bytes of slice header extension",
            slice.slice_segment_header_extension_data.len()
        ));
    }

    Ok(())
}

fn validate_slice(
    nalu: &NaluHeader,
    sps: &Sps,
    sps_rps: &[DerivedRefPicSet],
    pps: &Pps,
    slice: &SliceHeader,
) -> PackerResult<SliceContext> {
    validate_nalu(nalu)?;
    validate_addressing(sps, pps, slice)?;
    validate_trailer(pps, slice)?;

    let mut ctx = SliceContext {
        num_pic_total_curr: 0,
    };

    // Dependent slice segments copy everything else from the previous one.
    if slice.dependent_slice_segment_flag {
        return Ok(ctx);
    }

    if !nalu.type_.is_idr() {
        let rps = validate_ref_pic_sets(sps, sps_rps, slice)?;

        if sps.long_term_ref_pics_present_flag {
            validate_long_term(sps, slice)?;
        }

        ctx.num_pic_total_curr = rps.num_used_by_curr_pic();
        if sps.long_term_ref_pics_present_flag {
            ctx.num_pic_total_curr += (0..slice.num_long_term())
                .filter(|&i| slice.used_by_curr_pic_lt(sps, i))
                .count() as u32;
        }
    }

    if !slice.type_.is_i() {
        validate_inter(pps, slice, ctx.num_pic_total_curr)?;
    }

    Ok(ctx)
}

/// Packs H.265 slice segment headers for the loaded SPS and PPS.
#[derive(Default)]
pub struct HeaderPacker {
    sps: Option<Sps>,
    /// Derived form of the SPS short-term RPS candidates.
    sps_rps: Vec<DerivedRefPicSet>,
    pps: Option<Pps>,
    /// Staging copy of the destination window.
    scratch: Vec<u8>,
}

impl HeaderPacker {
    pub fn new() -> Self {
        Default::default()
    }

    /// Loads the SPS used by subsequent slices. On error the previous SPS, if
    /// any, stays loaded.
    pub fn load_sps(&mut self, sps: Sps) -> PackerResult<()> {
        let sps_rps = validate_sps(&sps).inspect_err(|e| warn!("Rejecting SPS: {e}"))?;

        debug!(
            "Loaded SPS {}: {} short-term RPS, {}x{} CTBs",
            sps.seq_parameter_set_id,
            sps_rps.len(),
            sps.pic_width_in_ctbs_y(),
            sps.pic_height_in_ctbs_y()
        );

        self.sps = Some(sps);
        self.sps_rps = sps_rps;
        Ok(())
    }

    /// Loads the PPS used by subsequent slices. On error the previous PPS, if
    /// any, stays loaded.
    pub fn load_pps(&mut self, pps: Pps) -> PackerResult<()> {
        if pps.num_extra_slice_header_bits > MAX_EXTRA_SLICE_HEADER_BITS {
            let err = PackerError::Inconsistent(format!(
                "num_extra_slice_header_bits {}",
                pps.num_extra_slice_header_bits
            ));
            warn!("Rejecting PPS: {err}");
            return Err(err);
        }

        debug!("Loaded PPS {}", pps.pic_parameter_set_id);
        self.pps = Some(pps);
        Ok(())
    }

    pub fn sps(&self) -> Option<&Sps> {
        self.sps.as_ref()
    }

    pub fn pps(&self) -> Option<&Pps> {
        self.pps.as_ref()
    }

    /// Packs the start code, NAL unit header and `slice_segment_header()` of
    /// one slice segment into `window`, starting `bit_offset` bits into its
    /// first byte.
    ///
    /// With `dynamic_slicing` the slice addressing and the final byte
    /// alignment are left to the stage that splits the picture into slices.
    ///
    /// On error `window` is left unchanged.
    pub fn pack_slice_segment_header(
        &mut self,
        nalu: &NaluHeader,
        slice: &SliceHeader,
        window: &mut [u8],
        bit_offset: u8,
        dynamic_slicing: bool,
    ) -> PackerResult<PackedSliceHeader> {
        let sps = self
            .sps
            .as_ref()
            .ok_or(PackerError::MissingParameterSet("SPS"))?;
        let pps = self
            .pps
            .as_ref()
            .ok_or(PackerError::MissingParameterSet("PPS"))?;
        let sps_rps = &self.sps_rps;

        let ctx = validate_slice(nalu, sps, sps_rps, pps, slice)
            .inspect_err(|e| warn!("Rejecting {:?} slice: {e}", slice.type_))?;

        let (skip, bit_size) = pack_staged(&mut self.scratch, window, bit_offset, |writer| {
            Synthesizer {
                writer,
                nalu,
                sps,
                sps_rps,
                pps,
                slice,
                ctx,
            }
            .slice_segment_header(dynamic_slicing)
        })
        .inspect_err(|e| warn!("Failed to pack {:?} slice: {e}", slice.type_))?;

        debug!(
            "Packed {:?} slice header of {:?} NALU at CTB {}: {} bits",
            slice.type_, nalu.type_, slice.segment_address, bit_size
        );

        Ok(PackedSliceHeader {
            bit_size,
            skip_emulation_check_count: skip,
        })
    }

    /// Packs an `access_unit_delimiter_rbsp()` NAL unit with a four byte
    /// start code. Returns the number of bits written.
    ///
    /// On error `window` is left unchanged.
    pub fn pack_access_unit_delimiter(
        &mut self,
        pic_type: u8,
        window: &mut [u8],
        bit_offset: u8,
    ) -> PackerResult<usize> {
        if pic_type > 7 {
            return inconsistent(format!("pic_type {pic_type} does not fit 3 bits"));
        }

        let nalu = NaluHeader {
            type_: NaluType::AudNut,
            ..Default::default()
        };

        let (_, bit_size) = pack_staged(&mut self.scratch, window, bit_offset, |writer| {
            nalu_start_code_and_header(writer, &nalu)?;
            writer.put_bits(3, pic_type)?;
            writer.put_trailing_bits(false)?;
            Ok(())
        })?;

        debug!("Packed access unit delimiter, pic_type {pic_type}");
        Ok(bit_size)
    }
}
