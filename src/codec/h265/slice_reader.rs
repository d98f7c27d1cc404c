// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Reads a packed slice segment NAL unit back into a [`SliceHeader`], the way
//! a decoder would parse it.

use anyhow::anyhow;
use anyhow::Context;

use crate::bitstream_utils::BitReader;
use crate::codec::h265::params::ceil_log2;
use crate::codec::h265::params::NaluHeader;
use crate::codec::h265::params::NaluType;
use crate::codec::h265::params::Pps;
use crate::codec::h265::params::ShortTermRefPicSet;
use crate::codec::h265::params::SliceHeader;
use crate::codec::h265::params::SliceType;
use crate::codec::h265::params::Sps;
use crate::codec::h265::params::MAX_DELTA_POCS;
use crate::codec::h265::params::MAX_LONG_TERM_REF_PICS;
use crate::codec::h265::rps::derive_ref_pic_set;
use crate::codec::h265::rps::derive_ref_pic_sets;
use crate::codec::h265::rps::ref_rps_idx;
use crate::codec::h265::rps::DerivedRefPicSet;

struct Reader<'a>(BitReader<'a>);

impl Reader<'_> {
    fn u<U: TryFrom<u32>>(&mut self, bits: usize) -> anyhow::Result<U> {
        self.0.read_bits(bits).map_err(anyhow::Error::msg)
    }

    fn flag(&mut self) -> anyhow::Result<bool> {
        self.0.read_bit().map_err(anyhow::Error::msg)
    }

    fn ue<U: TryFrom<u32>>(&mut self) -> anyhow::Result<U> {
        self.0.read_ue().map_err(anyhow::Error::msg)
    }

    fn se<U: TryFrom<i32>>(&mut self) -> anyhow::Result<U> {
        self.0.read_se().map_err(anyhow::Error::msg)
    }
}

/// Parses the start code, NAL unit header and slice segment header at the
/// start of `data`. Returns them with the number of bits they take, byte
/// alignment included.
pub(crate) fn read_slice_segment(
    data: &[u8],
    sps: &Sps,
    pps: &Pps,
) -> anyhow::Result<(NaluHeader, SliceHeader, usize)> {
    let start_code_len = if data.starts_with(&[0, 0, 0, 1]) {
        4
    } else if data.starts_with(&[0, 0, 1]) {
        3
    } else {
        return Err(anyhow!("Missing start code"));
    };

    let mut r = bitreader::BitReader::new(&data[start_code_len..]);
    r.skip(1)?;
    let type_ = NaluType::n(r.read_u32(6)?).ok_or(anyhow!("Invalid NALU type"))?;
    let nuh_layer_id = r.read_u8(6)?;
    let nuh_temporal_id_plus1 = r.read_u8(3)?;

    let header_len = start_code_len + 2;
    let mut r = Reader(BitReader::new(&data[header_len..]));
    let slice = read_slice_header(&mut r, type_, sps, pps)?;

    if !r.flag()? {
        return Err(anyhow!("Missing alignment_bit_equal_to_one"));
    }
    while !r.0.byte_aligned() {
        if r.flag()? {
            return Err(anyhow!("Non-zero alignment_bit_equal_to_zero"));
        }
    }

    let nalu = NaluHeader {
        type_,
        nuh_layer_id,
        nuh_temporal_id_plus1,
        long_start_code: start_code_len == 4 && !type_.needs_zero_byte(),
    };

    Ok((nalu, slice, header_len * 8 + r.0.position()))
}

fn read_slice_header(
    r: &mut Reader,
    nalu_type: NaluType,
    sps: &Sps,
    pps: &Pps,
) -> anyhow::Result<SliceHeader> {
    let mut hdr = SliceHeader {
        first_slice_segment_in_pic_flag: r.flag()?,
        ..Default::default()
    };

    if nalu_type.is_irap() {
        hdr.no_output_of_prior_pics_flag = r.flag()?;
    }

    let pps_id: u8 = r.ue()?;
    if pps_id != pps.pic_parameter_set_id {
        return Err(anyhow!("Unexpected PPS id {}", pps_id));
    }

    if !hdr.first_slice_segment_in_pic_flag {
        if pps.dependent_slice_segments_enabled_flag {
            hdr.dependent_slice_segment_flag = r.flag()?;
        }

        hdr.segment_address = r.u(ceil_log2(sps.pic_size_in_ctbs_y()))?;
    }

    if !hdr.dependent_slice_segment_flag {
        r.0.skip_bits(usize::from(pps.num_extra_slice_header_bits))
            .map_err(anyhow::Error::msg)?;

        let slice_type: u32 = r.ue()?;
        hdr.type_ = SliceType::n(slice_type).ok_or(anyhow!("Invalid slice type {}", slice_type))?;

        if pps.output_flag_present_flag {
            hdr.pic_output_flag = r.flag()?;
        }

        if sps.separate_colour_plane_flag {
            hdr.colour_plane_id = r.u(2)?;
        }

        let mut num_pic_total_curr = 0;
        if !nalu_type.is_idr() {
            num_pic_total_curr = read_ref_pic_sets(r, &mut hdr, sps)?;

            if sps.temporal_mvp_enabled_flag {
                hdr.temporal_mvp_enabled_flag = r.flag()?;
            }
        }

        if sps.sample_adaptive_offset_enabled_flag {
            hdr.sao_luma_flag = r.flag()?;
            if sps.chroma_array_type() != 0 {
                hdr.sao_chroma_flag = r.flag()?;
            }
        }

        if !hdr.type_.is_i() {
            read_inter_fields(r, &mut hdr, sps, pps, num_pic_total_curr)?;
        }

        hdr.qp_delta = r.se()?;
        if pps.slice_chroma_qp_offsets_present_flag {
            hdr.cb_qp_offset = r.se()?;
            hdr.cr_qp_offset = r.se()?;
        }

        if pps.chroma_qp_offset_list_enabled_flag {
            hdr.cu_chroma_qp_offset_enabled_flag = r.flag()?;
        }

        if pps.deblocking_filter_override_enabled_flag {
            hdr.deblocking_filter_override_flag = r.flag()?;
        }

        let mut disabled = pps.deblocking_filter_disabled_flag;
        if hdr.deblocking_filter_override_flag {
            hdr.deblocking_filter_disabled_flag = r.flag()?;
            disabled = hdr.deblocking_filter_disabled_flag;
            if !disabled {
                hdr.beta_offset_div2 = r.se()?;
                hdr.tc_offset_div2 = r.se()?;
            }
        }

        if pps.loop_filter_across_slices_enabled_flag
            && (hdr.sao_luma_flag || hdr.sao_chroma_flag || !disabled)
        {
            hdr.loop_filter_across_slices_enabled_flag = r.flag()?;
        }
    }

    if pps.tiles_enabled_flag || pps.entropy_coding_sync_enabled_flag {
        let num_entry_point_offsets: u32 = r.ue()?;
        if num_entry_point_offsets > 0 {
            hdr.offset_len_minus1 = r.ue()?;
            let bits = usize::from(hdr.offset_len_minus1) + 1;
            for _ in 0..num_entry_point_offsets {
                hdr.entry_point_offset_minus1.push(r.u(bits)?);
            }
        }
    }

    if pps.slice_segment_header_extension_present_flag {
        let len: u32 = r.ue()?;
        for _ in 0..len {
            hdr.slice_segment_header_extension_data.push(r.u(8)?);
        }
    }

    Ok(hdr)
}

/// Reads the short and long-term RPS fields. Returns NumPicTotalCurr.
fn read_ref_pic_sets(r: &mut Reader, hdr: &mut SliceHeader, sps: &Sps) -> anyhow::Result<u32> {
    let log2_max_poc_lsb = sps.log2_max_pic_order_cnt_lsb() as usize;
    hdr.pic_order_cnt_lsb = r.u(log2_max_poc_lsb)?;

    let sps_rps = derive_ref_pic_sets(&sps.short_term_ref_pic_set)?;
    let num_sets = sps.num_short_term_ref_pic_sets();

    hdr.short_term_ref_pic_set_sps_flag = r.flag()?;
    let rps = if !hdr.short_term_ref_pic_set_sps_flag {
        hdr.short_term_ref_pic_set = read_short_term_ref_pic_set(r, num_sets, &sps_rps)?;
        derive_ref_pic_set(&hdr.short_term_ref_pic_set, num_sets, num_sets, &sps_rps)?
    } else {
        if num_sets > 1 {
            hdr.short_term_ref_pic_set_idx = r.u(ceil_log2(num_sets as u32))?;
        }
        sps_rps
            .get(usize::from(hdr.short_term_ref_pic_set_idx))
            .cloned()
            .context("Invalid short_term_ref_pic_set_idx")?
    };

    let mut num_pic_total_curr = rps.num_used_by_curr_pic();

    if sps.long_term_ref_pics_present_flag {
        if sps.num_long_term_ref_pics_sps > 0 {
            hdr.num_long_term_sps = r.ue()?;
        }
        hdr.num_long_term_pics = r.ue()?;

        if hdr.num_long_term() > MAX_LONG_TERM_REF_PICS {
            return Err(anyhow!("Too many long-term pictures"));
        }

        for i in 0..hdr.num_long_term() {
            if i < usize::from(hdr.num_long_term_sps) {
                if sps.num_long_term_ref_pics_sps > 1 {
                    let bits = ceil_log2(u32::from(sps.num_long_term_ref_pics_sps));
                    hdr.lt_idx_sps[i] = r.u(bits)?;
                }
            } else {
                hdr.poc_lsb_lt[i] = r.u(log2_max_poc_lsb)?;
                hdr.used_by_curr_pic_lt_flag[i] = r.flag()?;
            }

            hdr.delta_poc_msb_present_flag[i] = r.flag()?;
            if hdr.delta_poc_msb_present_flag[i] {
                hdr.delta_poc_msb_cycle_lt[i] = r.ue()?;
            }

            if hdr.used_by_curr_pic_lt(sps, i) {
                num_pic_total_curr += 1;
            }
        }
    }

    Ok(num_pic_total_curr)
}

fn read_short_term_ref_pic_set(
    r: &mut Reader,
    idx: usize,
    sps_rps: &[DerivedRefPicSet],
) -> anyhow::Result<ShortTermRefPicSet> {
    let mut set = ShortTermRefPicSet::default();

    if idx != 0 {
        set.inter_ref_pic_set_prediction_flag = r.flag()?;
    }

    if set.inter_ref_pic_set_prediction_flag {
        if idx == sps_rps.len() {
            set.delta_idx_minus1 = r.ue()?;
        }
        set.delta_rps_sign = r.flag()?;
        set.abs_delta_rps_minus1 = r.ue()?;

        let ref_idx = ref_rps_idx(&set, idx, sps_rps.len())?;
        let num_delta_pocs = sps_rps
            .get(ref_idx)
            .map(DerivedRefPicSet::num_delta_pocs)
            .context("Invalid RefRpsIdx")?;

        for j in 0..=num_delta_pocs {
            set.used_by_curr_pic_flag[j] = r.flag()?;
            if !set.used_by_curr_pic_flag[j] {
                set.use_delta_flag[j] = r.flag()?;
            }
        }
    } else {
        set.num_negative_pics = r.ue()?;
        set.num_positive_pics = r.ue()?;

        if usize::from(set.num_negative_pics) + usize::from(set.num_positive_pics) > MAX_DELTA_POCS
        {
            return Err(anyhow!("Too many pictures in st_ref_pic_set"));
        }

        for i in 0..usize::from(set.num_negative_pics) {
            set.delta_poc_s0_minus1[i] = r.ue()?;
            set.used_by_curr_pic_s0_flag[i] = r.flag()?;
        }

        for i in 0..usize::from(set.num_positive_pics) {
            set.delta_poc_s1_minus1[i] = r.ue()?;
            set.used_by_curr_pic_s1_flag[i] = r.flag()?;
        }
    }

    Ok(set)
}

fn read_inter_fields(
    r: &mut Reader,
    hdr: &mut SliceHeader,
    sps: &Sps,
    pps: &Pps,
    num_pic_total_curr: u32,
) -> anyhow::Result<()> {
    let is_b = hdr.type_.is_b();

    hdr.num_ref_idx_active_override_flag = r.flag()?;
    if hdr.num_ref_idx_active_override_flag {
        hdr.num_ref_idx_l0_active_minus1 = r.ue()?;
        if is_b {
            hdr.num_ref_idx_l1_active_minus1 = r.ue()?;
        }
    } else {
        hdr.num_ref_idx_l0_active_minus1 = pps.num_ref_idx_l0_default_active_minus1;
        if is_b {
            hdr.num_ref_idx_l1_active_minus1 = pps.num_ref_idx_l1_default_active_minus1;
        }
    }

    if pps.lists_modification_present_flag && num_pic_total_curr > 1 {
        let bits = ceil_log2(num_pic_total_curr);
        let rplm = &mut hdr.ref_pic_list_modification;

        rplm.ref_pic_list_modification_flag_l0 = r.flag()?;
        if rplm.ref_pic_list_modification_flag_l0 {
            for _ in 0..=hdr.num_ref_idx_l0_active_minus1 {
                rplm.list_entry_l0.push(r.u(bits)?);
            }
        }

        if is_b {
            rplm.ref_pic_list_modification_flag_l1 = r.flag()?;
            if rplm.ref_pic_list_modification_flag_l1 {
                for _ in 0..=hdr.num_ref_idx_l1_active_minus1 {
                    rplm.list_entry_l1.push(r.u(bits)?);
                }
            }
        }
    }

    if is_b {
        hdr.mvd_l1_zero_flag = r.flag()?;
    }

    if pps.cabac_init_present_flag {
        hdr.cabac_init_flag = r.flag()?;
    }

    if hdr.temporal_mvp_enabled_flag {
        if is_b {
            hdr.collocated_from_l0_flag = r.flag()?;
        }

        if (hdr.collocated_from_l0_flag && hdr.num_ref_idx_l0_active_minus1 > 0)
            || (!hdr.collocated_from_l0_flag && hdr.num_ref_idx_l1_active_minus1 > 0)
        {
            hdr.collocated_ref_idx = r.ue()?;
        }
    }

    if hdr.has_pred_weight_table(pps) {
        read_pred_weight_table(r, hdr, sps)?;
    }

    hdr.five_minus_max_num_merge_cand = r.ue()?;

    Ok(())
}

fn read_pred_weight_table(r: &mut Reader, hdr: &mut SliceHeader, sps: &Sps) -> anyhow::Result<()> {
    let has_chroma = sps.chroma_array_type() != 0;
    let num_l0 = usize::from(hdr.num_ref_idx_l0_active_minus1) + 1;
    let num_l1 = usize::from(hdr.num_ref_idx_l1_active_minus1) + 1;
    let is_b = hdr.type_.is_b();
    let pwt = &mut hdr.pred_weight_table;

    pwt.luma_log2_weight_denom = r.ue()?;
    if has_chroma {
        pwt.delta_chroma_log2_weight_denom = r.se()?;
    }

    let denom = pwt.chroma_log2_weight_denom();
    let wp_offset_half_range_c = sps.wp_offset_half_range_c();
    let lists = if is_b { 2 } else { 1 };

    for list in 0..lists {
        let num_active = if list == 0 { num_l0 } else { num_l1 };
        let (luma_flag, chroma_flag, delta_luma, luma_offset, delta_chroma, chroma_offset) =
            if list == 0 {
                (
                    &mut pwt.luma_weight_l0_flag,
                    &mut pwt.chroma_weight_l0_flag,
                    &mut pwt.delta_luma_weight_l0,
                    &mut pwt.luma_offset_l0,
                    &mut pwt.delta_chroma_weight_l0,
                    &mut pwt.chroma_offset_l0,
                )
            } else {
                (
                    &mut pwt.luma_weight_l1_flag,
                    &mut pwt.chroma_weight_l1_flag,
                    &mut pwt.delta_luma_weight_l1,
                    &mut pwt.luma_offset_l1,
                    &mut pwt.delta_chroma_weight_l1,
                    &mut pwt.chroma_offset_l1,
                )
            };

        for flag in &mut luma_flag[..num_active] {
            *flag = r.flag()?;
        }

        if has_chroma {
            for flag in &mut chroma_flag[..num_active] {
                *flag = r.flag()?;
            }
        }

        for i in 0..num_active {
            if luma_flag[i] {
                delta_luma[i] = r.se()?;
                luma_offset[i] = r.se()?;
            }

            if chroma_flag[i] {
                for j in 0..2 {
                    delta_chroma[i][j] = r.se()?;
                    let delta_offset: i32 = r.se()?;

                    // 7-56
                    let weight = (1 << denom) + i32::from(delta_chroma[i][j]);
                    chroma_offset[i][j] = (wp_offset_half_range_c + delta_offset
                        - ((wp_offset_half_range_c * weight) >> denom))
                        .clamp(-wp_offset_half_range_c, wp_offset_half_range_c - 1);
                }
            }
        }
    }

    Ok(())
}
