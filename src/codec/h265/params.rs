// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Projections of the H.265 parameter sets and slice segment header.
//!
//! Only the syntax elements that influence `slice_segment_header()` are kept.
//! Fields use the names of the syntax elements in the H.265 specification, and
//! `Default` yields the values a decoder infers when the element is absent.

use enumn::N;

/// Maximum number of short-term reference picture sets in an SPS.
pub const MAX_SHORT_TERM_REF_PIC_SETS: usize = 64;
/// Maximum number of entries of one short-term reference picture set.
pub const MAX_DELTA_POCS: usize = 16;
/// Maximum number of long-term reference pictures, in the SPS or in a slice.
pub const MAX_LONG_TERM_REF_PICS: usize = 32;
/// Maximum number of active references of a reference picture list.
pub const MAX_REF_IDX_ACTIVE: usize = 15;
/// Maximum length of `slice_segment_header_extension_data_byte`.
pub const MAX_SLICE_HEADER_EXTENSION_LENGTH: usize = 256;
/// Maximum value of `num_extra_slice_header_bits`.
pub const MAX_EXTRA_SLICE_HEADER_BITS: u8 = 7;

/// Ceil(Log2(value)), with 0 for values up to 1. Width of the `u(v)` indices
/// into a table of `value` entries.
pub fn ceil_log2(value: u32) -> usize {
    if value <= 1 {
        0
    } else {
        (u32::BITS - (value - 1).leading_zeros()) as usize
    }
}

/// Table 7-1 – NAL unit type codes and NAL unit type classes
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum NaluType {
    #[default]
    TrailN = 0,
    TrailR = 1,
    TsaN = 2,
    TsaR = 3,
    StsaN = 4,
    StsaR = 5,
    RadlN = 6,
    RadlR = 7,
    RaslN = 8,
    RaslR = 9,
    RsvVclN10 = 10,
    RsvVclR11 = 11,
    RsvVclN12 = 12,
    RsvVclR13 = 13,
    RsvVclN14 = 14,
    RsvVclR15 = 15,
    BlaWLp = 16,
    BlaWRadl = 17,
    BlaNLp = 18,
    IdrWRadl = 19,
    IdrNLp = 20,
    CraNut = 21,
    RsvIrapVcl22 = 22,
    RsvIrapVcl23 = 23,
    RsvVcl24 = 24,
    RsvVcl25 = 25,
    RsvVcl26 = 26,
    RsvVcl27 = 27,
    RsvVcl28 = 28,
    RsvVcl29 = 29,
    RsvVcl30 = 30,
    RsvVcl31 = 31,
    VpsNut = 32,
    SpsNut = 33,
    PpsNut = 34,
    AudNut = 35,
    EosNut = 36,
    EobNut = 37,
    FdNut = 38,
    PrefixSeiNut = 39,
    SuffixSeiNut = 40,
    RsvNvcl41 = 41,
    RsvNvcl42 = 42,
    RsvNvcl43 = 43,
    RsvNvcl44 = 44,
    RsvNvcl45 = 45,
    RsvNvcl46 = 46,
    RsvNvcl47 = 47,
    Unspec48 = 48,
    Unspec49 = 49,
    Unspec50 = 50,
    Unspec51 = 51,
    Unspec52 = 52,
    Unspec53 = 53,
    Unspec54 = 54,
    Unspec55 = 55,
    Unspec56 = 56,
    Unspec57 = 57,
    Unspec58 = 58,
    Unspec59 = 59,
    Unspec60 = 60,
    Unspec61 = 61,
    Unspec62 = 62,
    Unspec63 = 63,
}

impl NaluType {
    /// Whether this is an IDR NALU.
    pub fn is_idr(&self) -> bool {
        matches!(self, Self::IdrWRadl | Self::IdrNLp)
    }

    /// Whether this is an IRAP NALU.
    pub fn is_irap(&self) -> bool {
        (Self::BlaWLp..=Self::RsvIrapVcl23).contains(self)
    }

    /// Whether this NALU carries a slice segment.
    pub fn is_vcl(&self) -> bool {
        *self <= Self::RsvVcl31
    }

    /// Whether this NALU starts with `zero_byte` in byte stream format, i.e.
    /// uses a four byte start code (B.2.2).
    pub fn needs_zero_byte(&self) -> bool {
        matches!(
            self,
            Self::VpsNut | Self::SpsNut | Self::PpsNut | Self::AudNut
        )
    }
}

/// See table 7-7 in the specification.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliceType {
    B = 0,
    P = 1,
    I = 2,
}

impl SliceType {
    /// Whether this is a P slice. See table 7-7 in the specification.
    pub fn is_p(&self) -> bool {
        matches!(self, SliceType::P)
    }

    /// Whether this is a B slice. See table 7-7 in the specification.
    pub fn is_b(&self) -> bool {
        matches!(self, SliceType::B)
    }

    /// Whether this is an I slice. See table 7-7 in the specification.
    pub fn is_i(&self) -> bool {
        matches!(self, SliceType::I)
    }
}

impl Default for SliceType {
    fn default() -> Self {
        Self::P
    }
}

/// The two-byte `nal_unit_header()` plus the start code choice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NaluHeader {
    pub type_: NaluType,
    pub nuh_layer_id: u8,
    pub nuh_temporal_id_plus1: u8,
    /// Forces the four byte start code, e.g. for the first NALU of an access
    /// unit that is not preceded by a delimiter or parameter set.
    pub long_start_code: bool,
}

impl Default for NaluHeader {
    fn default() -> Self {
        Self {
            type_: Default::default(),
            nuh_layer_id: 0,
            nuh_temporal_id_plus1: 1,
            long_start_code: false,
        }
    }
}

/// Syntax values of one `st_ref_pic_set(stRpsIdx)`.
///
/// Which half of the fields is meaningful depends on
/// `inter_ref_pic_set_prediction_flag`. See [`crate::codec::h265::rps`] for the
/// derived form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShortTermRefPicSet {
    pub inter_ref_pic_set_prediction_flag: bool,
    /// Only coded for the set carried in a slice header. Sets in the SPS
    /// always predict from the set right before them.
    pub delta_idx_minus1: u8,
    pub delta_rps_sign: bool,
    pub abs_delta_rps_minus1: u16,
    /// Indexed by `j` in `0..=NumDeltaPocs[RefRpsIdx]`.
    pub used_by_curr_pic_flag: [bool; MAX_DELTA_POCS + 1],
    /// Only coded when `used_by_curr_pic_flag[j]` is not set.
    pub use_delta_flag: [bool; MAX_DELTA_POCS + 1],

    pub num_negative_pics: u8,
    pub num_positive_pics: u8,
    pub delta_poc_s0_minus1: [u16; MAX_DELTA_POCS],
    pub used_by_curr_pic_s0_flag: [bool; MAX_DELTA_POCS],
    pub delta_poc_s1_minus1: [u16; MAX_DELTA_POCS],
    pub used_by_curr_pic_s1_flag: [bool; MAX_DELTA_POCS],
}

impl ShortTermRefPicSet {
    /// The value of the variable deltaRps (7-60).
    pub fn delta_rps(&self) -> i32 {
        let sign = if self.delta_rps_sign { -1 } else { 1 };
        sign * (i32::from(self.abs_delta_rps_minus1) + 1)
    }
}

impl Default for ShortTermRefPicSet {
    fn default() -> Self {
        Self {
            inter_ref_pic_set_prediction_flag: false,
            delta_idx_minus1: 0,
            delta_rps_sign: false,
            abs_delta_rps_minus1: 0,
            used_by_curr_pic_flag: [false; MAX_DELTA_POCS + 1],
            use_delta_flag: [true; MAX_DELTA_POCS + 1],
            num_negative_pics: 0,
            num_positive_pics: 0,
            delta_poc_s0_minus1: [0; MAX_DELTA_POCS],
            used_by_curr_pic_s0_flag: [false; MAX_DELTA_POCS],
            delta_poc_s1_minus1: [0; MAX_DELTA_POCS],
            used_by_curr_pic_s1_flag: [false; MAX_DELTA_POCS],
        }
    }
}

/// The parts of a `seq_parameter_set_rbsp()` needed to pack slice headers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sps {
    pub seq_parameter_set_id: u8,
    pub chroma_format_idc: u8,
    pub separate_colour_plane_flag: bool,
    pub pic_width_in_luma_samples: u16,
    pub pic_height_in_luma_samples: u16,
    pub bit_depth_chroma_minus8: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub log2_min_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_luma_coding_block_size: u8,
    pub sample_adaptive_offset_enabled_flag: bool,
    /// The candidate sets, `num_short_term_ref_pic_sets` is the length.
    pub short_term_ref_pic_set: Vec<ShortTermRefPicSet>,
    pub long_term_ref_pics_present_flag: bool,
    pub num_long_term_ref_pics_sps: u8,
    pub lt_ref_pic_poc_lsb_sps: [u32; MAX_LONG_TERM_REF_PICS],
    pub used_by_curr_pic_lt_sps_flag: [bool; MAX_LONG_TERM_REF_PICS],
    pub temporal_mvp_enabled_flag: bool,
    /// From `sps_range_extension()`.
    pub high_precision_offsets_enabled_flag: bool,
}

impl Sps {
    /// ChromaArrayType, see the semantics of `separate_colour_plane_flag`.
    pub fn chroma_array_type(&self) -> u8 {
        if self.separate_colour_plane_flag {
            0
        } else {
            self.chroma_format_idc
        }
    }

    pub fn num_short_term_ref_pic_sets(&self) -> usize {
        self.short_term_ref_pic_set.len()
    }

    pub fn log2_max_pic_order_cnt_lsb(&self) -> u32 {
        u32::from(self.log2_max_pic_order_cnt_lsb_minus4) + 4
    }

    /// CtbLog2SizeY (7-10).
    pub fn ctb_log2_size_y(&self) -> u32 {
        u32::from(self.log2_min_luma_coding_block_size_minus3)
            + 3
            + u32::from(self.log2_diff_max_min_luma_coding_block_size)
    }

    /// PicWidthInCtbsY (7-15).
    pub fn pic_width_in_ctbs_y(&self) -> u32 {
        let ctb_size = 1u32 << self.ctb_log2_size_y().min(31);
        u32::from(self.pic_width_in_luma_samples).div_ceil(ctb_size)
    }

    /// PicHeightInCtbsY (7-17).
    pub fn pic_height_in_ctbs_y(&self) -> u32 {
        let ctb_size = 1u32 << self.ctb_log2_size_y().min(31);
        u32::from(self.pic_height_in_luma_samples).div_ceil(ctb_size)
    }

    /// PicSizeInCtbsY (7-19).
    pub fn pic_size_in_ctbs_y(&self) -> u32 {
        self.pic_width_in_ctbs_y() * self.pic_height_in_ctbs_y()
    }

    pub fn bit_depth_chroma(&self) -> u32 {
        u32::from(self.bit_depth_chroma_minus8) + 8
    }

    /// WpOffsetHalfRangeC (7-35).
    pub fn wp_offset_half_range_c(&self) -> i32 {
        let shift = if self.high_precision_offsets_enabled_flag {
            self.bit_depth_chroma() - 1
        } else {
            7
        };
        1 << shift
    }
}

/// The parts of a `pic_parameter_set_rbsp()` needed to pack slice headers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pps {
    pub pic_parameter_set_id: u8,
    pub dependent_slice_segments_enabled_flag: bool,
    pub output_flag_present_flag: bool,
    pub num_extra_slice_header_bits: u8,
    pub cabac_init_present_flag: bool,
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    pub slice_chroma_qp_offsets_present_flag: bool,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_flag: bool,
    pub tiles_enabled_flag: bool,
    pub entropy_coding_sync_enabled_flag: bool,
    pub loop_filter_across_slices_enabled_flag: bool,
    pub deblocking_filter_override_enabled_flag: bool,
    pub deblocking_filter_disabled_flag: bool,
    pub lists_modification_present_flag: bool,
    pub slice_segment_header_extension_present_flag: bool,
    /// From `pps_range_extension()`.
    pub chroma_qp_offset_list_enabled_flag: bool,
}

/// `ref_pic_lists_modification()` (7.3.6.2).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefPicListModification {
    pub ref_pic_list_modification_flag_l0: bool,
    /// One entry per active reference of list 0 when the flag is set.
    pub list_entry_l0: Vec<u32>,
    pub ref_pic_list_modification_flag_l1: bool,
    /// One entry per active reference of list 1 when the flag is set.
    pub list_entry_l1: Vec<u32>,
}

/// `pred_weight_table()` (7.3.6.3).
///
/// Chroma offsets are kept as the final ChromaOffsetLX values; the coded
/// `delta_chroma_offset_lX` is derived from them when packing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredWeightTable {
    pub luma_log2_weight_denom: u8,
    pub delta_chroma_log2_weight_denom: i8,

    pub luma_weight_l0_flag: [bool; MAX_REF_IDX_ACTIVE],
    pub chroma_weight_l0_flag: [bool; MAX_REF_IDX_ACTIVE],
    pub delta_luma_weight_l0: [i8; MAX_REF_IDX_ACTIVE],
    pub luma_offset_l0: [i32; MAX_REF_IDX_ACTIVE],
    pub delta_chroma_weight_l0: [[i8; 2]; MAX_REF_IDX_ACTIVE],
    pub chroma_offset_l0: [[i32; 2]; MAX_REF_IDX_ACTIVE],

    pub luma_weight_l1_flag: [bool; MAX_REF_IDX_ACTIVE],
    pub chroma_weight_l1_flag: [bool; MAX_REF_IDX_ACTIVE],
    pub delta_luma_weight_l1: [i8; MAX_REF_IDX_ACTIVE],
    pub luma_offset_l1: [i32; MAX_REF_IDX_ACTIVE],
    pub delta_chroma_weight_l1: [[i8; 2]; MAX_REF_IDX_ACTIVE],
    pub chroma_offset_l1: [[i32; 2]; MAX_REF_IDX_ACTIVE],
}

impl PredWeightTable {
    /// ChromaLog2WeightDenom (7-53).
    pub fn chroma_log2_weight_denom(&self) -> i32 {
        i32::from(self.luma_log2_weight_denom) + i32::from(self.delta_chroma_log2_weight_denom)
    }

    /// `delta_chroma_offset_lX[i][j]` for a target ChromaOffsetLX[i][j],
    /// inverting equation 7-56 and clamping to the range of the syntax element.
    pub fn delta_chroma_offset(
        &self,
        chroma_offset: i32,
        delta_chroma_weight: i8,
        wp_offset_half_range_c: i32,
    ) -> i32 {
        let denom = self.chroma_log2_weight_denom().clamp(0, 7);
        let chroma_weight = (1 << denom) + i32::from(delta_chroma_weight);
        let delta = chroma_offset - wp_offset_half_range_c
            + ((wp_offset_half_range_c * chroma_weight) >> denom);

        delta.clamp(-4 * wp_offset_half_range_c, 4 * wp_offset_half_range_c - 1)
    }
}

/// The fields of `slice_segment_header()` (7.3.6.1) for one slice segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SliceHeader {
    pub first_slice_segment_in_pic_flag: bool,
    pub no_output_of_prior_pics_flag: bool,
    pub dependent_slice_segment_flag: bool,
    pub segment_address: u32,
    pub type_: SliceType,
    pub pic_output_flag: bool,
    pub colour_plane_id: u8,
    pub pic_order_cnt_lsb: u32,
    pub short_term_ref_pic_set_sps_flag: bool,
    /// The set coded in the slice header when `short_term_ref_pic_set_sps_flag`
    /// is not set. It takes index `num_short_term_ref_pic_sets`.
    pub short_term_ref_pic_set: ShortTermRefPicSet,
    pub short_term_ref_pic_set_idx: u8,

    pub num_long_term_sps: u8,
    pub num_long_term_pics: u8,
    pub lt_idx_sps: [u8; MAX_LONG_TERM_REF_PICS],
    pub poc_lsb_lt: [u32; MAX_LONG_TERM_REF_PICS],
    pub used_by_curr_pic_lt_flag: [bool; MAX_LONG_TERM_REF_PICS],
    pub delta_poc_msb_present_flag: [bool; MAX_LONG_TERM_REF_PICS],
    pub delta_poc_msb_cycle_lt: [u32; MAX_LONG_TERM_REF_PICS],

    pub temporal_mvp_enabled_flag: bool,
    pub sao_luma_flag: bool,
    pub sao_chroma_flag: bool,
    pub num_ref_idx_active_override_flag: bool,
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub ref_pic_list_modification: RefPicListModification,
    pub mvd_l1_zero_flag: bool,
    pub cabac_init_flag: bool,
    pub collocated_from_l0_flag: bool,
    pub collocated_ref_idx: u8,
    pub pred_weight_table: PredWeightTable,
    pub five_minus_max_num_merge_cand: u8,

    pub qp_delta: i8,
    pub cb_qp_offset: i8,
    pub cr_qp_offset: i8,
    pub cu_chroma_qp_offset_enabled_flag: bool,
    pub deblocking_filter_override_flag: bool,
    pub deblocking_filter_disabled_flag: bool,
    pub beta_offset_div2: i8,
    pub tc_offset_div2: i8,
    pub loop_filter_across_slices_enabled_flag: bool,

    pub offset_len_minus1: u8,
    /// `num_entry_point_offsets` is the length.
    pub entry_point_offset_minus1: Vec<u32>,
    /// `slice_segment_header_extension_length` is the length.
    pub slice_segment_header_extension_data: Vec<u8>,
}

impl SliceHeader {
    /// The number of entries of the long-term part of the RPS.
    pub fn num_long_term(&self) -> usize {
        usize::from(self.num_long_term_sps) + usize::from(self.num_long_term_pics)
    }

    /// UsedByCurrPicLt[i] (7-52).
    pub fn used_by_curr_pic_lt(&self, sps: &Sps, i: usize) -> bool {
        if i < usize::from(self.num_long_term_sps) {
            sps.used_by_curr_pic_lt_sps_flag
                .get(usize::from(self.lt_idx_sps[i]))
                .copied()
                .unwrap_or(false)
        } else {
            self.used_by_curr_pic_lt_flag[i]
        }
    }

    /// Whether the slice carries `pred_weight_table()` under `pps`.
    pub fn has_pred_weight_table(&self, pps: &Pps) -> bool {
        (pps.weighted_pred_flag && self.type_.is_p())
            || (pps.weighted_bipred_flag && self.type_.is_b())
    }
}

impl Default for SliceHeader {
    fn default() -> Self {
        Self {
            first_slice_segment_in_pic_flag: false,
            no_output_of_prior_pics_flag: false,
            dependent_slice_segment_flag: false,
            segment_address: 0,
            type_: Default::default(),
            pic_output_flag: true,
            colour_plane_id: 0,
            pic_order_cnt_lsb: 0,
            short_term_ref_pic_set_sps_flag: false,
            short_term_ref_pic_set: Default::default(),
            short_term_ref_pic_set_idx: 0,
            num_long_term_sps: 0,
            num_long_term_pics: 0,
            lt_idx_sps: [0; MAX_LONG_TERM_REF_PICS],
            poc_lsb_lt: [0; MAX_LONG_TERM_REF_PICS],
            used_by_curr_pic_lt_flag: [false; MAX_LONG_TERM_REF_PICS],
            delta_poc_msb_present_flag: [false; MAX_LONG_TERM_REF_PICS],
            delta_poc_msb_cycle_lt: [0; MAX_LONG_TERM_REF_PICS],
            temporal_mvp_enabled_flag: false,
            sao_luma_flag: false,
            sao_chroma_flag: false,
            num_ref_idx_active_override_flag: false,
            num_ref_idx_l0_active_minus1: 0,
            num_ref_idx_l1_active_minus1: 0,
            ref_pic_list_modification: Default::default(),
            mvd_l1_zero_flag: false,
            cabac_init_flag: false,
            collocated_from_l0_flag: true,
            collocated_ref_idx: 0,
            pred_weight_table: Default::default(),
            five_minus_max_num_merge_cand: 0,
            qp_delta: 0,
            cb_qp_offset: 0,
            cr_qp_offset: 0,
            cu_chroma_qp_offset_enabled_flag: false,
            deblocking_filter_override_flag: false,
            deblocking_filter_disabled_flag: false,
            beta_offset_div2: 0,
            tc_offset_div2: 0,
            loop_filter_across_slices_enabled_flag: false,
            offset_len_minus1: 0,
            entry_point_offset_minus1: Default::default(),
            slice_segment_header_extension_data: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_log2_widths() {
        assert_eq!(ceil_log2(0), 0);
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(4), 2);
        assert_eq!(ceil_log2(5), 3);
        assert_eq!(ceil_log2(240), 8);
        assert_eq!(ceil_log2(256), 8);
        assert_eq!(ceil_log2(257), 9);
        assert_eq!(ceil_log2(u32::MAX), 32);
    }

    #[test]
    fn nalu_type_classes() {
        assert!(NaluType::IdrNLp.is_idr());
        assert!(NaluType::IdrWRadl.is_irap());
        assert!(NaluType::CraNut.is_irap());
        assert!(NaluType::RsvIrapVcl23.is_irap());
        assert!(!NaluType::RsvVcl24.is_irap());
        assert!(!NaluType::CraNut.is_idr());
        assert!(NaluType::RsvVcl31.is_vcl());
        assert!(!NaluType::VpsNut.is_vcl());
        assert!(NaluType::AudNut.needs_zero_byte());
        assert!(!NaluType::PrefixSeiNut.needs_zero_byte());

        assert_eq!(NaluType::n(35), Some(NaluType::AudNut));
        assert_eq!(NaluType::n(64), None);
        assert_eq!(SliceType::n(2), Some(SliceType::I));
        assert_eq!(SliceType::n(3), None);
    }

    #[test]
    fn picture_size_in_ctbs() {
        let sps = Sps {
            pic_width_in_luma_samples: 1920,
            pic_height_in_luma_samples: 1080,
            log2_min_luma_coding_block_size_minus3: 0,
            log2_diff_max_min_luma_coding_block_size: 3,
            ..Default::default()
        };

        assert_eq!(sps.ctb_log2_size_y(), 6);
        assert_eq!(sps.pic_width_in_ctbs_y(), 30);
        assert_eq!(sps.pic_height_in_ctbs_y(), 17);
        assert_eq!(sps.pic_size_in_ctbs_y(), 510);
    }

    #[test]
    fn chroma_array_type() {
        let mut sps = Sps {
            chroma_format_idc: 3,
            ..Default::default()
        };
        assert_eq!(sps.chroma_array_type(), 3);

        sps.separate_colour_plane_flag = true;
        assert_eq!(sps.chroma_array_type(), 0);
    }

    #[test]
    fn wp_offset_half_range() {
        let mut sps = Sps {
            bit_depth_chroma_minus8: 2,
            ..Default::default()
        };
        assert_eq!(sps.wp_offset_half_range_c(), 128);

        sps.high_precision_offsets_enabled_flag = true;
        assert_eq!(sps.wp_offset_half_range_c(), 512);
    }

    #[test]
    fn delta_chroma_offset_inverts_derivation() {
        let pwt = PredWeightTable {
            luma_log2_weight_denom: 6,
            delta_chroma_log2_weight_denom: -1,
            ..Default::default()
        };
        let wp_off = 128;

        for delta_weight in [-20i8, 0, 7] {
            for offset in [-128, -5, 0, 3, 127] {
                let delta = pwt.delta_chroma_offset(offset, delta_weight, wp_off);
                // Equation 7-56.
                let weight = (1 << 5) + i32::from(delta_weight);
                let decoded =
                    (wp_off + delta - ((wp_off * weight) >> 5)).clamp(-wp_off, wp_off - 1);
                assert_eq!(decoded, offset);
            }
        }

        // Out of range targets saturate at the bounds of the syntax element.
        assert_eq!(pwt.delta_chroma_offset(10_000, 0, wp_off), 4 * wp_off - 1);
        assert_eq!(pwt.delta_chroma_offset(-10_000, 0, wp_off), -4 * wp_off);
    }

    #[test]
    fn inferred_defaults() {
        let slice = SliceHeader::default();
        assert!(slice.pic_output_flag);
        assert!(slice.collocated_from_l0_flag);

        let rps = ShortTermRefPicSet::default();
        assert!(rps.use_delta_flag.iter().all(|&f| f));

        assert_eq!(NaluHeader::default().nuh_temporal_id_plus1, 1);
    }
}
