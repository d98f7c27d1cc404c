#![no_main]

use cros_hevc_packer::codec::h265::nalu_writer::write_ebsp;
use cros_hevc_packer::codec::h265::params::NaluHeader;
use cros_hevc_packer::codec::h265::params::NaluType;
use cros_hevc_packer::codec::h265::params::Pps;
use cros_hevc_packer::codec::h265::params::ShortTermRefPicSet;
use cros_hevc_packer::codec::h265::params::SliceHeader;
use cros_hevc_packer::codec::h265::params::SliceType;
use cros_hevc_packer::codec::h265::params::Sps;
use cros_hevc_packer::codec::h265::synthesizer::HeaderPacker;
use libfuzzer_sys::fuzz_target;

/// Hands out input bytes, then zeros once the input is exhausted.
struct Input<'a>(&'a [u8]);

impl Input<'_> {
    fn byte(&mut self) -> u8 {
        match self.0.split_first() {
            Some((b, rest)) => {
                self.0 = rest;
                *b
            }
            None => 0,
        }
    }

    fn flag(&mut self) -> bool {
        self.byte() & 1 == 1
    }

    fn word(&mut self) -> u32 {
        u32::from_be_bytes([self.byte(), self.byte(), self.byte(), self.byte()])
    }
}

fn short_term_ref_pic_set(input: &mut Input) -> ShortTermRefPicSet {
    let mut set = ShortTermRefPicSet {
        inter_ref_pic_set_prediction_flag: input.flag(),
        delta_idx_minus1: input.byte() & 3,
        delta_rps_sign: input.flag(),
        abs_delta_rps_minus1: u16::from(input.byte()),
        num_negative_pics: input.byte() & 0xf,
        num_positive_pics: input.byte() & 0xf,
        ..Default::default()
    };
    for i in 0..set.used_by_curr_pic_flag.len() {
        set.used_by_curr_pic_flag[i] = input.flag();
        set.use_delta_flag[i] = input.flag();
    }
    for i in 0..set.delta_poc_s0_minus1.len() {
        set.delta_poc_s0_minus1[i] = u16::from(input.byte());
        set.used_by_curr_pic_s0_flag[i] = input.flag();
        set.delta_poc_s1_minus1[i] = u16::from(input.byte());
        set.used_by_curr_pic_s1_flag[i] = input.flag();
    }
    set
}

fuzz_target!(|data: &[u8]| {
    let mut input = Input(data);

    let mut sps = Sps {
        chroma_format_idc: input.byte() & 3,
        separate_colour_plane_flag: input.flag(),
        pic_width_in_luma_samples: u16::from(input.byte()) << 4,
        pic_height_in_luma_samples: u16::from(input.byte()) << 4,
        log2_max_pic_order_cnt_lsb_minus4: input.byte() % 13,
        log2_min_luma_coding_block_size_minus3: input.byte() & 1,
        log2_diff_max_min_luma_coding_block_size: input.byte() & 3,
        sample_adaptive_offset_enabled_flag: input.flag(),
        long_term_ref_pics_present_flag: input.flag(),
        num_long_term_ref_pics_sps: input.byte() & 0x1f,
        temporal_mvp_enabled_flag: input.flag(),
        ..Default::default()
    };
    for _ in 0..input.byte() & 7 {
        sps.short_term_ref_pic_set.push(short_term_ref_pic_set(&mut input));
    }

    let pps = Pps {
        dependent_slice_segments_enabled_flag: input.flag(),
        output_flag_present_flag: input.flag(),
        num_extra_slice_header_bits: input.byte() & 7,
        cabac_init_present_flag: input.flag(),
        num_ref_idx_l0_default_active_minus1: input.byte() & 0xf,
        num_ref_idx_l1_default_active_minus1: input.byte() & 0xf,
        weighted_pred_flag: input.flag(),
        weighted_bipred_flag: input.flag(),
        tiles_enabled_flag: input.flag(),
        entropy_coding_sync_enabled_flag: input.flag(),
        loop_filter_across_slices_enabled_flag: input.flag(),
        deblocking_filter_override_enabled_flag: input.flag(),
        lists_modification_present_flag: input.flag(),
        slice_segment_header_extension_present_flag: input.flag(),
        ..Default::default()
    };

    let mut packer = HeaderPacker::new();
    if packer.load_sps(sps).is_err() || packer.load_pps(pps).is_err() {
        return;
    }

    let nalu = NaluHeader {
        type_: NaluType::n(u32::from(input.byte() & 0x1f)).unwrap_or_default(),
        ..Default::default()
    };

    let mut slice = SliceHeader {
        first_slice_segment_in_pic_flag: input.flag(),
        dependent_slice_segment_flag: input.flag(),
        segment_address: u32::from(input.byte()),
        type_: SliceType::n(u32::from(input.byte() % 3)).unwrap_or_default(),
        pic_order_cnt_lsb: u32::from(input.byte()),
        short_term_ref_pic_set_sps_flag: input.flag(),
        short_term_ref_pic_set: short_term_ref_pic_set(&mut input),
        short_term_ref_pic_set_idx: input.byte() & 7,
        num_long_term_sps: input.byte() & 3,
        num_long_term_pics: input.byte() & 3,
        temporal_mvp_enabled_flag: input.flag(),
        num_ref_idx_active_override_flag: input.flag(),
        num_ref_idx_l0_active_minus1: input.byte() & 0xf,
        num_ref_idx_l1_active_minus1: input.byte() & 0xf,
        collocated_from_l0_flag: input.flag(),
        collocated_ref_idx: input.byte() & 0xf,
        qp_delta: input.byte() as i8,
        offset_len_minus1: input.byte() & 0x1f,
        ..Default::default()
    };
    for i in 0..slice.num_long_term() {
        slice.lt_idx_sps[i] = input.byte() & 0x1f;
        slice.poc_lsb_lt[i] = u32::from(input.byte());
        slice.delta_poc_msb_present_flag[i] = input.flag();
        slice.delta_poc_msb_cycle_lt[i] = input.word();
    }
    for _ in 0..input.byte() & 3 {
        slice.entry_point_offset_minus1.push(input.word());
    }

    let mut window = vec![0u8; usize::from(input.byte())];
    let bit_offset = input.byte() & 7;
    let before = window.clone();

    match packer.pack_slice_segment_header(&nalu, &slice, &mut window, bit_offset, input.flag()) {
        Ok(packed) => {
            let len = (packed.bit_size + usize::from(bit_offset)).div_ceil(8);
            let _ = write_ebsp(Vec::new(), &window[..len], packed.skip_emulation_check_count);
        }
        Err(_) => assert_eq!(window, before),
    }
});
