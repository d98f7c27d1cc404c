#![no_main]

use cros_hevc_packer::bitstream_utils::BitWriter;
use cros_hevc_packer::codec::h265::cabac::CabacContext;
use cros_hevc_packer::codec::h265::cabac::CabacEncoder;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&head, ops)) = data.split_first() else {
        return;
    };

    let mut buf = vec![0u8; usize::from(head >> 3) + 1];
    let Ok(mut writer) = BitWriter::new(&mut buf, head & 7) else {
        return;
    };

    // The first half of the input drives the bit writer directly.
    let (raw, bins) = ops.split_at(ops.len() / 2);
    for chunk in raw.chunks(5) {
        let value = chunk.iter().fold(0u32, |acc, b| acc << 8 | u32::from(*b));
        let result = match chunk[0] % 5 {
            0 => writer.put_bits(usize::from(chunk[0] >> 3), value),
            1 => writer.put_bit(value & 1 == 1),
            2 => writer.put_ue(value),
            3 => writer.put_se(value as i32),
            _ => writer.put_trailing_bits(value & 1 == 1),
        };
        if result.is_err() {
            return;
        }
    }

    let mut ctxs = [CabacContext::init(154, 26), CabacContext::new(0, true)];
    let mut cabac = CabacEncoder::new(&mut writer);
    for byte in bins {
        let bin = byte & 1 == 1;
        let result = match byte >> 6 {
            0 => cabac.encode_bin(&mut ctxs[usize::from(byte >> 1 & 1)], bin),
            1 => cabac.encode_bin_ep(bin),
            _ => cabac.encode_bin_trm(bin && byte >> 2 & 0xf == 0),
        };
        if result.is_err() {
            return;
        }
    }

    let _ = cabac.slice_finish();
});
