#[cfg(target_arch = "x86")]
use core::arch::x86::{__m128i, _mm_or_si128, _mm_shuffle_epi8};
#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::{__m128i, _mm_or_si128, _mm_shuffle_epi8};

use super::{LaneShuffle, LANE};

#[target_feature(enable = "ssse3")]
pub unsafe fn permute(src: &[u8], dst: &mut [u8], shuffle: &LaneShuffle, lanes: usize) {
    // The flag bit 0x80 of the table writes a `0` instead of an element.
    let table: __m128i = bytemuck::cast(shuffle.table);
    let ones: __m128i = bytemuck::cast(shuffle.ones);

    for lane in 0..lanes {
        let input = src.get(lane * shuffle.read..).unwrap_or_default();
        let Some(output) = dst.get_mut(lane * shuffle.write..) else {
            return;
        };

        match (input.get(..LANE), output.get_mut(..LANE)) {
            (Some(input), Some(output)) => {
                let vec: __m128i = bytemuck::pod_read_unaligned(input);
                let vec = _mm_or_si128(_mm_shuffle_epi8(vec, table), ones);
                output.copy_from_slice(bytemuck::bytes_of(&vec));
            }
            _ => super::permute_lane(input, output, shuffle),
        }
    }
}
