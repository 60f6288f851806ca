#[cfg(target_arch = "x86")]
use core::arch::x86::{__m128i, __m256i, _mm256_or_si256, _mm256_set_m128i, _mm256_shuffle_epi8};
#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::{
    __m128i, __m256i, _mm256_or_si256, _mm256_set_m128i, _mm256_shuffle_epi8,
};

use super::{LaneShuffle, LANE};

#[target_feature(enable = "avx2")]
pub unsafe fn permute(src: &[u8], dst: &mut [u8], shuffle: &LaneShuffle, lanes: usize) {
    // Two lanes per register only work if they are back to back in memory.
    if shuffle.read != LANE || shuffle.write != LANE {
        return super::x86_ssse3::permute(src, dst, shuffle, lanes);
    }

    let table: __m128i = bytemuck::cast(shuffle.table);
    let ones: __m128i = bytemuck::cast(shuffle.ones);
    // The byte shuffle selects within each 128-bit half, the same table serves both.
    let table = _mm256_set_m128i(table, table);
    let ones = _mm256_set_m128i(ones, ones);

    let pairs = lanes / 2;
    let mut src_pairs = src.chunks_exact(2 * LANE);
    let mut dst_pairs = dst.chunks_exact_mut(2 * LANE);
    let mut done = 0;
    for (input, output) in (&mut src_pairs).zip(&mut dst_pairs).take(pairs) {
        let vec: __m256i = bytemuck::pod_read_unaligned(input);
        let vec = _mm256_or_si256(_mm256_shuffle_epi8(vec, table), ones);
        output.copy_from_slice(bytemuck::bytes_of(&vec));
        done += 2;
    }

    let src = src.get(done * LANE..).unwrap_or_default();
    let Some(dst) = dst.get_mut(done * LANE..) else {
        return;
    };
    super::x86_ssse3::permute(src, dst, shuffle, lanes - done);
}
