#![allow(unsafe_code)]
use core::mem::transmute;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod x86_avx2;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod x86_ssse3;

bitflags::bitflags! {
    /// Hardware capabilities a kernel table or backend relies on.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CpuFlags: u32 {
        const SSSE3 = 1 << 0;
        const AVX2 = 1 << 1;
    }
}

impl CpuFlags {
    /// The capabilities of the executing CPU.
    ///
    /// With the `runtime-features` feature this queries the processor, otherwise only the
    /// features enabled at compile time are reported.
    pub fn detect() -> Self {
        #[allow(unused_mut)]
        let mut flags = CpuFlags::empty();

        #[cfg(all(
            feature = "runtime-features",
            any(target_arch = "x86", target_arch = "x86_64")
        ))]
        {
            if std::is_x86_feature_detected!("ssse3") {
                flags |= CpuFlags::SSSE3;
            }
            if std::is_x86_feature_detected!("avx2") {
                flags |= CpuFlags::AVX2;
            }
        }

        #[cfg(all(
            not(feature = "runtime-features"),
            any(target_arch = "x86", target_arch = "x86_64")
        ))]
        {
            if cfg!(target_feature = "ssse3") {
                flags |= CpuFlags::SSSE3;
            }
            if cfg!(target_feature = "avx2") {
                flags |= CpuFlags::AVX2;
            }
        }

        flags
    }
}

/// Bytes in one permutation lane.
pub const LANE: usize = 16;

/// Marks an output byte of a [`LaneShuffle`] as zero.
pub const ZERO_BYTE: u8 = 0x80;

/// A fixed byte permutation of one lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LaneShuffle {
    /// For each output byte the input byte it copies, or [`ZERO_BYTE`].
    pub table: [u8; LANE],
    /// Or-ed into the output after the permutation, `0xff` for all-ones bytes.
    pub ones: [u8; LANE],
    /// Input bytes consumed per lane.
    pub read: usize,
    /// Output bytes produced per lane.
    pub write: usize,
}

/// Permutes `lanes` consecutive lanes from `src` to `dst`.
///
/// Each lane loads and stores a full [`LANE`] bytes but only advances by `read` and `write`
/// respectively. Lanes which do not fit the slices are handled byte-wise, touching only bytes
/// within bounds.
pub(crate) type PermuteFn = fn(&[u8], &mut [u8], &LaneShuffle, usize);

pub(crate) struct LaneOps {
    pub(crate) permute: PermuteFn,
}

impl LaneOps {
    /// Select the best implementation for the given flags, limited to what the CPU supports.
    pub fn with_arch(mut self, flags: CpuFlags) -> Self {
        #[allow(unused_variables)]
        let flags = flags & CpuFlags::detect();

        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        if flags.contains(CpuFlags::SSSE3) {
            self.permute = unsafe {
                transmute::<unsafe fn(&[u8], &mut [u8], &LaneShuffle, usize), PermuteFn>(
                    x86_ssse3::permute,
                )
            };
        }

        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        if flags.contains(CpuFlags::AVX2 | CpuFlags::SSSE3) {
            self.permute = unsafe {
                transmute::<unsafe fn(&[u8], &mut [u8], &LaneShuffle, usize), PermuteFn>(
                    x86_avx2::permute,
                )
            };
        }

        self
    }

    fn permute(src: &[u8], dst: &mut [u8], shuffle: &LaneShuffle, lanes: usize) {
        for lane in 0..lanes {
            let input = src.get(lane * shuffle.read..).unwrap_or_default();
            let Some(output) = dst.get_mut(lane * shuffle.write..) else {
                return;
            };

            permute_lane(input, output, shuffle);
        }
    }
}

impl Default for LaneOps {
    fn default() -> Self {
        LaneOps {
            permute: Self::permute,
        }
    }
}

/// One lane, byte by byte, with missing input bytes reading as zero.
fn permute_lane(input: &[u8], output: &mut [u8], shuffle: &LaneShuffle) {
    for ((out, &idx), &ones) in output.iter_mut().zip(&shuffle.table).zip(&shuffle.ones) {
        let byte = input.get(usize::from(idx)).copied().unwrap_or(0);
        *out = (byte & as_u8mask(idx & ZERO_BYTE == 0)) | ones;
    }
}

fn as_u8mask(c: bool) -> u8 {
    0u8.wrapping_sub(c as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reverse3() -> LaneShuffle {
        let mut table = [ZERO_BYTE; LANE];
        for px in 0..5 {
            for b in 0..3 {
                table[3 * px + b] = (3 * px + 2 - b) as u8;
            }
        }

        LaneShuffle {
            table,
            ones: [0; LANE],
            read: 15,
            write: 15,
        }
    }

    #[test]
    fn portable_permute() {
        let src: Vec<u8> = (0..30).collect();
        let mut dst = vec![0xaa; 30];
        (LaneOps::default().permute)(&src, &mut dst, &reverse3(), 2);

        assert_eq!(&dst[..6], &[2, 1, 0, 5, 4, 3]);
        assert_eq!(&dst[27..], &[29, 28, 27]);
    }

    #[test]
    fn ones_and_zeros() {
        let mut shuffle = reverse3();
        shuffle.table[0] = ZERO_BYTE;
        shuffle.ones[1] = 0xff;

        let src = [1u8; 16];
        let mut dst = [0u8; 16];
        (LaneOps::default().permute)(&src, &mut dst, &shuffle, 1);
        assert_eq!(&dst[..3], &[0, 0xff, 1]);
    }

    #[test]
    fn arch_matches_portable() {
        let shuffle = reverse3();
        let src: Vec<u8> = (0..=255).cycle().take(15 * 40 + 1).collect();

        let mut expected = vec![0; 15 * 40 + 1];
        (LaneOps::default().permute)(&src, &mut expected, &shuffle, 40);

        let ops = LaneOps::default().with_arch(CpuFlags::detect());
        let mut actual = vec![0; 15 * 40 + 1];
        (ops.permute)(&src, &mut actual, &shuffle, 40);

        assert_eq!(expected, actual);
    }
}
