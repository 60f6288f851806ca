/// Equivalent to `f32::trunc` but suitable on `no_std`.
#[inline]
pub(crate) fn truncf(x: f32) -> f32 {
    libm::truncf(x)
}
