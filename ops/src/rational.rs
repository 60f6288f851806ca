//! Exact rational arithmetic.
//!
//! All constant folding in the analysis and the optimizer happens on these values, never on
//! floats, such that fused matrices stay exact. A value with a zero denominator is *undefined*
//! and absorbs every arithmetic operation.
use core::cmp::Ordering;
use core::fmt;
use core::ops::{Add, Div, Mul, Neg, Sub};

/// A reduced fraction `num / den` with `den > 0`, or the undefined value `0 / 0`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    num: i64,
    den: i64,
}

impl Rational {
    /// The undefined value, used for unknown bounds and unset constants.
    pub const UNDEF: Self = Rational { num: 0, den: 0 };
    pub const ZERO: Self = Rational { num: 0, den: 1 };
    pub const ONE: Self = Rational { num: 1, den: 1 };
    pub const HALF: Self = Rational { num: 1, den: 2 };

    /// Create a reduced fraction. A zero denominator yields [`Self::UNDEF`].
    pub fn new(num: i64, den: i64) -> Self {
        Self::reduce(i128::from(num), i128::from(den))
    }

    pub const fn integer(num: i64) -> Self {
        Rational { num, den: 1 }
    }

    pub const fn num(self) -> i64 {
        self.num
    }

    pub const fn den(self) -> i64 {
        self.den
    }

    pub const fn is_defined(self) -> bool {
        self.den != 0
    }

    pub const fn is_integer(self) -> bool {
        self.den == 1
    }

    /// Exactly zero, not merely undefined.
    pub const fn is_zero(self) -> bool {
        self.den != 0 && self.num == 0
    }

    pub const fn is_negative(self) -> bool {
        self.den != 0 && self.num < 0
    }

    /// Round toward zero.
    pub const fn trunc(self) -> Self {
        if self.den == 0 {
            return self;
        }

        Rational {
            num: self.num / self.den,
            den: 1,
        }
    }

    pub fn recip(self) -> Self {
        Self::reduce(i128::from(self.den), i128::from(self.num))
    }

    pub fn to_f32(self) -> f32 {
        self.to_f64() as f32
    }

    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            return f64::NAN;
        }

        self.num as f64 / self.den as f64
    }

    /// The exponent `k` if this value equals `2^k` for a non-zero `k`.
    pub fn exact_log2(self) -> Option<i32> {
        fn log2(x: i64) -> Option<i32> {
            if x > 1 && x.count_ones() == 1 {
                Some(x.trailing_zeros() as i32)
            } else {
                None
            }
        }

        match (self.num, self.den) {
            (n, 1) => log2(n),
            (1, d) => log2(d).map(|k| -k),
            _ => None,
        }
    }

    fn reduce(num: i128, den: i128) -> Self {
        if den == 0 {
            return Self::UNDEF;
        }

        let sign = if (num < 0) != (den < 0) { -1 } else { 1 };
        let (num, den) = (num.unsigned_abs(), den.unsigned_abs());
        let g = gcd(num, den);
        let (num, den) = (num / g, den / g);

        match (i64::try_from(num), i64::try_from(den)) {
            (Ok(num), Ok(den)) => Rational {
                num: sign * num,
                den,
            },
            _ => {
                let approx = Self::approximate(num, den);
                Rational {
                    num: sign * approx.num,
                    ..approx
                }
            }
        }
    }

    /// Best continued fraction approximation with both terms bounded by `i64::MAX`.
    fn approximate(mut num: u128, mut den: u128) -> Self {
        let max = i64::MAX as u128;
        let (mut a0n, mut a0d, mut a1n, mut a1d) = (0u128, 1u128, 1u128, 0u128);

        while den != 0 {
            let x = num / den;
            let next = (
                x.checked_mul(a1n).and_then(|v| v.checked_add(a0n)),
                x.checked_mul(a1d).and_then(|v| v.checked_add(a0d)),
            );

            match next {
                (Some(a2n), Some(a2d)) if a2n <= max && a2d <= max => {
                    (a0n, a0d, a1n, a1d) = (a1n, a1d, a2n, a2d);
                    (num, den) = (den, num - den * x);
                }
                _ => break,
            }
        }

        if a1d == 0 {
            // Larger than any representable value.
            return Rational {
                num: i64::MAX,
                den: 1,
            };
        }

        Rational {
            num: a1n as i64,
            den: a1d as i64,
        }
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }

    a.max(1)
}

impl Add for Rational {
    type Output = Rational;

    fn add(self, rhs: Self) -> Self {
        if !self.is_defined() || !rhs.is_defined() {
            return Self::UNDEF;
        }

        let (a, b) = (i128::from(self.num), i128::from(self.den));
        let (c, d) = (i128::from(rhs.num), i128::from(rhs.den));
        Self::reduce(a * d + c * b, b * d)
    }
}

impl Sub for Rational {
    type Output = Rational;

    fn sub(self, rhs: Self) -> Self {
        self + -rhs
    }
}

impl Mul for Rational {
    type Output = Rational;

    fn mul(self, rhs: Self) -> Self {
        if !self.is_defined() || !rhs.is_defined() {
            return Self::UNDEF;
        }

        let num = i128::from(self.num) * i128::from(rhs.num);
        let den = i128::from(self.den) * i128::from(rhs.den);
        Self::reduce(num, den)
    }
}

impl Div for Rational {
    type Output = Rational;

    fn div(self, rhs: Self) -> Self {
        if !self.is_defined() || !rhs.is_defined() {
            return Self::UNDEF;
        }

        self * rhs.recip()
    }
}

impl Neg for Rational {
    type Output = Rational;

    fn neg(self) -> Self {
        Rational {
            num: -self.num,
            den: self.den,
        }
    }
}

impl PartialOrd for Rational {
    /// Undefined values are unordered.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if !self.is_defined() || !other.is_defined() {
            return None;
        }

        let lhs = i128::from(self.num) * i128::from(other.den);
        let rhs = i128::from(other.num) * i128::from(self.den);
        Some(lhs.cmp(&rhs))
    }
}

impl From<i64> for Rational {
    fn from(num: i64) -> Self {
        Rational::integer(num)
    }
}

impl From<i32> for Rational {
    fn from(num: i32) -> Self {
        Rational::integer(num.into())
    }
}

impl From<u32> for Rational {
    fn from(num: u32) -> Self {
        Rational::integer(num.into())
    }
}

impl fmt::Debug for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.den {
            0 => f.write_str("_"),
            1 => write!(f, "{}", self.num),
            den => write!(f, "{}/{}", self.num, den),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Rational;

    #[test]
    fn reduced_and_signed() {
        let q = Rational::new(6, -4);
        assert_eq!((q.num(), q.den()), (-3, 2));
        assert_eq!(Rational::new(0, 5), Rational::ZERO);
        assert_eq!(Rational::new(3, 0), Rational::UNDEF);
    }

    #[test]
    fn undefined_absorbs() {
        let one = Rational::ONE;
        assert_eq!(one + Rational::UNDEF, Rational::UNDEF);
        assert_eq!(Rational::UNDEF * one, Rational::UNDEF);
        assert_eq!(one.partial_cmp(&Rational::UNDEF), None);
    }

    #[test]
    fn arithmetic() {
        let a = Rational::new(1, 3);
        let b = Rational::new(1, 6);
        assert_eq!(a + b, Rational::HALF);
        assert_eq!(a - b, b);
        assert_eq!(a * b, Rational::new(1, 18));
        assert_eq!(a / b, Rational::integer(2));
        assert!(a > b);
    }

    #[test]
    fn truncation() {
        assert_eq!(Rational::new(7, 2).trunc(), Rational::integer(3));
        assert_eq!(Rational::new(-7, 2).trunc(), Rational::integer(-3));
    }

    #[test]
    fn power_of_two() {
        assert_eq!(Rational::integer(8).exact_log2(), Some(3));
        assert_eq!(Rational::new(1, 16).exact_log2(), Some(-4));
        assert_eq!(Rational::ONE.exact_log2(), None);
        assert_eq!(Rational::integer(6).exact_log2(), None);
        assert_eq!(Rational::new(3, 4).exact_log2(), None);
    }

    #[test]
    fn overflow_approximates() {
        let big = Rational::new(i64::MAX, 3);
        let product = big * Rational::new(7, 5);
        assert!(product.is_defined());
        let expected = (i64::MAX as f64 / 3.0) * 1.4;
        assert!((product.to_f64() - expected).abs() / expected < 1e-12);
    }
}
