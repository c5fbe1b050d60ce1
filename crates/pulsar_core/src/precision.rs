use num_traits::{FromPrimitive, Num, One, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{
    Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, RemAssign, Sub, SubAssign,
};
use std::str::FromStr;
use thiserror::Error;

/// Digits after the decimal point printed when no precision is requested.
const DEFAULT_DECIMALS: usize = 20;

/// Decimal digits carried by a double-double; requested digits beyond this print as zeros.
const MAX_DECIMALS: usize = 34;

/// Largest power of ten applied in one scaling step (10^300 is finite in `f64`).
const MAX_POW10_STEP: u32 = 300;

/// Decimal exponents a parsed literal may need before it is rejected as out of range.
const MAX_DECIMAL_EXPONENT: i64 = 340;

/// Double-double number: the unevaluated sum `hi + lo` with `|lo| <= ulp(hi) / 2`.
///
/// Gives roughly 106 bits of mantissa, enough to hold a multi-year phase count
/// (~1e10 cycles) while keeping sub-nanocycle resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Dd {
    pub hi: f64,
    pub lo: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid high-precision number: {0:?}")]
pub struct ParseDdError(pub String);

/// Error-free sum: `a + b == s + err` exactly.
#[inline]
pub fn two_sum(a: f64, b: f64) -> (f64, f64) {
    let s = a + b;
    let bb = s - a;
    let err = (a - (s - bb)) + (b - bb);
    (s, err)
}

/// Error-free sum assuming `|a| >= |b|`.
#[inline]
pub fn quick_two_sum(a: f64, b: f64) -> (f64, f64) {
    let s = a + b;
    let err = b - (s - a);
    (s, err)
}

/// Error-free product via fused multiply-add.
#[inline]
pub fn two_prod(a: f64, b: f64) -> (f64, f64) {
    let p = a * b;
    let err = a.mul_add(b, -p);
    (p, err)
}

impl Dd {
    pub const ZERO: Dd = Dd { hi: 0.0, lo: 0.0 };
    pub const ONE: Dd = Dd { hi: 1.0, lo: 0.0 };

    /// Builds a normalized value from two arbitrary components.
    pub fn new(hi: f64, lo: f64) -> Self {
        let (s, e) = two_sum(hi, lo);
        Self::renorm(s, e)
    }

    #[inline]
    fn renorm(hi: f64, lo: f64) -> Self {
        if !hi.is_finite() {
            return Self { hi, lo: 0.0 };
        }
        let (hi, lo) = quick_two_sum(hi, lo);
        Self { hi, lo }
    }

    pub fn from_f64(value: f64) -> Self {
        Self { hi: value, lo: 0.0 }
    }

    /// Exact conversion for every `i64`.
    pub fn from_i64(value: i64) -> Self {
        let hi = value as f64;
        let lo = (value as i128 - hi as i128) as f64;
        Self::new(hi, lo)
    }

    pub fn to_f64(self) -> f64 {
        self.hi + self.lo
    }

    pub fn is_finite(self) -> bool {
        self.hi.is_finite() && self.lo.is_finite()
    }

    pub fn is_sign_negative(self) -> bool {
        self.hi < 0.0 || (self.hi == 0.0 && self.lo < 0.0)
    }

    pub fn abs(self) -> Self {
        if self.is_sign_negative() {
            -self
        } else {
            self
        }
    }

    pub fn floor(self) -> Self {
        let hi = self.hi.floor();
        if hi == self.hi {
            Self::renorm(hi, self.lo.floor())
        } else {
            Self { hi, lo: 0.0 }
        }
    }

    pub fn ceil(self) -> Self {
        -(-self).floor()
    }

    pub fn trunc(self) -> Self {
        if self.is_sign_negative() {
            self.ceil()
        } else {
            self.floor()
        }
    }

    /// Nearest integer, halves rounded up.
    pub fn round(self) -> Self {
        (self + 0.5).floor()
    }

    /// Signed distance to the nearest integer, in `[-0.5, 0.5)`.
    pub fn frac_to_nearest(self) -> Self {
        self - self.round()
    }

    pub fn powi(self, n: i32) -> Self {
        let mut result = Self::ONE;
        let mut base = self;
        let mut exp = n.unsigned_abs();
        while exp > 0 {
            if exp & 1 == 1 {
                result = result * base;
            }
            base = base * base;
            exp >>= 1;
        }
        if n < 0 {
            Self::ONE / result
        } else {
            result
        }
    }

    /// `self * 10^exponent`, applied in steps small enough that no power of ten overflows.
    fn scale_pow10(self, exponent: i64) -> Self {
        let mut value = self;
        let mut remaining = exponent;
        while remaining != 0 {
            let step = remaining.unsigned_abs().min(u64::from(MAX_POW10_STEP)) as u32;
            let ten_pow = Self::from_f64(10.0).powi(step as i32);
            if remaining > 0 {
                value = value * ten_pow;
                remaining -= i64::from(step);
            } else {
                value = value / ten_pow;
                remaining += i64::from(step);
            }
        }
        value
    }

    fn write_fixed(self, decimals: usize, out: &mut String) -> fmt::Result {
        use std::fmt::Write;

        let computed = decimals.min(MAX_DECIMALS);
        let half_ulp = Self::from_f64(0.5).scale_pow10(-(computed as i64));
        let rounded = self.abs() + half_ulp;
        let int_part = rounded.floor();
        if int_part.hi >= 1e30 {
            if self.is_sign_negative() {
                out.push('-');
            }
            write!(out, "{:e}", rounded.to_f64())?;
            return Ok(());
        }
        let whole = int_part.hi as i128 + int_part.lo as i128;
        let mut digits = String::new();
        let mut frac = rounded - int_part;
        for _ in 0..computed {
            frac = frac * 10.0;
            let digit = frac.floor();
            let d = digit.hi.clamp(0.0, 9.0) as u8;
            digits.push(char::from(b'0' + d));
            frac = frac - digit;
        }
        // No sign on a value that rounds to zero.
        if self.is_sign_negative() && (whole != 0 || digits.bytes().any(|b| b != b'0')) {
            out.push('-');
        }
        write!(out, "{whole}")?;
        if decimals == 0 {
            return Ok(());
        }
        out.push('.');
        out.push_str(&digits);
        out.extend(std::iter::repeat('0').take(decimals - computed));
        Ok(())
    }
}

impl From<f64> for Dd {
    fn from(value: f64) -> Self {
        Self::from_f64(value)
    }
}

impl Zero for Dd {
    fn zero() -> Self {
        Self::ZERO
    }
    fn is_zero(&self) -> bool {
        self.hi == 0.0 && self.lo == 0.0
    }
}

impl One for Dd {
    fn one() -> Self {
        Self::ONE
    }
}

impl Add for Dd {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        let (s, e) = two_sum(self.hi, rhs.hi);
        if !s.is_finite() {
            return Self { hi: s, lo: 0.0 };
        }
        let (t, f) = two_sum(self.lo, rhs.lo);
        let (s, e) = quick_two_sum(s, e + t);
        Self::renorm(s, e + f)
    }
}

impl Add<f64> for Dd {
    type Output = Self;
    fn add(self, rhs: f64) -> Self {
        let (s, e) = two_sum(self.hi, rhs);
        if !s.is_finite() {
            return Self { hi: s, lo: 0.0 };
        }
        Self::renorm(s, e + self.lo)
    }
}

impl Sub for Dd {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self + (-rhs)
    }
}

impl Sub<f64> for Dd {
    type Output = Self;
    fn sub(self, rhs: f64) -> Self {
        self + (-rhs)
    }
}

impl Mul for Dd {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        let (p, e) = two_prod(self.hi, rhs.hi);
        if !p.is_finite() {
            return Self { hi: p, lo: 0.0 };
        }
        Self::renorm(p, e + (self.hi * rhs.lo + self.lo * rhs.hi))
    }
}

impl Mul<f64> for Dd {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        let (p, e) = two_prod(self.hi, rhs);
        if !p.is_finite() {
            return Self { hi: p, lo: 0.0 };
        }
        Self::renorm(p, e + self.lo * rhs)
    }
}

impl Div for Dd {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let q1 = self.hi / rhs.hi;
        if rhs.hi.is_infinite() || !q1.is_finite() {
            return Self { hi: q1, lo: 0.0 };
        }
        let r = self - rhs * q1;
        let q2 = r.hi / rhs.hi;
        let r = r - rhs * q2;
        let q3 = r.hi / rhs.hi;
        let (q1, q2) = quick_two_sum(q1, q2);
        Self { hi: q1, lo: q2 } + q3
    }
}

impl Div<f64> for Dd {
    type Output = Self;
    fn div(self, rhs: f64) -> Self {
        self / Self::from_f64(rhs)
    }
}

impl Neg for Dd {
    type Output = Self;
    fn neg(self) -> Self {
        Self {
            hi: -self.hi,
            lo: -self.lo,
        }
    }
}

impl Rem for Dd {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        self - (self / rhs).trunc() * rhs
    }
}

impl AddAssign for Dd {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
impl SubAssign for Dd {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}
impl MulAssign for Dd {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}
impl DivAssign for Dd {
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}
impl RemAssign for Dd {
    fn rem_assign(&mut self, rhs: Self) {
        *self = *self % rhs;
    }
}

impl Sum for Dd {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc + x)
    }
}

impl Num for Dd {
    type FromStrRadixErr = ParseDdError;
    fn from_str_radix(text: &str, radix: u32) -> Result<Self, Self::FromStrRadixErr> {
        if radix != 10 {
            return Err(ParseDdError(text.to_string()));
        }
        text.parse()
    }
}

impl ToPrimitive for Dd {
    fn to_i64(&self) -> Option<i64> {
        if !self.is_finite() {
            return None;
        }
        let t = self.trunc();
        i64::try_from(t.hi as i128 + t.lo as i128).ok()
    }
    fn to_u64(&self) -> Option<u64> {
        if !self.is_finite() {
            return None;
        }
        let t = self.trunc();
        u64::try_from(t.hi as i128 + t.lo as i128).ok()
    }
    fn to_f64(&self) -> Option<f64> {
        Some(Dd::to_f64(*self))
    }
}

impl FromPrimitive for Dd {
    fn from_i64(n: i64) -> Option<Self> {
        Some(Dd::from_i64(n))
    }
    fn from_u64(n: u64) -> Option<Self> {
        let hi = n as f64;
        let lo = (n as i128 - hi as i128) as f64;
        Some(Self::new(hi, lo))
    }
    fn from_f64(n: f64) -> Option<Self> {
        Some(Dd::from_f64(n))
    }
}

impl num_traits::NumCast for Dd {
    fn from<T: ToPrimitive>(n: T) -> Option<Self> {
        n.to_f64().map(Dd::from_f64)
    }
}

impl FromStr for Dd {
    type Err = ParseDdError;

    /// Parses a decimal literal (`-55000.123456789012345678`, `1.5e-15`) without
    /// passing through `f64`.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseDdError(text.to_string());
        let trimmed = text.trim();
        let (negative, body) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };
        let (mantissa, exponent) = match body.find(|c: char| c == 'e' || c == 'E') {
            Some(pos) => {
                let exponent = body[pos + 1..].parse::<i32>().map_err(|_| invalid())?;
                (&body[..pos], exponent)
            }
            None => (body, 0),
        };
        let (int_digits, frac_digits) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        if int_digits.is_empty() && frac_digits.is_empty() {
            return Err(invalid());
        }

        let mut value = Dd::ZERO;
        for ch in int_digits.chars().chain(frac_digits.chars()) {
            let digit = ch.to_digit(10).ok_or_else(invalid)?;
            value = value * 10.0 + digit as f64;
        }
        if value == Dd::ZERO {
            return Ok(if negative { -value } else { value });
        }
        let scale = i64::try_from(frac_digits.len())
            .ok()
            .and_then(|len| i64::from(exponent).checked_sub(len))
            .filter(|scale| scale.abs() <= MAX_DECIMAL_EXPONENT)
            .ok_or_else(invalid)?;
        let value = value.scale_pow10(scale);
        // Overflow and underflow into subnormals are both out of range.
        if !value.is_finite() || value.hi.abs() < f64::MIN_POSITIVE {
            return Err(invalid());
        }
        Ok(if negative { -value } else { value })
    }
}

impl fmt::Display for Dd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_finite() {
            return write!(f, "{}", self.hi);
        }
        let mut out = String::new();
        self.write_fixed(f.precision().unwrap_or(DEFAULT_DECIMALS), &mut out)?;
        f.pad(&out)
    }
}

/// Evaluates the Taylor series `Σ coeffs[i] * x^i / i!` with Horner's scheme.
///
/// Generic so the same routine runs in `f64` and in [`Dd`].
pub fn taylor_horner<T>(x: T, coeffs: &[T]) -> T
where
    T: Copy + Zero + Add<Output = T> + Mul<Output = T> + Div<f64, Output = T>,
{
    let mut result = T::zero();
    let mut fact = coeffs.len() as f64;
    for &coeff in coeffs.iter().rev() {
        result = result * x / fact + coeff;
        fact -= 1.0;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn two_sum_recovers_rounding_error() {
        let (s, e) = two_sum(1.0, 1e-20);
        assert_eq!(s, 1.0);
        assert_eq!(e, 1e-20);
    }

    #[test]
    fn two_prod_is_exact() {
        let a = 1.0 + f64::EPSILON;
        let (p, e) = two_prod(a, a);
        // (1 + eps)^2 = 1 + 2 eps + eps^2; eps^2 is lost by the plain product.
        assert_eq!(p, 1.0 + 2.0 * f64::EPSILON);
        assert_eq!(e, f64::EPSILON * f64::EPSILON);
    }

    #[test]
    fn addition_keeps_bits_lost_in_f64() {
        let big = Dd::from_f64(1e10);
        let tiny = Dd::from_f64(1e-10);
        let sum = big + tiny;
        assert_eq!(sum.hi, 1e10);
        assert_relative_eq!((sum - big).to_f64(), 1e-10, max_relative = 1e-15);
    }

    #[test]
    fn division_round_trips_through_multiplication() {
        let third = Dd::ONE / Dd::from_f64(3.0);
        let back = third * 3.0;
        assert!((back - Dd::ONE).abs().to_f64() < 1e-30);
    }

    #[test]
    fn from_i64_is_exact_beyond_f64_mantissa() {
        let n = (1_i64 << 60) + 1;
        let value = Dd::from_i64(n);
        assert_eq!(ToPrimitive::to_i64(&value), Some(n));
    }

    #[test]
    fn floor_and_round_handle_split_components() {
        let x = Dd::new(4.0, -1e-20);
        assert_eq!(x.floor(), Dd::from_f64(3.0));
        assert_eq!(x.round(), Dd::from_f64(4.0));
        assert_eq!(Dd::from_f64(-2.5).floor(), Dd::from_f64(-3.0));
        assert_eq!(Dd::from_f64(-2.25).trunc(), Dd::from_f64(-2.0));
        let resid = Dd::new(8_640_000.0, 1e-9).frac_to_nearest();
        assert_relative_eq!(resid.to_f64(), 1e-9, max_relative = 1e-12);
    }

    #[test]
    fn parses_more_digits_than_f64_holds() {
        let value: Dd = "55000.123456789012345678".parse().unwrap();
        let int = Dd::from_f64(55000.0);
        let frac = (value - int).to_f64();
        assert_relative_eq!(frac, 0.123456789012345678, max_relative = 1e-16);
        // The low word carries the digits beyond the 16th.
        assert!(value.lo != 0.0);
    }

    #[test]
    fn parses_signs_and_exponents() {
        let f1: Dd = "-1.5e-15".parse().unwrap();
        assert_relative_eq!(f1.to_f64(), -1.5e-15, max_relative = 1e-15);
        let big: Dd = "+2E3".parse().unwrap();
        assert_eq!(big, Dd::from_f64(2000.0));
        assert!("".parse::<Dd>().is_err());
        assert!("1.2.3".parse::<Dd>().is_err());
        assert!("12x".parse::<Dd>().is_err());
    }

    #[test]
    fn rejects_exponents_outside_f64_range() {
        assert!("1e-400".parse::<Dd>().is_err());
        assert!("1e400".parse::<Dd>().is_err());
        assert!("1.5e-2147483648".parse::<Dd>().is_err());
        assert!("1.5e2147483647".parse::<Dd>().is_err());
        assert!("1e99999999999".parse::<Dd>().is_err());
        // Subnormal results are out of range too.
        assert!("1e-330".parse::<Dd>().is_err());
    }

    #[test]
    fn parses_values_near_f64_limits() {
        let tiny: Dd = "2.5e-300".parse().unwrap();
        assert_relative_eq!(tiny.to_f64(), 2.5e-300, max_relative = 1e-15);
        let huge: Dd = "1.7e308".parse().unwrap();
        assert!(huge.is_finite());
        assert_relative_eq!(huge.to_f64(), 1.7e308, max_relative = 1e-15);
        // A zero literal is zero whatever its exponent.
        assert_eq!("0e-9999".parse::<Dd>().unwrap(), Dd::ZERO);
        assert_eq!("-0.000".parse::<Dd>().unwrap().to_f64(), 0.0);
    }

    #[test]
    fn division_by_infinity_is_zero() {
        let q = Dd::from_f64(0.5) / Dd::from_f64(f64::INFINITY);
        assert_eq!(q.to_f64(), 0.0);
        assert!(!q.hi.is_nan());
    }

    #[test]
    fn num_cast_goes_through_f64() {
        let cast: Dd = num_traits::cast(3_u32).unwrap();
        assert_eq!(cast, Dd::from_f64(3.0));
        assert_eq!(<Dd as num_traits::NumCast>::from(-0.25_f32), Some(Dd::from_f64(-0.25)));
    }

    #[test]
    fn display_drops_sign_of_rounded_zero() {
        assert_eq!(format!("{:.3}", Dd::from_f64(-1e-4)), "0.000");
        assert_eq!(format!("{:.0}", Dd::from_f64(-0.2)), "0");
        assert_eq!(format!("{:.2}", Dd::from_f64(-0.006)), "-0.01");
    }

    #[test]
    fn display_pads_precision_beyond_double_double() {
        let text = format!("{:.400}", Dd::from_f64(1.5));
        assert_eq!(text.len(), 402);
        assert!(text.starts_with("1.5000"));
        assert!(text[3..].bytes().all(|b| b == b'0'));
    }

    #[test]
    fn display_prints_requested_decimals() {
        let value: Dd = "55000.123456789012345678".parse().unwrap();
        assert_eq!(format!("{value:.18}"), "55000.123456789012345678");
        assert_eq!(format!("{:.3}", Dd::from_f64(-2.71828)), "-2.718");
        assert_eq!(format!("{:.0}", Dd::from_f64(2.4)), "2");
    }

    #[test]
    fn taylor_horner_matches_closed_form() {
        // 1 + 2x + 3x^2/2 + 4x^3/6 at x = 0.5
        let coeffs = [1.0, 2.0, 3.0, 4.0];
        let x = 0.5;
        let expected = 1.0 + 2.0 * x + 3.0 * x * x / 2.0 + 4.0 * x * x * x / 6.0;
        assert_relative_eq!(taylor_horner(x, &coeffs), expected, max_relative = 1e-15);

        let dd_coeffs: Vec<Dd> = coeffs.iter().map(|&c| Dd::from_f64(c)).collect();
        let dd = taylor_horner(Dd::from_f64(x), &dd_coeffs);
        assert_relative_eq!(dd.to_f64(), expected, max_relative = 1e-15);
    }

    #[test]
    fn taylor_horner_of_empty_series_is_zero() {
        assert_eq!(taylor_horner(Dd::from_f64(3.0), &[]), Dd::ZERO);
    }
}
