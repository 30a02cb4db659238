//! Modular arithmetic over single machine words.
//!
//! Every constant the compiler bakes into an instruction stream flows through
//! these functions, so the reduction algorithms are reproduced bit-for-bit;
//! a different-but-correct reduction would still break Montgomery-domain
//! consistency with the accelerator's tables.

use crate::error::ArithError;
use crate::wide::divide_uint3_inplace;
use crate::word::{add_uint, multiply_uint, Word};

/// Modular addition. Requires `operand1, operand2 < modulus`.
#[inline]
pub fn add_uint_mod<T: Word>(operand1: T, operand2: T, modulus: T) -> T {
    let res = operand1.wrapping_add(&operand2);
    if res >= modulus {
        res - modulus
    } else {
        res
    }
}

/// Modular negation: `0` maps to `0`, everything else to `modulus - operand`.
#[inline]
pub fn negate_uint_mod<T: Word>(operand: T, modulus: T) -> T {
    let non_zero = if operand != T::zero() { T::one() } else { T::zero() };
    (modulus - operand) & T::zero().wrapping_sub(&non_zero)
}

/// Modular multiplication via Barrett reduction.
///
/// The 3-word reciprocal `floor(2^(2w) / modulus)` is re-derived on every
/// call; downstream tables depend on this exact derivation. The quotient
/// estimate is corrected by at most one subtraction, which requires the
/// modulus to leave two high bits of headroom (`modulus < 2^(w-2)`); RNS
/// channel primes always do.
///
/// Panics if `modulus` is zero.
pub fn multiply_uint_mod<T: Word>(operand1: T, operand2: T, modulus: T) -> T {
    assert!(modulus != T::zero(), "modulus cannot be zero");

    let (prod_lo, prod_hi) = multiply_uint(operand1, operand2);

    let mut numerator = [T::zero(), T::zero(), T::one()];
    let mut quotient = [T::zero(); 3];
    divide_uint3_inplace(&mut numerator, modulus, &mut quotient);
    let const_ratio = [quotient[0], quotient[1], numerator[0]];

    fn flag<T: Word>(carry: u8) -> T {
        if carry != 0 {
            T::one()
        } else {
            T::zero()
        }
    }

    let mut tmp1 = T::zero();
    let carry = multiply_uint(prod_lo, const_ratio[0]);

    let tmp2 = multiply_uint(prod_lo, const_ratio[1]);
    let tmp3 = tmp2.1.wrapping_add(&flag(add_uint(tmp2.0, carry.1, &mut tmp1)));

    let tmp2 = multiply_uint(prod_hi, const_ratio[0]);
    let partial = tmp1;
    let carry_hi = tmp2.1.wrapping_add(&flag(add_uint(partial, tmp2.0, &mut tmp1)));

    let tmp1 = prod_hi
        .wrapping_mul(&const_ratio[1])
        .wrapping_add(&tmp3)
        .wrapping_add(&carry_hi);
    let tmp3 = prod_lo.wrapping_sub(&tmp1.wrapping_mul(&modulus));

    if tmp3 >= modulus {
        tmp3 - modulus
    } else {
        tmp3
    }
}

/// Modular exponentiation by LSB-first square-and-multiply.
///
/// The bit-scan order is part of the contract: twiddle tables are reproduced
/// from it.
pub fn exponentiate_uint_mod<T: Word>(operand: T, exponent: T, modulus: T) -> T {
    if exponent == T::zero() {
        return T::one();
    }
    if exponent == T::one() {
        return operand;
    }

    let mut exponent = exponent;
    let mut power = operand;
    let mut intermediate = T::one();
    loop {
        if (exponent & T::one()) == T::one() {
            intermediate = multiply_uint_mod(power, intermediate, modulus);
        }
        exponent = exponent >> 1;
        if exponent == T::zero() {
            break;
        }
        power = multiply_uint_mod(power, power, modulus);
    }
    intermediate
}

/// Iterative extended Euclidean algorithm.
///
/// Returns `(gcd, a, b)` with `a * x + b * y == gcd`. The Bezout
/// coefficients are carried in the next wider signed type so the iteration
/// cannot overflow for any word-sized inputs.
pub fn xgcd<T: Word>(x: T, y: T) -> (T, T::Signed, T::Signed) {
    let one = <T::Signed as num_traits::One>::one();
    let zero = <T::Signed as num_traits::Zero>::zero();

    let mut x = x;
    let mut y = y;
    let mut prev_a = one;
    let mut a = zero;
    let mut prev_b = zero;
    let mut b = one;

    while y != T::zero() {
        let q = (x / y).to_signed();
        let r = x % y;
        x = y;
        y = r;

        let tmp = a;
        a = prev_a - a * q;
        prev_a = tmp;

        let tmp = b;
        b = prev_b - b * q;
        prev_b = tmp;
    }
    (x, prev_a, prev_b)
}

/// Modular inverse, or `None` when `value` is zero or shares a factor with
/// the modulus.
pub fn try_invert_uint_mod<T: Word>(value: T, modulus: T) -> Option<T> {
    if value == T::zero() {
        return None;
    }

    let (gcd, a, _) = xgcd(value, modulus);
    if gcd != T::one() {
        return None;
    }
    let zero = <T::Signed as num_traits::Zero>::zero();
    if a < zero {
        Some(T::from_signed(a + modulus.to_signed()))
    } else {
        Some(T::from_signed(a))
    }
}

/// Modular inverse where the caller has already guaranteed invertibility.
/// A missing inverse here is an arithmetic precondition violation.
pub fn get_invert_uint_mod<T: Word>(value: T, modulus: T) -> Result<T, ArithError> {
    try_invert_uint_mod(value, modulus).ok_or_else(|| ArithError::NotInvertible {
        value: value.to_u64().unwrap_or(u64::MAX),
        modulus: modulus.to_u64().unwrap_or(u64::MAX),
    })
}

/// Reverses the low `bit_count` bits of `operand`; `bit_count == 0` yields 0.
#[inline]
pub fn reverse_bits(operand: u32, bit_count: u32) -> u32 {
    if bit_count == 0 {
        return 0;
    }
    operand.reverse_bits() >> (32 - bit_count)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    // 20-, 30- and 61-bit primes: representative RNS channel sizes.
    const PRIMES_32: [u32; 4] = [786_433, 1_070_727_169, 1_073_479_681, 65_537];
    const PRIMES_64: [u64; 3] = [1_000_000_007, 2_305_843_009_213_693_951, 4_611_686_018_427_387_847];

    #[test]
    fn add_and_negate() {
        let mut rng = StdRng::seed_from_u64(11);
        for &m in &PRIMES_32 {
            for _ in 0..500 {
                let a = rng.random_range(0..m);
                let b = rng.random_range(0..m);
                assert_eq!(
                    u64::from(add_uint_mod(a, b, m)),
                    (u64::from(a) + u64::from(b)) % u64::from(m)
                );
            }
            assert_eq!(negate_uint_mod(0, m), 0);
            assert_eq!(negate_uint_mod(1, m), m - 1);
            assert_eq!(negate_uint_mod(m - 1, m), 1);
        }
    }

    #[test]
    fn multiply_matches_reference() {
        let mut rng = StdRng::seed_from_u64(12);
        for &m in &PRIMES_32 {
            for _ in 0..1_000 {
                let a = rng.random_range(0..m);
                let b = rng.random_range(0..m);
                assert_eq!(
                    u64::from(multiply_uint_mod(a, b, m)),
                    u64::from(a) * u64::from(b) % u64::from(m)
                );
            }
        }
        for &m in &PRIMES_64 {
            for _ in 0..1_000 {
                let a = rng.random_range(0..m);
                let b = rng.random_range(0..m);
                assert_eq!(
                    u128::from(multiply_uint_mod(a, b, m)),
                    u128::from(a) * u128::from(b) % u128::from(m)
                );
            }
        }
    }

    #[test]
    fn multiply_known_vector() {
        assert_eq!(multiply_uint_mod(1_305_843_000u32, 1_305_843_000, 1_305_843_001), 1);
    }

    #[test]
    #[should_panic(expected = "modulus cannot be zero")]
    fn multiply_zero_modulus_panics() {
        multiply_uint_mod(1u32, 1, 0);
    }

    #[test]
    fn exponentiate_edge_and_random() {
        assert_eq!(exponentiate_uint_mod(7u32, 0, 13), 1);
        assert_eq!(exponentiate_uint_mod(7u32, 1, 13), 7);
        assert_eq!(exponentiate_uint_mod(3u32, 5, 7), 5);

        let mut rng = StdRng::seed_from_u64(13);
        for &m in &PRIMES_32 {
            for _ in 0..100 {
                let base = rng.random_range(1..m);
                let exp = rng.random_range(0..64u32);
                let mut expected = 1u32;
                for _ in 0..exp {
                    expected = multiply_uint_mod(expected, base, m);
                }
                assert_eq!(exponentiate_uint_mod(base, exp, m), expected);
            }
            // exercise every bit position of the exponent
            for bit in 0..32 {
                let exp = 1u32 << bit;
                let direct = exponentiate_uint_mod(5u32 % m, exp, m);
                let squared = (0..bit).fold(5u32 % m, |acc, _| multiply_uint_mod(acc, acc, m));
                assert_eq!(direct, squared);
            }
        }
    }

    #[test]
    fn inverse_roundtrip() {
        let mut rng = StdRng::seed_from_u64(14);
        for &m in &PRIMES_32 {
            for _ in 0..300 {
                let v = rng.random_range(1..m);
                let inv = try_invert_uint_mod(v, m).expect("prime modulus");
                assert_eq!(multiply_uint_mod(v, inv, m), 1);
            }
        }
        for &m in &PRIMES_64 {
            let v = 123_456_789u64;
            let inv = get_invert_uint_mod(v, m).unwrap();
            assert_eq!(multiply_uint_mod(v, inv, m), 1);
        }
    }

    #[test]
    fn inverse_absent_cases() {
        assert_eq!(try_invert_uint_mod(0u32, 97), None);
        assert_eq!(try_invert_uint_mod(6u32, 12), None);
        assert_eq!(try_invert_uint_mod(10u64, 25), None);
        assert!(get_invert_uint_mod(6u32, 12).is_err());
    }

    #[test]
    fn xgcd_bezout_identity() {
        let mut rng = StdRng::seed_from_u64(15);
        for _ in 0..1_000 {
            let x: u32 = rng.random_range(1..u32::MAX);
            let y: u32 = rng.random_range(1..u32::MAX);
            let (g, a, b) = xgcd(x, y);
            assert_eq!(
                i128::from(x) * i128::from(a) + i128::from(y) * i128::from(b),
                i128::from(g)
            );
            assert_eq!(x % g, 0);
            assert_eq!(y % g, 0);
        }
    }

    #[test]
    fn bit_reversal() {
        assert_eq!(reverse_bits(0, 0), 0);
        assert_eq!(reverse_bits(0xFFFF_FFFF, 0), 0);
        assert_eq!(reverse_bits(1, 3), 4);
        assert_eq!(reverse_bits(0b1101, 4), 0b1011);
        let mut rng = StdRng::seed_from_u64(16);
        for _ in 0..1_000 {
            let x: u32 = rng.random();
            assert_eq!(reverse_bits(reverse_bits(x, 32), 32), x);
            let bits = rng.random_range(1..=32u32);
            let masked = x & (u32::MAX >> (32 - bits));
            assert_eq!(reverse_bits(reverse_bits(masked, bits), bits), masked);
        }
    }
}
