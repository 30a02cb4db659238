//! Helpers over triple-word little-endian integers.
//!
//! The compiler never needs arbitrary precision: the widest intermediate is
//! the 3-word numerator of the Barrett reciprocal, so every helper here is
//! specialized to exactly three words.

use crate::word::{
    add_uint, add_uint_carry, significant_bit_count, sub_uint, sub_uint_borrow, Word,
};

/// Ripple-carry add over `count` words of the operands. Returns the final
/// carry-out.
pub fn add_uint_base<T: Word>(operand1: &[T], operand2: &[T], count: usize, result: &mut [T]) -> u8 {
    let mut carry = add_uint(operand1[0], operand2[0], &mut result[0]);
    for i in 1..count {
        let mut tmp = T::zero();
        carry = add_uint_carry(operand1[i], operand2[i], carry, &mut tmp);
        result[i] = tmp;
    }
    carry
}

/// Ripple-borrow subtract over `count` words. Returns the final borrow-out.
pub fn sub_uint_base<T: Word>(operand1: &[T], operand2: &[T], count: usize, result: &mut [T]) -> u8 {
    let mut borrow = sub_uint(operand1[0], operand2[0], &mut result[0]);
    for i in 1..count {
        let mut tmp = T::zero();
        borrow = sub_uint_borrow(operand1[i], operand2[i], borrow, &mut tmp);
        result[i] = tmp;
    }
    borrow
}

/// Number of significant bits in a little-endian word array; zero for zero.
pub fn significant_bit_count_uint<T: Word>(value: &[T]) -> u32 {
    let mut count = value.len();
    while count > 1 && value[count - 1] == T::zero() {
        count -= 1;
    }
    (count as u32 - 1) * T::BITS + significant_bit_count(value[count - 1])
}

/// Left-shifts a 3-word value by up to `3 * BITS - 1` bits.
pub fn left_shift_uint3<T: Word>(operand: [T; 3], shift_amount: u32) -> [T; 3] {
    let bits = T::BITS;
    let mut result = if (shift_amount & (bits * 2)) != 0 {
        [T::zero(), T::zero(), operand[0]]
    } else if (shift_amount & bits) != 0 {
        [T::zero(), operand[0], operand[1]]
    } else {
        operand
    };

    let bit_shift = (shift_amount & (bits - 1)) as usize;
    if bit_shift != 0 {
        let neg = (bits as usize) - bit_shift;
        result[2] = (result[2] << bit_shift) | (result[1] >> neg);
        result[1] = (result[1] << bit_shift) | (result[0] >> neg);
        result[0] = result[0] << bit_shift;
    }
    result
}

/// Right-shifts a 3-word value by up to `3 * BITS - 1` bits.
pub fn right_shift_uint3<T: Word>(operand: [T; 3], shift_amount: u32) -> [T; 3] {
    let bits = T::BITS;
    let mut result = if (shift_amount & (bits * 2)) != 0 {
        [operand[2], T::zero(), T::zero()]
    } else if (shift_amount & bits) != 0 {
        [operand[1], operand[2], T::zero()]
    } else {
        operand
    };

    let bit_shift = (shift_amount & (bits - 1)) as usize;
    if bit_shift != 0 {
        let neg = (bits as usize) - bit_shift;
        result[0] = (result[0] >> bit_shift) | (result[1] << neg);
        result[1] = (result[1] >> bit_shift) | (result[2] << neg);
        result[2] = result[2] >> bit_shift;
    }
    result
}

/// Schoolbook long division of a 3-word numerator by a single-word
/// denominator. On return `numerator` holds the remainder and `quotient` the
/// quotient.
///
/// The control flow normalizes the denominator up to the numerator's leading
/// bit and then walks shifts back down; when a trial subtraction underflows
/// the partial result is corrected by adding the numerator back before the
/// next quotient bit is committed.
pub fn divide_uint3_inplace<T: Word>(numerator: &mut [T; 3], denominator: T, quotient: &mut [T; 3]) {
    assert!(denominator != T::zero(), "denominator cannot be zero");

    *quotient = [T::zero(); 3];

    let mut numerator_bits = significant_bit_count_uint(&numerator[..]);
    let denominator_bits = significant_bit_count(denominator);
    if numerator_bits < denominator_bits {
        return;
    }

    let uint_count = ((numerator_bits + T::BITS - 1) / T::BITS) as usize;
    if uint_count == 1 {
        quotient[0] = numerator[0] / denominator;
        numerator[0] = numerator[0] - quotient[0] * denominator;
        return;
    }

    let denominator_shift = numerator_bits - denominator_bits;
    let shifted_denominator =
        left_shift_uint3([denominator, T::zero(), T::zero()], denominator_shift);
    let denominator_bits = denominator_bits + denominator_shift;

    let mut difference = [T::zero(); 3];
    let mut remaining_shifts = denominator_shift;

    while numerator_bits == denominator_bits {
        if sub_uint_base(&numerator[..], &shifted_denominator, uint_count, &mut difference) != 0 {
            if remaining_shifts == 0 {
                break;
            }
            let partial = difference;
            add_uint_base(&partial, &numerator[..], uint_count, &mut difference);
            *quotient = left_shift_uint3(*quotient, 1);
            remaining_shifts -= 1;
        }
        quotient[0] = quotient[0] | T::one();

        numerator_bits = significant_bit_count_uint(&difference[..uint_count]);
        let mut numerator_shift = denominator_bits - numerator_bits;
        if numerator_shift > remaining_shifts {
            numerator_shift = remaining_shifts;
        }

        if numerator_bits > 0 {
            *numerator = left_shift_uint3(difference, numerator_shift);
            numerator_bits += numerator_shift;
        } else {
            *numerator = [T::zero(); 3];
        }

        *quotient = left_shift_uint3(*quotient, numerator_shift);
        remaining_shifts -= numerator_shift;
    }

    if numerator_bits > 0 {
        *numerator = right_shift_uint3(*numerator, denominator_shift);
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn words3(value: u128) -> [u32; 3] {
        [
            value as u32,
            (value >> 32) as u32,
            (value >> 64) as u32,
        ]
    }

    fn value3(words: [u32; 3]) -> u128 {
        u128::from(words[0]) | (u128::from(words[1]) << 32) | (u128::from(words[2]) << 64)
    }

    const MASK96: u128 = (1u128 << 96) - 1;

    #[test]
    fn shift_roundtrip_clears_high_bits() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..2_000 {
            let value: u128 = rng.random::<u128>() & MASK96;
            let shift = rng.random_range(0..96u32);
            let shifted = left_shift_uint3(words3(value), shift);
            assert_eq!(value3(shifted), (value << shift) & MASK96);
            let back = right_shift_uint3(shifted, shift);
            assert_eq!(value3(back), value & (MASK96 >> shift));
        }
    }

    #[test]
    fn divide_matches_reference() {
        let mut rng = StdRng::seed_from_u64(0xd1f1de);
        for _ in 0..4_000 {
            let numerator: u128 = rng.random::<u128>() & MASK96;
            let denominator: u32 = rng.random_range(1..=u32::MAX);
            let mut n = words3(numerator);
            let mut q = [0u32; 3];
            divide_uint3_inplace(&mut n, denominator, &mut q);
            assert_eq!(value3(q), numerator / u128::from(denominator));
            assert_eq!(value3(n), numerator % u128::from(denominator));
        }
    }

    #[test]
    fn divide_small_and_equal_bitlength_cases() {
        // numerator shorter than denominator
        let mut n = [3u32, 0, 0];
        let mut q = [0u32; 3];
        divide_uint3_inplace(&mut n, 7, &mut q);
        assert_eq!(q, [0, 0, 0]);
        assert_eq!(n, [3, 0, 0]);

        // single-word fast path
        let mut n = [100u32, 0, 0];
        divide_uint3_inplace(&mut n, 7, &mut q);
        assert_eq!(q, [14, 0, 0]);
        assert_eq!(n, [2, 0, 0]);

        // repeated equal-bit-length iterations with carry correction
        let mut n = words3((1u128 << 95) + 12345);
        divide_uint3_inplace(&mut n, 3, &mut q);
        let expected = ((1u128 << 95) + 12345) / 3;
        assert_eq!(value3(q), expected);
        assert_eq!(value3(n), ((1u128 << 95) + 12345) % 3);
    }

    #[test]
    fn divide_64bit_words() {
        // 192-bit numerator over u64 words, checked against a precomputed
        // quotient/remainder.
        let mut n: [u64; 3] = [
            1089357896855742840,
            18364758544493064720,
            81985529216486895,
        ];
        let mut q = [0u64; 3];
        divide_uint3_inplace(&mut n, 0xdead_beef, &mut q);
        assert_eq!(q, [18242024839526651451, 8177919019787365793, 21945154]);
        assert_eq!(n, [1856331363, 0, 0]);

        // 128-bit numerators against native arithmetic
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2_000 {
            let numerator: u128 = rng.random();
            let denominator: u64 = rng.random_range(1..=u64::MAX);
            let mut n = [numerator as u64, (numerator >> 64) as u64, 0u64];
            let mut q = [0u64; 3];
            divide_uint3_inplace(&mut n, denominator, &mut q);
            assert_eq!(
                u128::from(q[0]) | (u128::from(q[1]) << 64),
                numerator / u128::from(denominator)
            );
            assert_eq!(q[2], 0);
            assert_eq!(u128::from(n[0]), numerator % u128::from(denominator));
        }
    }

    #[test]
    fn wide_add_sub_carry() {
        let a = [u32::MAX, u32::MAX, 0];
        let b = [1u32, 0, 0];
        let mut r = [0u32; 3];
        assert_eq!(add_uint_base(&a, &b, 3, &mut r), 0);
        assert_eq!(r, [0, 0, 1]);
        assert_eq!(sub_uint_base(&[0u32, 0, 0], &[1u32, 0, 0], 3, &mut r), 1);
        assert_eq!(r, [u32::MAX, u32::MAX, u32::MAX]);
    }
}
