use num_traits::{PrimInt, Signed, Unsigned, WrappingAdd, WrappingMul, WrappingSub};

/// A machine word the arithmetic kernel operates on.
///
/// Implemented for `u32` and `u64`. The associated [`Word::Signed`] type is
/// one extra bit wider than the word itself so extended-GCD Bezout
/// coefficients never overflow during the iteration.
pub trait Word:
    PrimInt + Unsigned + WrappingAdd + WrappingSub + WrappingMul + std::fmt::Display + 'static
{
    const BITS: u32;

    type Signed: PrimInt + Signed;

    /// Full double-width product, returned as `(lo, hi)`.
    fn widening_mul(self, rhs: Self) -> (Self, Self);

    fn to_signed(self) -> Self::Signed;

    /// Truncating conversion back from the wide signed type. Callers must
    /// have normalized the value into `[0, 2^BITS)` first.
    fn from_signed(value: Self::Signed) -> Self;
}

impl Word for u32 {
    const BITS: u32 = 32;

    type Signed = i64;

    #[inline]
    fn widening_mul(self, rhs: Self) -> (Self, Self) {
        let wide = u64::from(self) * u64::from(rhs);
        (wide as u32, (wide >> 32) as u32)
    }

    #[inline]
    fn to_signed(self) -> i64 {
        i64::from(self)
    }

    #[inline]
    fn from_signed(value: i64) -> u32 {
        value as u32
    }
}

impl Word for u64 {
    const BITS: u32 = 64;

    type Signed = i128;

    #[inline]
    fn widening_mul(self, rhs: Self) -> (Self, Self) {
        let wide = u128::from(self) * u128::from(rhs);
        (wide as u64, (wide >> 64) as u64)
    }

    #[inline]
    fn to_signed(self) -> i128 {
        i128::from(self)
    }

    #[inline]
    fn from_signed(value: i128) -> u64 {
        value as u64
    }
}

/// Full double-width product of two words, `(lo, hi)`.
#[inline]
pub fn multiply_uint<T: Word>(operand1: T, operand2: T) -> (T, T) {
    operand1.widening_mul(operand2)
}

/// Single-word add. Writes the (wrapping) sum and returns the carry-out.
#[inline]
pub fn add_uint<T: Word>(operand1: T, operand2: T, result: &mut T) -> u8 {
    *result = operand1.wrapping_add(&operand2);
    u8::from(*result < operand1)
}

/// Single-word add with carry-in. Returns the carry-out.
#[inline]
pub fn add_uint_carry<T: Word>(operand1: T, operand2: T, carry: u8, result: &mut T) -> u8 {
    let partial = operand1.wrapping_add(&operand2);
    let carry_word = if carry != 0 { T::one() } else { T::zero() };
    *result = partial.wrapping_add(&carry_word);
    u8::from(partial < operand2 || !partial < carry_word)
}

/// Single-word subtract. Writes the (wrapping) difference and returns the
/// borrow-out.
#[inline]
pub fn sub_uint<T: Word>(operand1: T, operand2: T, result: &mut T) -> u8 {
    *result = operand1.wrapping_sub(&operand2);
    u8::from(operand2 > operand1)
}

/// Single-word subtract with borrow-in. Returns the borrow-out.
#[inline]
pub fn sub_uint_borrow<T: Word>(operand1: T, operand2: T, borrow: u8, result: &mut T) -> u8 {
    let diff = operand1.wrapping_sub(&operand2);
    let borrow_word = if borrow != 0 { T::one() } else { T::zero() };
    *result = diff.wrapping_sub(&borrow_word);
    u8::from(diff > operand1 || diff < borrow_word)
}

/// Number of significant bits in `value`; zero for zero.
#[inline]
pub fn significant_bit_count<T: Word>(value: T) -> u32 {
    T::BITS - value.leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widening_mul_splits_product() {
        let (lo, hi) = 0xFFFF_FFFFu32.widening_mul(0xFFFF_FFFF);
        assert_eq!((lo, hi), (1, 0xFFFF_FFFE));

        let (lo, hi) = u64::MAX.widening_mul(u64::MAX);
        assert_eq!((lo, hi), (1, u64::MAX - 1));
    }

    #[test]
    fn carry_chain() {
        let mut r = 0u32;
        assert_eq!(add_uint(u32::MAX, 1, &mut r), 1);
        assert_eq!(r, 0);
        assert_eq!(add_uint_carry(u32::MAX, 0, 1, &mut r), 1);
        assert_eq!(r, 0);
        assert_eq!(sub_uint(0u32, 1, &mut r), 1);
        assert_eq!(r, u32::MAX);
        assert_eq!(sub_uint_borrow(0u32, 0, 1, &mut r), 1);
        assert_eq!(r, u32::MAX);
    }

    #[test]
    fn significant_bits() {
        assert_eq!(significant_bit_count(0u32), 0);
        assert_eq!(significant_bit_count(1u32), 1);
        assert_eq!(significant_bit_count(0x8000_0000u32), 32);
        assert_eq!(significant_bit_count(u64::MAX), 64);
    }
}
