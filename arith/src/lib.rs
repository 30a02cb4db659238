//! Fixed-width modular arithmetic kernel for the polymap compiler.
//!
//! Widths are fixed at one to three machine words; this is deliberately not
//! a general bignum library. All functions are pure and allocate nothing
//! beyond fixed local buffers, and their numeric behavior is bit-exact: the
//! twiddle-factor and key-switching tables emitted further down the pipeline
//! are reproducible only if these exact reduction algorithms are used.

mod error;
mod modular;
mod mont;
mod wide;
mod word;

pub use error::ArithError;
pub use modular::{
    add_uint_mod, exponentiate_uint_mod, get_invert_uint_mod, multiply_uint_mod, negate_uint_mod,
    reverse_bits, try_invert_uint_mod, xgcd,
};
pub use mont::{
    convert_to_montgomery, convert_to_normal, convert_to_normal_inv_r, montgomery_add,
    montgomery_mul, MONTGOMERY_R, MONTGOMERY_R_BITS,
};
pub use wide::{
    add_uint_base, divide_uint3_inplace, left_shift_uint3, right_shift_uint3,
    significant_bit_count_uint, sub_uint_base,
};
pub use word::{add_uint, multiply_uint, significant_bit_count, sub_uint, Word};
