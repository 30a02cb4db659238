use thiserror::Error;

/// Arithmetic precondition violations. These are never recoverable: a caller
/// reaching one of these has already broken an invariant (a non-invertible
/// value where a prime modulus was assumed).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArithError {
    #[error("cannot invert value {value} with modulus {modulus}")]
    NotInvertible { value: u64, modulus: u64 },
}
