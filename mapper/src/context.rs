//! The FHE context the mapper reads: moduli chain, primitive roots, and
//! scheme-specific key material. The context is produced externally (it
//! rides along in the binary trace format); the mapper only consumes it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::MapperError;
use crate::program::Scheme;

/// One polynomial's residues in a single RNS channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RnsPolynomial {
    pub coeffs: Vec<u32>,
    pub modulus: u32,
}

/// A polynomial over the full RNS basis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Polynomial {
    pub rns_polys: Vec<RnsPolynomial>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext {
    pub polys: Vec<Polynomial>,
}

/// One digit of a key-switching key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySwitchDigit {
    pub polys: Vec<Polynomial>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySwitchKey {
    /// Extended-prime count of the key-switching decomposition.
    pub k: u32,
    pub digits: Vec<KeySwitchDigit>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    pub relin_key: KeySwitchKey,
    /// Rotation keys keyed by Galois element.
    pub rotation_keys: BTreeMap<u32, KeySwitchKey>,
}

/// BGV key material is per plaintext modulus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgvPlaintextInfo {
    pub plaintext_modulus: u32,
    pub keys: KeySet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgvInfo {
    pub plaintext_specific: Vec<BgvPlaintextInfo>,
    pub recrypt_key: Option<Ciphertext>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CkksInfo {
    pub keys: KeySet,
    /// Externally precomputed key-switching/rescale constants. CKKS reads
    /// these instead of re-deriving them locally; a referenced entry that is
    /// absent is a fatal context error.
    pub metadata_extra: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FheContext {
    pub scheme: Scheme,
    /// Ring degree N.
    pub n: u32,
    /// RNS channel moduli, key channels included.
    pub q_i: Vec<u32>,
    /// Primitive 2N-th roots of unity, one per channel.
    pub psi: Vec<u32>,
    pub key_rns_num: u32,
    pub q_size: u32,
    pub alpha: u32,
    /// Number of key-switching digits (dnum).
    pub digit_size: u32,
    pub bgv_info: Option<BgvInfo>,
    pub ckks_info: Option<CkksInfo>,
}

impl FheContext {
    pub fn q(&self, index: usize) -> Result<u32, MapperError> {
        self.q_i
            .get(index)
            .copied()
            .ok_or(MapperError::RnsIndexOutOfRange {
                index,
                count: self.q_i.len(),
            })
    }

    pub fn psi(&self, index: usize) -> Result<u32, MapperError> {
        self.psi
            .get(index)
            .copied()
            .ok_or(MapperError::RnsIndexOutOfRange {
                index,
                count: self.psi.len(),
            })
    }

    pub fn bgv(&self) -> Result<&BgvInfo, MapperError> {
        self.bgv_info
            .as_ref()
            .ok_or(MapperError::MissingContextField("bgv_info"))
    }

    pub fn ckks(&self) -> Result<&CkksInfo, MapperError> {
        self.ckks_info
            .as_ref()
            .ok_or(MapperError::MissingContextField("ckks_info"))
    }

    pub fn metadata_extra(&self, key: &str) -> Result<u32, MapperError> {
        self.ckks()?
            .metadata_extra
            .get(key)
            .copied()
            .ok_or_else(|| MapperError::MissingMetadataExtra(key.to_string()))
    }

    /// Every Galois element a rotation key exists for.
    pub fn galois_elements(&self) -> Result<BTreeSet<u32>, MapperError> {
        let mut elements = BTreeSet::new();
        match self.scheme {
            Scheme::BGV => {
                for plaintext in &self.bgv()?.plaintext_specific {
                    elements.extend(plaintext.keys.rotation_keys.keys().copied());
                }
            }
            Scheme::CKKS => {
                elements.extend(self.ckks()?.keys.rotation_keys.keys().copied());
            }
            Scheme::BFV => return Err(MapperError::UnsupportedScheme(self.scheme)),
        }
        Ok(elements)
    }
}
