//! Parameter extraction: turns an [`FheContext`] into the symbol → value
//! maps the instruction-emission stage bakes into the stream.
//!
//! BGV derives everything locally through the arithmetic kernel; CKKS reads
//! part of its key-switching/rescale material from the context's
//! `metadata_extra` map instead. That asymmetry is part of the external
//! contract and is preserved here, not unified.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use polymap_arith::{
    convert_to_montgomery, exponentiate_uint_mod, get_invert_uint_mod, multiply_uint_mod,
    reverse_bits, MONTGOMERY_R,
};

use crate::context::{Ciphertext, FheContext, KeySwitchKey, Polynomial, RnsPolynomial};
use crate::error::MapperError;
use crate::program::Scheme;

pub type SymbolPolys = BTreeMap<String, RnsPolynomial>;
pub type SymbolImmediates = BTreeMap<String, u32>;

/// NTT/INTT twiddle tables: key "default" plus one per rotation Galois
/// element, each holding one table per RNS channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataTwiddles {
    pub ntt: BTreeMap<String, Vec<RnsPolynomial>>,
    pub intt: BTreeMap<String, Vec<RnsPolynomial>>,
    pub only_power_of_two: bool,
}

/// Every constant table derived from one FHE context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataManifest {
    pub polys: SymbolPolys,
    pub twiddles: MetadataTwiddles,
    pub immediates: SymbolImmediates,
    pub params: SymbolImmediates,
}

/// Runs all extraction stages for a context. Extraction never partially
/// succeeds: the first missing field aborts the manifest.
pub fn extract_metadata(context: &FheContext) -> Result<MetadataManifest, MapperError> {
    Ok(MetadataManifest {
        polys: extract_metadata_polys(context)?,
        twiddles: extract_metadata_twiddles(context)?,
        immediates: extract_metadata_immediates(context)?,
        params: extract_metadata_params(context),
    })
}

/// Permutes a coefficient vector into bit-reversed order.
pub fn poly_bit_reverse(src: &[u32]) -> Result<Vec<u32>, MapperError> {
    let degree = src.len();
    if !degree.is_power_of_two() {
        return Err(MapperError::DegreeNotPowerOfTwo(degree));
    }
    let log_degree = degree.trailing_zeros();
    Ok((0..degree as u32)
        .into_par_iter()
        .map(|i| src[reverse_bits(i, log_degree) as usize])
        .collect())
}

/// Joins indices with underscores: `[1, 2] -> "1_2"`.
pub fn to_str_key(indices: &[u32]) -> String {
    indices
        .iter()
        .map(|index| index.to_string())
        .collect::<Vec<_>>()
        .join("_")
}

fn montgomery_poly(coeffs: &[u32], modulus: u32) -> Vec<u32> {
    coeffs
        .par_iter()
        .map(|&coeff| convert_to_montgomery(coeff, modulus))
        .collect()
}

fn power_table(base: u32, modulus: u32, length: u32, exp_scale: u32) -> Vec<u32> {
    (0..length)
        .into_par_iter()
        .map(|j| {
            convert_to_montgomery(
                exponentiate_uint_mod(base, exp_scale.wrapping_mul(j), modulus),
                modulus,
            )
        })
        .collect()
}

fn flatten_poly(
    symbols: &mut SymbolPolys,
    prefix: &str,
    poly: &Polynomial,
) -> Result<(), MapperError> {
    for (r, rns_poly) in poly.rns_polys.iter().enumerate() {
        let encoded = montgomery_poly(&rns_poly.coeffs, rns_poly.modulus);
        symbols.insert(
            format!("{prefix}_{r}"),
            RnsPolynomial {
                coeffs: poly_bit_reverse(&encoded)?,
                modulus: rns_poly.modulus,
            },
        );
    }
    Ok(())
}

fn flatten_key_switch(
    symbols: &mut SymbolPolys,
    prefix: &str,
    key: &KeySwitchKey,
) -> Result<(), MapperError> {
    for (d, digit) in key.digits.iter().enumerate() {
        for (p, poly) in digit.polys.iter().enumerate() {
            flatten_poly(symbols, &format!("{prefix}_{p}_{d}"), poly)?;
        }
    }
    Ok(())
}

fn flatten_ciphertext(
    symbols: &mut SymbolPolys,
    prefix: &str,
    ciphertext: &Ciphertext,
) -> Result<(), MapperError> {
    for (p, poly) in ciphertext.polys.iter().enumerate() {
        flatten_poly(symbols, &format!("{prefix}_{p}"), poly)?;
    }
    Ok(())
}

/// Per-channel root-of-unity power tables, rescale halving constants,
/// flattened key-switching material, and the CKKS zero polynomial.
pub fn extract_metadata_polys(context: &FheContext) -> Result<SymbolPolys, MapperError> {
    let mut symbols = SymbolPolys::new();
    let n = context.n;

    let mut psi_inv = Vec::with_capacity(context.psi.len());
    for (i, &psi) in context.psi.iter().enumerate() {
        psi_inv.push(get_invert_uint_mod(psi, context.q(i)?)?);
    }

    let galois_elements = context.galois_elements()?;

    for i in 0..context.q_i.len() {
        let q = context.q(i)?;
        let psi = context.psi(i)?;

        symbols.insert(
            format!("psi_default_{i}"),
            RnsPolynomial {
                coeffs: poly_bit_reverse(&power_table(psi, q, n, 1))?,
                modulus: q,
            },
        );
        symbols.insert(
            format!("ipsi_default_{i}"),
            RnsPolynomial {
                coeffs: poly_bit_reverse(&power_table(psi_inv[i], q, n, 1))?,
                modulus: q,
            },
        );

        // rescale halves: (qi - 1) / 2 mod qj for i < j; mod-raise uses the
        // first two channels against every channel
        if context.scheme == Scheme::CKKS && (i as u32) < context.q_size {
            let ql_half = q >> 1;
            symbols.insert(
                format!("qlHalf_{}", to_str_key(&[i as u32])),
                RnsPolynomial {
                    coeffs: vec![ql_half; n as usize],
                    modulus: q,
                },
            );
            let j_max = if i <= 1 { context.q_size as usize } else { i };
            for j in 0..j_max {
                let qj = context.q(j)?;
                symbols.insert(
                    format!("qlHalfModq_{}", to_str_key(&[i as u32, j as u32])),
                    RnsPolynomial {
                        coeffs: vec![ql_half % qj; n as usize],
                        modulus: qj,
                    },
                );
            }
        }

        for &ge in &galois_elements {
            let exp_scale = get_invert_uint_mod(ge, 2 * n)?;
            symbols.insert(
                format!("ipsi_{ge}_{i}"),
                RnsPolynomial {
                    coeffs: poly_bit_reverse(&power_table(psi_inv[i], q, n, exp_scale))?,
                    modulus: q,
                },
            );
        }
    }

    match context.scheme {
        Scheme::BGV => {
            let bgv = context.bgv()?;
            for (pt, plaintext) in bgv.plaintext_specific.iter().enumerate() {
                flatten_key_switch(&mut symbols, &format!("rlk_{pt}"), &plaintext.keys.relin_key)?;
                for (&ge, key) in &plaintext.keys.rotation_keys {
                    flatten_key_switch(&mut symbols, &format!("gk_{pt}_{ge}"), key)?;
                }
            }
            if let Some(recrypt) = &bgv.recrypt_key {
                flatten_ciphertext(&mut symbols, "bk", recrypt)?;
            }
        }
        Scheme::CKKS => {
            let ckks = context.ckks()?;
            flatten_key_switch(&mut symbols, "rlk", &ckks.keys.relin_key)?;
            for (&ge, key) in &ckks.keys.rotation_keys {
                flatten_key_switch(&mut symbols, &format!("gk_{ge}"), key)?;
            }
            symbols.insert(
                "zero".to_string(),
                RnsPolynomial {
                    coeffs: vec![0; n as usize],
                    modulus: 0,
                },
            );
        }
        Scheme::BFV => return Err(MapperError::UnsupportedScheme(context.scheme)),
    }

    Ok(symbols)
}

/// NTT/INTT twiddle tables from ω = ψ², plus the rotation-specific inverse
/// tables scaled by `ge⁻¹ mod 2N`.
pub fn extract_metadata_twiddles(context: &FheContext) -> Result<MetadataTwiddles, MapperError> {
    let mut twiddles = MetadataTwiddles {
        only_power_of_two: false,
        ..MetadataTwiddles::default()
    };
    let half_n = context.n / 2;

    let mut omega = Vec::with_capacity(context.key_rns_num as usize);
    let mut omega_inv = Vec::with_capacity(context.key_rns_num as usize);
    for i in 0..context.key_rns_num as usize {
        let q = context.q(i)?;
        omega.push(exponentiate_uint_mod(context.psi(i)?, 2, q));
        omega_inv.push(get_invert_uint_mod(omega[i], q)?);
    }

    let default_ntt: Result<Vec<RnsPolynomial>, MapperError> = (0..context.key_rns_num as usize)
        .map(|i| {
            Ok(RnsPolynomial {
                coeffs: power_table(omega[i], context.q(i)?, half_n, 1),
                modulus: context.q(i)?,
            })
        })
        .collect();
    let default_intt: Result<Vec<RnsPolynomial>, MapperError> = (0..context.key_rns_num as usize)
        .map(|i| {
            Ok(RnsPolynomial {
                coeffs: power_table(omega_inv[i], context.q(i)?, half_n, 1),
                modulus: context.q(i)?,
            })
        })
        .collect();
    twiddles.ntt.insert("default".to_string(), default_ntt?);
    twiddles.intt.insert("default".to_string(), default_intt?);

    for ge in context.galois_elements()? {
        let exp_scale = get_invert_uint_mod(ge, 2 * context.n)?;
        let tables: Result<Vec<RnsPolynomial>, MapperError> = (0..context.key_rns_num as usize)
            .map(|i| {
                Ok(RnsPolynomial {
                    coeffs: power_table(omega_inv[i], context.q(i)?, half_n, exp_scale),
                    modulus: context.q(i)?,
                })
            })
            .collect();
        twiddles.intt.insert(ge.to_string(), tables?);
    }

    Ok(twiddles)
}

/// Scalar immediates: Montgomery R², N⁻¹, CRT punctured products, key-switch
/// digit inverses, rescale and bootstrap constants.
pub fn extract_metadata_immediates(context: &FheContext) -> Result<SymbolImmediates, MapperError> {
    let mut map = SymbolImmediates::new();
    map.insert("one".to_string(), 1);

    let key_rns = context.key_rns_num as usize;

    match context.scheme {
        Scheme::BGV => {
            let bgv = context.bgv()?;

            for i in 0..key_rns {
                let q = context.q(i)?;
                map.insert(
                    format!("R2_{i}"),
                    exponentiate_uint_mod(MONTGOMERY_R, 2u64, u64::from(q)) as u32,
                );
                let inv_n = get_invert_uint_mod(context.n, q)?;
                map.insert(format!("iN_{i}"), convert_to_montgomery(inv_n, q));
                for j in 0..i {
                    let qj = context.q(j)?;
                    let inv = get_invert_uint_mod(q, qj)?;
                    map.insert(
                        format!("inv_q_i_{i}_mod_q_j_{j}"),
                        convert_to_montgomery(inv, qj),
                    );
                }
                for (pt, plaintext) in bgv.plaintext_specific.iter().enumerate() {
                    let inv_t = get_invert_uint_mod(plaintext.plaintext_modulus, q)?;
                    map.insert(
                        format!("neg_inv_t_{pt}_mod_q_i_{i}"),
                        convert_to_montgomery(inv_t.wrapping_neg(), q),
                    );
                    map.insert(
                        format!("t_{pt}_mod_q_i_{i}"),
                        convert_to_montgomery(plaintext.plaintext_modulus, q),
                    );
                }
            }

            map.insert("iN".to_string(), (0x1_0000_0000u64 / u64::from(context.n)) as u32);

            let k_ext = bgv
                .plaintext_specific
                .first()
                .ok_or(MapperError::MissingContextField("bgv_info.plaintext_specific"))?
                .keys
                .relin_key
                .k;

            let p = context.q(key_rns - 1)?;
            for i in 0..key_rns.saturating_sub(1) {
                let q = context.q(i)?;
                let inv = get_invert_uint_mod(p, q)?;
                map.insert(format!("inv_p_mod_q_i_{i}"), convert_to_montgomery(inv, q));
            }

            for l in 0..key_rns.saturating_sub(1) {
                for j in 0..key_rns {
                    let qj = context.q(j)?;
                    for i in 0..l + 1 {
                        let mut q_over_qi_mod_qj = 1u32;
                        for k in 0..key_rns {
                            if k != i {
                                q_over_qi_mod_qj =
                                    multiply_uint_mod(q_over_qi_mod_qj, context.q(k)?, qj);
                            }
                        }
                        map.insert(
                            format!("base_change_matrix_{i}_{j}_{k_ext}"),
                            convert_to_montgomery(q_over_qi_mod_qj, qj),
                        );
                        if i == j {
                            let qi = context.q(i)?;
                            let inv = get_invert_uint_mod(q_over_qi_mod_qj, qi)?;
                            map.insert(
                                format!("inv_punctured_prod_{i}_{i}"),
                                convert_to_montgomery(inv, qi),
                            );
                        }
                    }
                }
            }
        }
        Scheme::CKKS => {
            for i in 0..key_rns {
                let q = context.q(i)?;
                map.insert(
                    format!("R2_{i}"),
                    exponentiate_uint_mod(MONTGOMERY_R, 2u64, u64::from(q)) as u32,
                );
                let inv_n = get_invert_uint_mod(context.n, q)?;
                map.insert(format!("iN_{i}"), convert_to_montgomery(inv_n, q));
            }
            map.insert("iN".to_string(), (0x1_0000_0000u64 / u64::from(context.n)) as u32);

            let q0 = context.q(0)?;
            let q1 = context.q(1)?;
            let q0_inv_mod_q1 = get_invert_uint_mod(q0, q1)?;
            let q1_inv_mod_q0 = get_invert_uint_mod(q1, q0)?;
            map.insert("q0InvModq1".to_string(), convert_to_montgomery(q0_inv_mod_q1, q1));
            map.insert("q1InvModq0".to_string(), convert_to_montgomery(q1_inv_mod_q0, q0));

            let dnum = context.digit_size as usize;
            let alpha = context.alpha as usize;
            if alpha == 0 {
                return Err(MapperError::MissingContextField("alpha"));
            }
            let size_q = context.q_size as usize;
            let size_p = key_rns
                .checked_sub(size_q)
                .ok_or(MapperError::MissingContextField("q_size"))?;

            // PartQHatInvModq_{i}_{j} = (Q/Q_i)^-1 mod q_j
            for i in 0..dnum {
                for j in 0..size_q {
                    let key = format!("partQHatInvModq_{}", to_str_key(&[i as u32, j as u32]));
                    let value = context.metadata_extra(&key)?;
                    map.insert(key, convert_to_montgomery(value, context.q(j)?));
                }
            }

            // PartQlHatInvModq_{i}_{j}_{l}
            for i in 0..dnum {
                let digit_size = if i < dnum - 1 {
                    alpha
                } else {
                    size_q - alpha * (dnum - 1)
                };
                for j in 0..digit_size {
                    for l in 0..j + 1 {
                        let key = format!(
                            "partQlHatInvModq_{}",
                            to_str_key(&[i as u32, j as u32, l as u32])
                        );
                        let value = context.metadata_extra(&key)?;
                        map.insert(key, convert_to_montgomery(value, context.q(alpha * i + l)?));
                    }
                }
            }

            // PartQlHatModp_{i}_{j}_{l}_{s}, against the complementary basis
            for i in 0..size_q {
                let beta = (i + 1 + alpha - 1) / alpha;
                for j in 0..beta {
                    let digit_size = if j < beta - 1 {
                        alpha
                    } else {
                        (i + 1) - alpha * (beta - 1)
                    };
                    let size_compl = (i + 1) + size_p - digit_size;
                    for l in 0..digit_size {
                        for s in 0..size_compl {
                            let idx = if s < alpha * j {
                                s
                            } else if s < i + 1 - digit_size {
                                s + digit_size
                            } else {
                                s + digit_size + size_q - i - 1
                            };
                            let key = format!(
                                "partQlHatModp_{}",
                                to_str_key(&[i as u32, j as u32, l as u32, s as u32])
                            );
                            let value = context.metadata_extra(&key)?;
                            map.insert(key, convert_to_montgomery(value, context.q(idx)?));
                        }
                    }
                }
            }

            for i in 0..size_q {
                let q = context.q(i)?;
                for name in ["pInvModq", "pModq"] {
                    let key = format!("{name}_{i}");
                    let value = context.metadata_extra(&key)?;
                    map.insert(key, convert_to_montgomery(value, q));
                }
            }

            for i in 0..size_p {
                let key = format!("pHatInvModp_{i}");
                let value = context.metadata_extra(&key)?;
                map.insert(key, convert_to_montgomery(value, context.q(i + size_q)?));
            }

            for i in 0..size_p {
                for j in 0..size_q {
                    let key = format!("pHatModq_{}", to_str_key(&[i as u32, j as u32]));
                    let value = context.metadata_extra(&key)?;
                    map.insert(key, convert_to_montgomery(value, context.q(j)?));
                }
            }

            // rescale constants
            for i in 0..size_q.saturating_sub(1) {
                for j in 0..size_q - i - 1 {
                    for name in ["qlInvModq", "QlQlInvModqlDivqlModq"] {
                        let key = format!("{name}_{}", to_str_key(&[i as u32, j as u32]));
                        let value = context.metadata_extra(&key)?;
                        map.insert(key, convert_to_montgomery(value, context.q(j)?));
                    }
                }
            }

            // bootstrap constants
            for i in 0..2usize.min(key_rns) {
                let qi = context.q(i)?;
                for j in 0..size_q {
                    map.insert(
                        format!("qlModq_{i}_{j}"),
                        convert_to_montgomery(qi, context.q(j)?),
                    );
                }
            }

            let boot_correction = context.metadata_extra("boot_correction")?;
            for i in 0..32u32 {
                let val = 1u32 << i;
                for j in 0..size_q {
                    let qj = context.q(j)?;
                    map.insert(format!("bmu_{val}_{j}"), convert_to_montgomery(val, qj));
                    if i == 0 {
                        map.insert(
                            format!("bmu_{boot_correction}"),
                            convert_to_montgomery(boot_correction, qj),
                        );
                    }
                }
            }
        }
        Scheme::BFV => return Err(MapperError::UnsupportedScheme(context.scheme)),
    }

    Ok(map)
}

/// Shape parameters the downstream consumers read back out of the manifest.
pub fn extract_metadata_params(context: &FheContext) -> SymbolImmediates {
    let mut map = SymbolImmediates::new();
    map.insert("key_rns_num".to_string(), context.key_rns_num);
    map.insert("digit_size".to_string(), context.digit_size);
    map.insert("q_size".to_string(), context.q_size);
    map.insert("alpha".to_string(), context.alpha);
    map.insert("dnum".to_string(), context.digit_size);
    map
}
