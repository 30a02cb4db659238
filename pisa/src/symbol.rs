//! Symbol-name grammar: `<root>_<partIndex>_<rnsIndex>`.
//!
//! Names are always decomposed from the right, so roots may themselves
//! contain underscores (namespaced internals do).

use crate::error::ParseError;

/// Splits a register name into `(root, index_suffix)`, stripping up to two
/// trailing underscore-delimited all-numeric fields. Concatenating the two
/// halves reproduces the input.
pub fn split_location(name: &str) -> (&str, &str) {
    let mut end = name.len();
    for _ in 0..2 {
        let head = &name[..end];
        match head.rfind('_') {
            Some(pos)
                if pos + 1 < head.len()
                    && head[pos + 1..].bytes().all(|b| b.is_ascii_digit()) =>
            {
                end = pos;
            }
            _ => break,
        }
    }
    name.split_at(end)
}

/// The register-name root with part/RNS indices stripped.
pub fn register_name_root(name: &str) -> &str {
    split_location(name).0
}

/// Strict decomposition into `(root, part_index, rns_index)`. Fails when the
/// name does not end in exactly the two numeric fields the grammar requires.
pub fn split_symbol_name(sym: &str) -> Result<(&str, u32, u32), ParseError> {
    let malformed = || ParseError::MalformedSymbol(sym.to_string());

    let (rest, rns) = sym.rsplit_once('_').ok_or_else(malformed)?;
    let (root, part) = rest.rsplit_once('_').ok_or_else(malformed)?;
    if root.is_empty() {
        return Err(malformed());
    }
    let part = part.parse::<u32>().map_err(|_| malformed())?;
    let rns = rns.parse::<u32>().map_err(|_| malformed())?;
    Ok((root, part, rns))
}

/// Reconstructs a symbol name from its decomposition.
pub fn merge_symbol_name(root: &str, part: u32, rns: u32) -> String {
    format!("{root}_{part}_{rns}")
}
