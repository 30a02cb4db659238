//! Trace-level model: FHE schemes, polynomial operands, and the closed set
//! of polynomial operations the mapper understands.

use ahash::AHashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::MapperError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, EnumIter, Serialize,
    Deserialize,
)]
pub enum Scheme {
    #[default]
    BGV,
    CKKS,
    BFV,
}

impl Scheme {
    /// Lowercase form used in legacy generator invocations and cache keys.
    pub fn lowercase(self) -> String {
        self.to_string().to_lowercase()
    }
}

/// Field kinds of a trace CSV row, in operation-specific order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceParam {
    OpName,
    FheScheme,
    PolymodDegLog2,
    KeyRns,
    OutputArgument,
    InputArgument,
    RnsTerm,
    CipherDegree,
    GaloisElt,
    Factor,
    Alpha,
    QSize,
    DNum,
}

use TraceParam::*;

/// The closed set of polynomial operations. Trace names map onto these via
/// [`operation_kind`]; aliases (`add_plain`, `mul_plain`) share a kind but
/// keep their own trace name on the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum PolyOpKind {
    Add,
    Sub,
    Mul,
    Square,
    Relin,
    ModSwitch,
    Ntt,
    Intt,
    Rescale,
    Rotate,
}

impl PolyOpKind {
    /// Ordered field layout of the operation's trace row.
    pub fn descriptor(self) -> &'static [TraceParam] {
        match self {
            PolyOpKind::Add | PolyOpKind::Sub | PolyOpKind::Mul => &[
                OpName, FheScheme, PolymodDegLog2, KeyRns, OutputArgument, InputArgument,
                InputArgument,
            ],
            PolyOpKind::Square | PolyOpKind::ModSwitch | PolyOpKind::Ntt | PolyOpKind::Intt => {
                &[OpName, FheScheme, PolymodDegLog2, KeyRns, OutputArgument, InputArgument]
            }
            PolyOpKind::Relin => &[
                OpName, FheScheme, PolymodDegLog2, KeyRns, OutputArgument, InputArgument, Alpha,
                QSize, DNum,
            ],
            PolyOpKind::Rescale => &[
                OpName, FheScheme, PolymodDegLog2, KeyRns, OutputArgument, InputArgument, QSize,
            ],
            PolyOpKind::Rotate => &[
                OpName, FheScheme, PolymodDegLog2, KeyRns, OutputArgument, InputArgument,
                GaloisElt, Alpha, QSize, DNum,
            ],
        }
    }
}

static OPERATION_LIBRARY: Lazy<AHashMap<&'static str, PolyOpKind>> = Lazy::new(|| {
    let mut library = AHashMap::new();
    library.insert("add", PolyOpKind::Add);
    library.insert("add_plain", PolyOpKind::Add);
    library.insert("sub", PolyOpKind::Sub);
    library.insert("mul", PolyOpKind::Mul);
    library.insert("mul_plain", PolyOpKind::Mul);
    library.insert("square", PolyOpKind::Square);
    library.insert("ntt", PolyOpKind::Ntt);
    library.insert("intt", PolyOpKind::Intt);
    library.insert("relin", PolyOpKind::Relin);
    library.insert("mod_switch", PolyOpKind::ModSwitch);
    library.insert("rescale", PolyOpKind::Rescale);
    library.insert("rotate", PolyOpKind::Rotate);
    library
});

/// Resolves a trace operation name to its kind.
pub fn operation_kind(name: &str) -> Result<PolyOpKind, MapperError> {
    OPERATION_LIBRARY
        .get(name)
        .copied()
        .ok_or_else(|| MapperError::UnknownOperation(name.to_string()))
}

/// A named polynomial operand: how many ciphertext parts and RNS channels it
/// spans. The trace string form is `label-parts-rns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolyOperand {
    pub register_name: String,
    pub num_parts: u32,
    pub num_rns_terms: u32,
}

impl PolyOperand {
    pub fn new(register_name: impl Into<String>, num_parts: u32, num_rns_terms: u32) -> Self {
        Self {
            register_name: register_name.into(),
            num_parts,
            num_rns_terms,
        }
    }

    pub fn from_string_form(text: &str) -> Result<Self, MapperError> {
        let malformed = || MapperError::MalformedOperand(text.to_string());
        let mut fields = text.split('-');
        let label = fields.next().ok_or_else(malformed)?;
        if label.is_empty() {
            return Err(malformed());
        }
        let parts = fields.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
        let rns = fields.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
        if fields.next().is_some() {
            return Err(malformed());
        }
        Ok(Self::new(label, parts, rns))
    }

    pub fn to_string_form(&self) -> String {
        format!("{}-{}-{}", self.register_name, self.num_parts, self.num_rns_terms)
    }

    pub fn location(&self) -> &str {
        &self.register_name
    }
}

/// One FHE-level instruction from the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolyOperation {
    pub kind: PolyOpKind,
    /// Trace-level name; aliases keep theirs (`add_plain` stays `add_plain`).
    pub name: String,
    pub inputs: Vec<PolyOperand>,
    pub outputs: Vec<PolyOperand>,
    pub cipher_degree: u32,
    pub rns_terms: u32,
    pub galois_elt: u32,
    pub factor: u32,
}

impl PolyOperation {
    pub fn new(kind: PolyOpKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            cipher_degree: 0,
            rns_terms: 0,
            galois_elt: 0,
            factor: 0,
        }
    }

    pub fn num_input_operands(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_output_operands(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_operand(&self, n: usize) -> &PolyOperand {
        &self.inputs[n]
    }

    pub fn output_operand(&self, n: usize) -> &PolyOperand {
        &self.outputs[n]
    }
}

impl polymap_pisa::GraphOperation for PolyOperation {
    fn graph_label(&self) -> String {
        self.name.clone()
    }

    fn graph_inputs(&self) -> Vec<(String, bool)> {
        self.inputs
            .iter()
            .map(|operand| (operand.register_name.clone(), false))
            .collect()
    }

    fn graph_outputs(&self) -> Vec<String> {
        self.outputs
            .iter()
            .map(|operand| operand.register_name.clone())
            .collect()
    }
}

/// A parsed trace: global context plus the ordered operation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolyProgram {
    pub scheme: Scheme,
    pub poly_modulus_degree: u32,
    pub key_rns: u32,
    pub alpha: u32,
    pub dnum: u32,
    pub q_size: u32,
    pub operations: Vec<PolyOperation>,
}

impl Default for PolyProgram {
    fn default() -> Self {
        Self {
            scheme: Scheme::BGV,
            poly_modulus_degree: 8192,
            key_rns: 4,
            alpha: 0,
            dnum: 0,
            q_size: 1,
            operations: Vec::new(),
        }
    }
}

impl PolyProgram {
    /// Builds one operation from its trace-row fields, updating the
    /// program-level context fields the row carries, and appends it.
    pub fn push_operation_from_args(
        &mut self,
        name: &str,
        args: &[String],
    ) -> Result<(), MapperError> {
        let kind = operation_kind(name)?;
        let descriptor = kind.descriptor();
        if args.len() > descriptor.len() {
            return Err(MapperError::ArgumentCount {
                operation: name.to_string(),
                expected: descriptor.len(),
                got: args.len(),
            });
        }
        if args.len() < descriptor.len() {
            tracing::warn!(
                operation = name,
                expected = descriptor.len(),
                got = args.len(),
                "trace row has fewer fields than the operation specifies"
            );
        }

        let numeric = |value: &str| -> Result<u32, MapperError> {
            value
                .parse()
                .map_err(|_| MapperError::InvalidField(value.to_string()))
        };

        let mut operation = PolyOperation::new(kind, name);
        for (value, param) in args.iter().zip(descriptor) {
            match param {
                OpName => operation.name = value.clone(),
                FheScheme => {
                    self.scheme = value
                        .parse()
                        .map_err(|_| MapperError::UnknownScheme(value.clone()))?;
                }
                PolymodDegLog2 => self.poly_modulus_degree = numeric(value)?,
                KeyRns => self.key_rns = numeric(value)?,
                OutputArgument => operation.outputs.push(PolyOperand::from_string_form(value)?),
                InputArgument => operation.inputs.push(PolyOperand::from_string_form(value)?),
                RnsTerm => operation.rns_terms = numeric(value)?,
                CipherDegree => operation.cipher_degree = numeric(value)?,
                GaloisElt => operation.galois_elt = numeric(value)?,
                Factor => operation.factor = numeric(value)?,
                Alpha => self.alpha = numeric(value)?,
                QSize => self.q_size = numeric(value)?,
                DNum => self.dnum = numeric(value)?,
            }
        }

        // Rows don't carry the RNS/degree shape separately; it rides on the
        // first input operand.
        if let Some(first) = operation.inputs.first() {
            if operation.rns_terms == 0 {
                operation.rns_terms = first.num_rns_terms;
            }
            if operation.cipher_degree == 0 {
                operation.cipher_degree = first.num_parts;
            }
        }

        self.operations.push(operation);
        Ok(())
    }

    /// Renders one operation back into its trace-row fields.
    pub fn operation_to_args(&self, operation: &PolyOperation) -> Vec<String> {
        let mut inputs = 0usize;
        let mut outputs = 0usize;
        operation
            .kind
            .descriptor()
            .iter()
            .map(|param| match param {
                OpName => operation.name.clone(),
                FheScheme => self.scheme.to_string(),
                PolymodDegLog2 => self.poly_modulus_degree.to_string(),
                KeyRns => self.key_rns.to_string(),
                OutputArgument => {
                    let text = operation.outputs[outputs].to_string_form();
                    outputs += 1;
                    text
                }
                InputArgument => {
                    let text = operation.inputs[inputs].to_string_form();
                    inputs += 1;
                    text
                }
                RnsTerm => operation.rns_terms.to_string(),
                CipherDegree => operation.cipher_degree.to_string(),
                GaloisElt => operation.galois_elt.to_string(),
                Factor => operation.factor.to_string(),
                Alpha => self.alpha.to_string(),
                QSize => self.q_size.to_string(),
                DNum => self.dnum.to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_names() {
        assert_eq!("BGV".parse::<Scheme>().unwrap(), Scheme::BGV);
        assert_eq!(Scheme::CKKS.to_string(), "CKKS");
        assert_eq!(Scheme::CKKS.lowercase(), "ckks");
        assert!("NOPE".parse::<Scheme>().is_err());
    }

    #[test]
    fn operand_string_form_roundtrip() {
        let operand = PolyOperand::from_string_form("ct0-2-3").unwrap();
        assert_eq!(operand, PolyOperand::new("ct0", 2, 3));
        assert_eq!(operand.to_string_form(), "ct0-2-3");
        assert!(PolyOperand::from_string_form("bad").is_err());
        assert!(PolyOperand::from_string_form("-1-2").is_err());
        assert!(PolyOperand::from_string_form("a-x-2").is_err());
    }

    #[test]
    fn library_resolves_aliases() {
        assert_eq!(operation_kind("add").unwrap(), PolyOpKind::Add);
        assert_eq!(operation_kind("add_plain").unwrap(), PolyOpKind::Add);
        assert_eq!(operation_kind("mod_switch").unwrap(), PolyOpKind::ModSwitch);
        assert!(operation_kind("frobnicate").is_err());
    }

    #[test]
    fn build_operation_updates_program_context() {
        let mut program = PolyProgram::default();
        let args: Vec<String> = ["rotate", "CKKS", "16384", "5", "out-2-3", "in-2-3", "9", "1", "3", "3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        program.push_operation_from_args("rotate", &args).unwrap();

        assert_eq!(program.scheme, Scheme::CKKS);
        assert_eq!(program.poly_modulus_degree, 16384);
        assert_eq!(program.key_rns, 5);
        assert_eq!(program.alpha, 1);
        assert_eq!(program.q_size, 3);
        assert_eq!(program.dnum, 3);

        let operation = &program.operations[0];
        assert_eq!(operation.kind, PolyOpKind::Rotate);
        assert_eq!(operation.galois_elt, 9);
        assert_eq!(operation.rns_terms, 3);
        assert_eq!(operation.cipher_degree, 2);

        let rendered = program.operation_to_args(operation);
        assert_eq!(rendered, args);
    }

    #[test]
    fn too_many_args_is_fatal() {
        let mut program = PolyProgram::default();
        let args: Vec<String> = ["add", "BGV", "8192", "4", "c-2-2", "a-2-2", "b-2-2", "extra"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(matches!(
            program.push_operation_from_args("add", &args),
            Err(MapperError::ArgumentCount { .. })
        ));
    }
}
