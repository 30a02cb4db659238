//! Program-trace I/O: the CSV text form and the binary serialized form.
//!
//! CSV carries only what the rows encode; the binary form additionally
//! carries the full FHE context. Both round-trip losslessly for the fields
//! they support.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use polymap_pisa::parser::parse_csv_records;

use crate::context::FheContext;
use crate::error::MapperError;
use crate::program::{operation_kind, PolyOperand, PolyOperation, PolyProgram, Scheme};

const CSV_HEADER: &str =
    "scheme,poly_modulus_degree,rns_terms,cipher_degree,instruction,arg0,arg1,arg2,arg3,arg4,arg5,arg6,arg7,arg8,arg9";

/// Parses a CSV trace. The leading header row is skipped when
/// `ignore_header` is set.
pub fn parse_trace_csv(contents: &str, ignore_header: bool) -> Result<PolyProgram, MapperError> {
    let mut program = PolyProgram::default();
    let records = parse_csv_records(contents)?;
    let skip = usize::from(ignore_header && !records.is_empty());
    for record in records.into_iter().skip(skip) {
        let name = record
            .first()
            .ok_or_else(|| MapperError::InvalidField(String::new()))?
            .clone();
        program.push_operation_from_args(&name, &record)?;
    }
    Ok(program)
}

/// Reads a CSV trace file.
pub fn load_trace_csv(path: &Path, ignore_header: bool) -> Result<PolyProgram, MapperError> {
    let contents =
        std::fs::read_to_string(path).map_err(|source| MapperError::io(path, source))?;
    parse_trace_csv(&contents, ignore_header)
}

/// Renders a program back into CSV text, one row per operation.
pub fn write_trace_csv(program: &PolyProgram) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for operation in &program.operations {
        out.push_str(&program.operation_to_args(operation).join(","));
        out.push('\n');
    }
    out
}

pub fn store_trace_csv(program: &PolyProgram, path: &Path) -> Result<(), MapperError> {
    std::fs::write(path, write_trace_csv(program)).map_err(|source| MapperError::io(path, source))
}

/// One operand of a binary-trace instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceOperand {
    pub symbol_name: String,
    pub num_rns: u32,
    /// Number of polynomial parts.
    pub order: u32,
}

/// One instruction of the binary trace form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceInstruction {
    pub op: String,
    pub dests: Vec<TraceOperand>,
    pub srcs: Vec<TraceOperand>,
    pub params: BTreeMap<String, String>,
}

/// The binary trace: full context plus the instruction list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub scheme: Scheme,
    pub n: u32,
    pub key_rns_num: u32,
    pub alpha: u32,
    pub q_size: u32,
    pub dnum: u32,
    pub context: Option<FheContext>,
    pub instructions: Vec<TraceInstruction>,
}

impl Trace {
    pub fn from_program(program: &PolyProgram, context: Option<FheContext>) -> Self {
        let instructions = program
            .operations
            .iter()
            .map(|operation| {
                let operand = |poly: &PolyOperand| TraceOperand {
                    symbol_name: poly.register_name.clone(),
                    num_rns: poly.num_rns_terms,
                    order: poly.num_parts,
                };
                let mut params = BTreeMap::new();
                if operation.galois_elt != 0 {
                    params.insert("galois_elt".to_string(), operation.galois_elt.to_string());
                }
                if operation.factor != 0 {
                    params.insert("factor".to_string(), operation.factor.to_string());
                }
                TraceInstruction {
                    op: operation.name.clone(),
                    dests: operation.outputs.iter().map(operand).collect(),
                    srcs: operation.inputs.iter().map(operand).collect(),
                    params,
                }
            })
            .collect();

        Self {
            scheme: program.scheme,
            n: program.poly_modulus_degree,
            key_rns_num: program.key_rns,
            alpha: program.alpha,
            q_size: program.q_size,
            dnum: program.dnum,
            context,
            instructions,
        }
    }

    pub fn to_program(&self) -> Result<PolyProgram, MapperError> {
        let mut program = PolyProgram {
            scheme: self.scheme,
            poly_modulus_degree: self.n,
            key_rns: self.key_rns_num,
            alpha: self.alpha,
            dnum: self.dnum,
            q_size: self.q_size,
            operations: Vec::new(),
        };

        for instruction in &self.instructions {
            // bootstrap bookkeeping ops ride in traces but are not mapped
            if instruction.op.starts_with("bk_") {
                continue;
            }
            let kind = operation_kind(&instruction.op)?;
            let mut operation = PolyOperation::new(kind, instruction.op.clone());
            let operand = |op: &TraceOperand| {
                PolyOperand::new(op.symbol_name.clone(), op.order, op.num_rns)
            };
            operation.outputs = instruction.dests.iter().map(operand).collect();
            operation.inputs = instruction.srcs.iter().map(operand).collect();
            if let Some(value) = instruction.params.get("galois_elt") {
                operation.galois_elt = value
                    .parse()
                    .map_err(|_| MapperError::InvalidField(value.clone()))?;
            }
            if let Some(value) = instruction.params.get("factor") {
                operation.factor = value
                    .parse()
                    .map_err(|_| MapperError::InvalidField(value.clone()))?;
            }
            if let Some(first) = operation.inputs.first() {
                operation.rns_terms = first.num_rns_terms;
                operation.cipher_degree = first.num_parts;
            }
            program.operations.push(operation);
        }
        Ok(program)
    }
}

/// Binary (de)serialization of the trace record.
pub fn load_trace(path: &Path) -> Result<Trace, MapperError> {
    let bytes = std::fs::read(path).map_err(|source| MapperError::io(path, source))?;
    Ok(bincode::deserialize(&bytes)?)
}

pub fn store_trace(trace: &Trace, path: &Path) -> Result<(), MapperError> {
    let bytes = bincode::serialize(trace)?;
    std::fs::write(path, bytes).map_err(|source| MapperError::io(path, source))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_csv() -> String {
        format!(
            "{CSV_HEADER}\n\
             add,BGV,8192,4,t-2-2,a-2-2,b-2-2\n\
             rotate,BGV,8192,4,r-2-2,t-2-2,3,1,2,2\n\
             rescale,BGV,8192,4,s-2-2,r-2-2,2\n"
        )
    }

    #[test]
    fn csv_roundtrip() {
        let program = parse_trace_csv(&sample_csv(), true).unwrap();
        assert_eq!(program.operations.len(), 3);
        assert_eq!(program.scheme, Scheme::BGV);
        assert_eq!(program.poly_modulus_degree, 8192);
        assert_eq!(program.operations[1].galois_elt, 3);
        assert_eq!(program.alpha, 1);
        assert_eq!(program.q_size, 2);
        assert_eq!(program.dnum, 2);

        let rendered = write_trace_csv(&program);
        assert_eq!(rendered, sample_csv());
    }

    #[test]
    fn csv_unknown_operation_is_fatal() {
        let text = format!("{CSV_HEADER}\nwibble,BGV,8192,4,c-2-2,a-2-2\n");
        assert!(matches!(
            parse_trace_csv(&text, true),
            Err(MapperError::UnknownOperation(_))
        ));
    }

    #[test]
    fn binary_roundtrip_carries_context() {
        let program = parse_trace_csv(&sample_csv(), true).unwrap();
        let context = FheContext {
            scheme: Scheme::BGV,
            n: 8192,
            q_i: vec![97, 193],
            psi: vec![8, 3],
            key_rns_num: 2,
            q_size: 1,
            ..FheContext::default()
        };
        let trace = Trace::from_program(&program, Some(context.clone()));

        let bytes = bincode::serialize(&trace).unwrap();
        let restored: Trace = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored, trace);
        assert_eq!(restored.context.as_ref(), Some(&context));

        let rebuilt = restored.to_program().unwrap();
        assert_eq!(rebuilt, program);
    }

    #[test]
    fn binary_trace_skips_bootstrap_ops() {
        let mut trace = Trace::from_program(&parse_trace_csv(&sample_csv(), true).unwrap(), None);
        trace.instructions.push(TraceInstruction {
            op: "bk_noise_estimate".to_string(),
            dests: vec![],
            srcs: vec![],
            params: BTreeMap::new(),
        });
        let program = trace.to_program().unwrap();
        assert_eq!(program.operations.len(), 3);
    }
}
