//! Parser for the p-ISA CSV instruction format produced by the kernel
//! generator.

use std::path::Path;

use pest::Parser;

use crate::error::ParseError;
use crate::instruction::{Opcode, Operand, ParamType, PisaInstruction};

/// Field index holding the opcode name in a p-ISA CSV row.
const OP_CODE_FIELD: usize = 1;

#[derive(pest_derive::Parser)]
#[grammar = "parser/csv.pest"]
struct CsvParser;

/// Splits comma-separated text into trimmed records. Blank lines are
/// skipped; anything else that fails the grammar is a fatal parse error.
pub fn parse_csv_records(input: &str) -> Result<Vec<Vec<String>>, ParseError> {
    let file = CsvParser::parse(Rule::file, input)
        .map_err(|err| ParseError::Syntax(err.to_string()))?
        .next()
        .ok_or_else(|| ParseError::Syntax("empty parse result".to_string()))?;

    let mut records = Vec::new();
    for record in file.into_inner() {
        if record.as_rule() != Rule::record {
            continue;
        }
        let fields: Vec<String> = record
            .into_inner()
            .map(|field| field.as_str().trim().to_string())
            .collect();
        if fields.iter().all(|field| field.is_empty()) {
            continue;
        }
        records.push(fields);
    }
    Ok(records)
}

/// Parses a full kernel-generator output into instructions.
pub fn parse_instructions(input: &str) -> Result<Vec<PisaInstruction>, ParseError> {
    parse_csv_records(input)?
        .iter()
        .map(|record| parse_instruction(record))
        .collect()
}

/// Reads and parses a kernel CSV file; I/O problems surface with the path.
pub fn parse_instruction_file(path: &Path) -> Result<Vec<PisaInstruction>, ParseError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_instructions(&contents)
}

/// Parses one CSV record into an instruction according to the opcode's
/// field description.
pub fn parse_instruction(components: &[String]) -> Result<PisaInstruction, ParseError> {
    let name = components
        .get(OP_CODE_FIELD)
        .ok_or_else(|| ParseError::Syntax("instruction row too short".to_string()))?;
    let opcode: Opcode = name
        .parse()
        .map_err(|_| ParseError::UnknownOpcode(name.clone()))?;

    let description = opcode.description();
    if components.len() != description.len() {
        return Err(ParseError::FieldCount {
            opcode: name.clone(),
            expected: description.len(),
            got: components.len(),
        });
    }

    let mut instruction = PisaInstruction::new(opcode);
    for (component, param) in components.iter().zip(description) {
        parse_component(component, *param, &mut instruction)?;
    }
    Ok(instruction)
}

fn parse_numeric(component: &str) -> Result<u32, ParseError> {
    component
        .parse()
        .map_err(|_| ParseError::Numeric(component.to_string()))
}

fn parse_component(
    component: &str,
    param: ParamType,
    instruction: &mut PisaInstruction,
) -> Result<(), ParseError> {
    match param {
        ParamType::OpName => {}
        ParamType::PolymodDegLog2 => instruction.pmd = parse_numeric(component)?,
        ParamType::Residual => instruction.residual = parse_numeric(component)?,
        ParamType::GaloisElement => instruction.galois_element = parse_numeric(component)?,
        ParamType::WParam => instruction.w_param = component.parse()?,
        ParamType::InputOperand => {
            instruction.add_input_operand(Operand::new(component, false));
        }
        ParamType::Immediate => {
            instruction.add_input_operand(Operand::new(component, true));
        }
        ParamType::OutputOperand => {
            instruction.add_output_operand(Operand::new(component, false));
        }
        ParamType::InputOutputOperand => {
            instruction.add_input_operand(Operand::new(component, false));
            instruction.add_output_operand(Operand::new(component, false));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_trim_and_skip_blanks() {
        let records = parse_csv_records("a, b ,c\n\nx,y\n").unwrap();
        assert_eq!(records, vec![vec!["a", "b", "c"], vec!["x", "y"]]);
    }

    #[test]
    fn instruction_roundtrip() {
        let text = "13, add, output0_0_0, input0_0_0, input1_0_0, 0\n\
                    13, muli, t_0_1, input0_0_1, R2_1, 1\n\
                    13, ntt, o_0_0, o_1_0, i_0_0, i_1_0, w_0_1_2, 0\n\
                    13, intt, o_0_0, o_1_0, i_0_0, i_1_0, w_0_1_2, 0, 3\n\
                    13, mac, acc_0_0, x_0_0, y_0_0, 0\n\
                    13, copy, d_0_0, s_0_0";
        let instructions = parse_instructions(text).unwrap();
        assert_eq!(instructions.len(), 6);

        let rendered: Vec<String> =
            instructions.iter().map(|instr| instr.to_string()).collect();
        for (line, rendered) in text.lines().zip(&rendered) {
            assert_eq!(rendered, line.trim());
        }

        // immediates keep their tag through parsing
        assert!(instructions[1].input_operand(1).immediate());
        // mac's accumulator appears as both input 0 and output 0
        assert_eq!(instructions[4].num_input_operands(), 3);
        assert_eq!(
            instructions[4].input_operand(0).location(),
            instructions[4].output_operand(0).location()
        );
        assert_eq!(instructions[3].galois_element, 3);
    }

    #[test]
    fn malformed_rows_fail() {
        assert!(matches!(
            parse_instructions("13, nonsense, a, b").unwrap_err(),
            ParseError::UnknownOpcode(_)
        ));
        assert!(matches!(
            parse_instructions("13, add, a, b, c").unwrap_err(),
            ParseError::FieldCount { .. }
        ));
        assert!(matches!(
            parse_instructions("xx, add, a, b, c, 0").unwrap_err(),
            ParseError::Numeric(_)
        ));
    }
}
