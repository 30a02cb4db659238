use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::ParseError;
use crate::symbol::split_location;

/// Field kinds appearing in a p-ISA CSV row, in instruction-specific order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    PolymodDegLog2,
    OpName,
    InputOperand,
    OutputOperand,
    /// One register acting as both accumulator input and output.
    InputOutputOperand,
    Immediate,
    WParam,
    Residual,
    GaloisElement,
}

use ParamType::*;

/// The closed p-ISA opcode set the kernel generator emits.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Mac,
    Maci,
    Muli,
    Ntt,
    Intt,
    Copy,
}

impl Opcode {
    /// Ordered field layout of the opcode's CSV row.
    pub fn description(self) -> &'static [ParamType] {
        match self {
            Opcode::Add | Opcode::Sub | Opcode::Mul => {
                &[PolymodDegLog2, OpName, OutputOperand, InputOperand, InputOperand, Residual]
            }
            Opcode::Mac => {
                &[PolymodDegLog2, OpName, InputOutputOperand, InputOperand, InputOperand, Residual]
            }
            Opcode::Maci => {
                &[PolymodDegLog2, OpName, InputOutputOperand, InputOperand, Immediate, Residual]
            }
            Opcode::Muli => {
                &[PolymodDegLog2, OpName, OutputOperand, InputOperand, Immediate, Residual]
            }
            Opcode::Ntt => &[
                PolymodDegLog2, OpName, OutputOperand, OutputOperand, InputOperand, InputOperand,
                WParam, Residual,
            ],
            Opcode::Intt => &[
                PolymodDegLog2, OpName, OutputOperand, OutputOperand, InputOperand, InputOperand,
                WParam, Residual, GaloisElement,
            ],
            Opcode::Copy => &[PolymodDegLog2, OpName, OutputOperand, InputOperand],
        }
    }
}

/// A named register or immediate slot of an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    location: String,
    immediate: bool,
}

impl Operand {
    pub fn new(location: impl Into<String>, immediate: bool) -> Self {
        Self { location: location.into(), immediate }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn set_location(&mut self, location: impl Into<String>) {
        self.location = location.into();
    }

    /// Register-name root, with the trailing part/RNS fields stripped.
    pub fn location_root(&self) -> &str {
        split_location(&self.location).0
    }

    /// Replaces the root while keeping the part/RNS suffix.
    pub fn set_location_root(&mut self, new_root: &str) {
        let (_, index) = split_location(&self.location);
        self.location = format!("{new_root}{index}");
    }

    pub fn immediate(&self) -> bool {
        self.immediate
    }

    pub fn set_immediate(&mut self, immediate: bool) {
        self.immediate = immediate;
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location)
    }
}

/// Packed NTT/INTT twiddle parameter `w_<residual>_<stage>_<block>`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WParam {
    pub residual: u32,
    pub stage: u32,
    pub block: u32,
}

impl FromStr for WParam {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseError::MalformedWParam(s.to_string());
        let mut fields = s.split('_');
        if fields.next() != Some("w") {
            return Err(malformed());
        }
        let residual = fields.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
        let stage = fields.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
        let block = fields.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
        if fields.next().is_some() {
            return Err(malformed());
        }
        Ok(Self { residual, stage, block })
    }
}

impl fmt::Display for WParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w_{}_{}_{}", self.residual, self.stage, self.block)
    }
}

/// One p-ISA instruction. Not every field is meaningful for every opcode;
/// the opcode's [`Opcode::description`] says which are.
#[derive(Debug, Clone, PartialEq)]
pub struct PisaInstruction {
    pub opcode: Opcode,
    pub pmd: u32,
    pub residual: u32,
    pub w_param: WParam,
    pub galois_element: u32,
    inputs: SmallVec<[Operand; 3]>,
    outputs: SmallVec<[Operand; 2]>,
}

impl PisaInstruction {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            pmd: 0,
            residual: 0,
            w_param: WParam::default(),
            // intt defaults to the identity element; every other opcode
            // ignores the field
            galois_element: 1,
            inputs: SmallVec::new(),
            outputs: SmallVec::new(),
        }
    }

    /// Builds the synthesized register-duplication instruction.
    pub fn copy(pmd: u32, residual: u32, output: Operand, input: Operand) -> Self {
        let mut instr = Self::new(Opcode::Copy);
        instr.pmd = pmd;
        instr.residual = residual;
        instr.add_output_operand(output);
        instr.add_input_operand(input);
        instr
    }

    pub fn add_input_operand(&mut self, op: Operand) {
        self.inputs.push(op);
    }

    pub fn add_output_operand(&mut self, op: Operand) {
        self.outputs.push(op);
    }

    pub fn num_input_operands(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_output_operands(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_operand(&self, n: usize) -> &Operand {
        &self.inputs[n]
    }

    pub fn output_operand(&self, n: usize) -> &Operand {
        &self.outputs[n]
    }

    pub fn input_operand_mut(&mut self, n: usize) -> &mut Operand {
        &mut self.inputs[n]
    }

    pub fn output_operand_mut(&mut self, n: usize) -> &mut Operand {
        &mut self.outputs[n]
    }

    pub fn input_operands(&self) -> &[Operand] {
        &self.inputs
    }

    pub fn output_operands(&self) -> &[Operand] {
        &self.outputs
    }
}

impl fmt::Display for PisaInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut inputs = 0usize;
        let mut outputs = 0usize;
        for (element, param) in self.opcode.description().iter().enumerate() {
            if element != 0 {
                f.write_str(", ")?;
            }
            match param {
                PolymodDegLog2 => write!(f, "{}", self.pmd)?,
                OpName => write!(f, "{}", self.opcode)?,
                OutputOperand => {
                    write!(f, "{}", self.outputs[outputs])?;
                    outputs += 1;
                }
                InputOperand => {
                    write!(f, "{}", self.inputs[inputs])?;
                    inputs += 1;
                }
                InputOutputOperand => {
                    write!(f, "{}", self.outputs[outputs])?;
                    inputs += 1;
                    outputs += 1;
                }
                Immediate => {
                    write!(f, "{}", self.inputs[inputs])?;
                    inputs += 1;
                }
                WParam => write!(f, "{}", self.w_param)?,
                Residual => write!(f, "{}", self.residual)?,
                GaloisElement => write!(f, "{}", self.galois_element)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_names_roundtrip() {
        use strum::IntoEnumIterator;
        for opcode in Opcode::iter() {
            assert_eq!(opcode.to_string().parse::<Opcode>().unwrap(), opcode);
        }
        assert!("bogus".parse::<Opcode>().is_err());
    }

    #[test]
    fn wparam_roundtrip() {
        let w: WParam = "w_3_1_0".parse().unwrap();
        assert_eq!(w, WParam { residual: 3, stage: 1, block: 0 });
        assert_eq!(w.to_string(), "w_3_1_0");
        assert!("w_1_2".parse::<WParam>().is_err());
        assert!("v_1_2_3".parse::<WParam>().is_err());
    }

    #[test]
    fn operand_root_rewrite() {
        let mut op = Operand::new("output0_1_2", false);
        assert_eq!(op.location_root(), "output0");
        op.set_location_root("ct");
        assert_eq!(op.location(), "ct_1_2");
    }

    #[test]
    fn display_follows_description() {
        let mut instr = PisaInstruction::new(Opcode::Add);
        instr.pmd = 13;
        instr.residual = 1;
        instr.add_output_operand(Operand::new("c_0_1", false));
        instr.add_input_operand(Operand::new("a_0_1", false));
        instr.add_input_operand(Operand::new("b_0_1", false));
        assert_eq!(instr.to_string(), "13, add, c_0_1, a_0_1, b_0_1, 1");

        let mut mac = PisaInstruction::new(Opcode::Mac);
        mac.pmd = 13;
        mac.add_output_operand(Operand::new("acc_0_0", false));
        mac.add_input_operand(Operand::new("acc_0_0", false));
        mac.add_input_operand(Operand::new("x_0_0", false));
        mac.add_input_operand(Operand::new("y_0_0", false));
        assert_eq!(mac.to_string(), "13, mac, acc_0_0, x_0_0, y_0_0, 0");
    }
}
