//! p-ISA instruction model for the polymap compiler: the closed opcode set,
//! the CSV wire format the kernel generator speaks, the symbol-name grammar,
//! and the data-dependency graph the optimizer passes run over.

mod error;
mod graph;
mod instruction;
pub mod parser;
pub mod symbol;

pub use error::{GraphError, ParseError};
pub use graph::{GraphOperation, InstructionGraph, NodeData, NodeType};
pub use instruction::{Opcode, Operand, ParamType, PisaInstruction, WParam};

pub use petgraph::stable_graph::NodeIndex;
