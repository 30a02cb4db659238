//! polymap-mapper: lowers a trace of FHE polynomial operations into a p-ISA
//! instruction stream and a matching device-memory image.
//!
//! Pipeline: parameter extraction runs once per FHE context; each traced
//! operation is materialized into a [`kernel::PisaKernel`]; all kernels'
//! instructions are merged, fixed up against their dependency graph, and
//! emitted as a linear stream plus memory image.

pub mod context;
mod error;
pub mod kernel;
pub mod mapper;
pub mod memfile;
pub mod metadata;
pub mod optimizer;
pub mod program;
pub mod trace;
mod util;

pub use error::MapperError;
pub use mapper::{MappedProgram, MapperArguments, ProgramMapper};
pub use util::init_logger;
