use thiserror::Error;

use polymap_arith::ArithError;
use polymap_pisa::{GraphError, ParseError};

/// Pipeline-level failures. The mapper has no partial-success mode: any of
/// these aborts the whole run for the trace being processed.
#[derive(Debug, Error)]
pub enum MapperError {
    #[error("unknown operation '{0}' in program trace")]
    UnknownOperation(String),
    #[error("unsupported scheme '{0}'")]
    UnknownScheme(String),
    #[error("operation '{operation}' specifies {expected} fields but {got} were provided")]
    ArgumentCount {
        operation: String,
        expected: usize,
        got: usize,
    },
    #[error("unparseable trace field '{0}'")]
    InvalidField(String),
    #[error("malformed operand '{0}' (expected label-parts-rns)")]
    MalformedOperand(String),

    #[error("context is missing required field {0}")]
    MissingContextField(&'static str),
    #[error("context metadata_extra is missing entry '{0}'")]
    MissingMetadataExtra(String),
    #[error("RNS channel index {index} out of range ({count} channels)")]
    RnsIndexOutOfRange { index: usize, count: usize },
    #[error("polynomial degree {0} is not a power of two")]
    DegreeNotPowerOfTwo(usize),
    #[error("metadata extraction is not defined for scheme {0}")]
    UnsupportedScheme(crate::program::Scheme),

    #[error("operation '{0}' has no operand at the position the kernel mapping expects")]
    MissingOperand(String),

    #[error("kernel generator '{generator}' failed for operation '{operation}': {status}")]
    KernelGenerator {
        generator: String,
        operation: String,
        status: String,
    },
    #[error("kernel generator produced no instructions at '{path}'")]
    EmptyKernel { path: String },

    #[error("mac instruction '{instruction}' has no input register aliasing its output")]
    MacNoAlias { instruction: String },
    #[error("graph operation node carries no instruction reference")]
    DanglingOperationNode,
    #[error("internal symbol '{0}' missing from kernel namespace map")]
    MissingInternalSymbol(String),

    #[error("could not access '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("binary trace serialization failed")]
    Serialization(#[from] bincode::Error),

    #[error(transparent)]
    Arith(#[from] ArithError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl MapperError {
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
