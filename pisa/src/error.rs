use thiserror::Error;

/// Fatal problems while parsing p-ISA text formats. Nothing here is
/// recoverable: a malformed row means a broken generator or cache file.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("could not read '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("unknown opcode '{0}'")]
    UnknownOpcode(String),
    #[error("opcode '{opcode}' expects {expected} fields, got {got}")]
    FieldCount {
        opcode: String,
        expected: usize,
        got: usize,
    },
    #[error("unparseable numeric field '{0}'")]
    Numeric(String),
    #[error("malformed symbol name '{0}'")]
    MalformedSymbol(String),
    #[error("malformed twiddle parameter '{0}'")]
    MalformedWParam(String),
}

/// Violations of the instruction-graph invariants. These indicate a bug in
/// an upstream pass, not a runtime condition to recover from.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("instruction graph contains a cycle ({remaining} nodes unresolved); \
             this indicates a register naming collision")]
    Cycle { remaining: usize },
}
