//! CLI-boundary error type.
//!
//! The library crates this binary depends on (`ms-pdb`, `ms-codeview`, `ms-coff`) propagate
//! `anyhow::Error` internally, with `.context(...)` breadcrumbs. At the CLI boundary we need a
//! small set of exit-code classes, so errors are classified into `SymbolizeError` right before
//! they reach `main`.

/// Error classes the CLI can distinguish, for the purpose of choosing an exit code and a
/// one-line diagnostic.
#[derive(thiserror::Error, Debug)]
pub enum SymbolizeError {
    /// Opening or mapping a file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The PDB, PE image, or one of their substreams was malformed.
    #[error("format error: {0}")]
    Format(anyhow::Error),

    /// The input uses a feature this reader deliberately does not support (managed-code
    /// token/RID remap streams, CLR images).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The PDB has no `/names` stream, so source file paths cannot be resolved.
    #[error("missing name stream: {0}")]
    MissingName(String),
}

impl SymbolizeError {
    /// The process exit code that corresponds to this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            SymbolizeError::Io(_) => 1,
            SymbolizeError::Format(_) => 1,
            SymbolizeError::Unsupported(_) => 1,
            SymbolizeError::MissingName(_) => 1,
        }
    }
}

impl From<anyhow::Error> for SymbolizeError {
    fn from(e: anyhow::Error) -> Self {
        SymbolizeError::Format(e)
    }
}
