//! Error types for the AQL pipeline.
//!
//! Every error knows which pipeline stage produced it, so callers can report
//! "failed while resolving joins" instead of a bare message. Compile-stage
//! errors are always fail-fast: nothing is executed once one is raised.

use thiserror::Error;

/// The pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parse,
    Build,
    Decorate,
    Resolve,
    Generate,
    Execute,
    Decode,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Parse => "parse",
            Stage::Build => "build",
            Stage::Decorate => "decorate",
            Stage::Resolve => "resolve",
            Stage::Generate => "generate",
            Stage::Execute => "execute",
            Stage::Decode => "decode",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum AqlError {
    /// No grammar derivation consumed the whole input. `position` is the
    /// deepest byte offset any derivation reached.
    #[error("syntax error at byte {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("unknown domain '{0}'")]
    UnknownDomain(String),

    #[error("unknown field '{field}' in domain '{domain}'")]
    UnknownField { domain: String, field: String },

    #[error("comparator {comparator} cannot be applied to field '{field}' ({reason})")]
    TypeMismatch {
        field: String,
        comparator: String,
        reason: String,
    },

    #[error("no allowed join path from table '{from}' to table '{to}' in domain '{domain}'")]
    JoinGraphUnreachable {
        domain: String,
        from: String,
        to: String,
    },

    /// The backing store rejected the compiled SQL. The SQL text is carried
    /// for operator diagnosis; bound values are not echoed back.
    #[error("execution failed for `{sql}`: {source}")]
    Execution {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("cannot decode output column {index} ('{field}'): {message}")]
    ResultDecoding {
        index: usize,
        field: String,
        message: String,
    },

    #[error("query deadline exceeded after {rows} rows")]
    DeadlineExceeded { rows: u64 },
}

impl AqlError {
    /// The stage this error aborted the pipeline in.
    pub fn stage(&self) -> Stage {
        match self {
            AqlError::Syntax { .. } => Stage::Parse,
            AqlError::UnknownDomain(_) => Stage::Build,
            AqlError::UnknownField { .. } => Stage::Resolve,
            AqlError::TypeMismatch { .. } => Stage::Resolve,
            AqlError::JoinGraphUnreachable { .. } => Stage::Resolve,
            AqlError::Execution { .. } => Stage::Execute,
            AqlError::ResultDecoding { .. } => Stage::Decode,
            AqlError::DeadlineExceeded { .. } => Stage::Execute,
        }
    }
}

pub type Result<T> = std::result::Result<T, AqlError>;
