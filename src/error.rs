use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort an OPF run. Each variant names the stage that failed.
///
/// Solver non-convergence is not an error: it is reported through
/// [`TerminationStatus`](crate::TerminationStatus) on the raw solution.
#[derive(Debug, Error)]
pub enum OpfError {
    /// The network file could not be read.
    #[error("reading network file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed network file.
    #[error("parse error in {}:{line}: {msg}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        msg: String,
    },

    /// Per-unit transformation or model instantiation failed.
    #[error("model build failed: {0}")]
    ModelBuild(String),

    /// No generator with the id used for cost-coefficient patching.
    #[error("model initialization failed: no generator with id '{0}'")]
    MissingGenerator(String),

    /// A bus lacks the three phases assumed by a constraint.
    #[error("constraint application failed: bus '{bus}' has phases {phases:?}, expected [1, 2, 3]")]
    UnknownBusPhase { bus: String, phases: Vec<usize> },

    /// Rejected by the opt-in configuration check.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Sparse LU factorization failed.
    #[error("linear solve failed: {0}")]
    LinearSolve(String),
}

pub type Result<T> = std::result::Result<T, OpfError>;
