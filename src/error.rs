use smol_str::SmolStr;
use thiserror::Error;

/// Diagnostic severity for uniformity findings.
///
/// Stands in for WGSL diagnostic filters: barriers always constrain at
/// `Error`, the derivative/subgroup families at whatever severity the
/// caller configures.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Every failure the core can surface. All variants are fatal for the
/// compilation or analysis that raised them; partial results are never
/// exposed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("parse error at {line}:{column}: {message}")]
    Parse { line: u32, column: u32, message: String },

    #[error("duplicate module-scope declaration `{0}`")]
    DuplicateModuleName(SmolStr),

    #[error("module-scope declarations form a dependency cycle involving `{0}`")]
    CyclicModuleDeclaration(SmolStr),

    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(SmolStr),

    #[error("unknown callee `{0}`")]
    UnknownCallee(SmolStr),

    #[error("unknown type `{0}`")]
    UnknownType(SmolStr),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("no common type between `{0}` and `{1}`")]
    NoCommonType(String, String),

    #[error("resolver invariant violated: {0}")]
    ResolverInternal(String),

    #[error("uniformity violation ({severity:?}) in `{function}`: {message}")]
    UniformityViolation {
        severity: Severity,
        function: SmolStr,
        message: String,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
