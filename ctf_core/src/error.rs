use thiserror::Error;

/// Every failure the codec can report.
///
/// All variants are terminal for the encode/decode call that produced them;
/// nothing is retried internally and no partial output accompanies an error.
#[derive(Error, Debug)]
pub enum CtfError {
    #[error("corrupt dictionary: {0}")]
    CorruptDictionary(String),

    #[error("unsupported dictionary format version {found} (supported: {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("missing column '{0}'")]
    MissingColumn(String),

    #[error("arity mismatch: {0}")]
    ArityMismatch(String),

    #[error("column {0} was already written")]
    DuplicateColumn(usize),

    #[error("symbol {symbol} out of range for column '{column}'")]
    SymbolOutOfRange { column: String, symbol: u64 },

    #[error("truncated buffer: {0}")]
    TruncatedBuffer(String),

    #[error("bad magic bytes: not a {0}")]
    BadMagic(&'static str),

    #[error("buffer format version {found} does not match supported version {supported}")]
    VersionMismatch { found: u16, supported: u16 },

    #[error("failed to allocate {0} bytes")]
    AllocationFailure(usize),

    #[error("column '{0}' has no embedded table and no external dictionary was supplied")]
    MissingDictionary(String),

    #[error("checksum mismatch in column {column}: expected {expected:016x}, got {actual:016x}")]
    ChecksumMismatch {
        column: usize,
        expected: u64,
        actual: u64,
    },

    #[error("corrupt block: {0}")]
    CorruptBlock(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Field-less discriminant of [`CtfError`], for callers that branch on the
/// kind of failure (e.g. transport bug vs. data problem).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    CorruptDictionary,
    UnsupportedVersion,
    SchemaMismatch,
    MissingColumn,
    ArityMismatch,
    DuplicateColumn,
    SymbolOutOfRange,
    TruncatedBuffer,
    BadMagic,
    VersionMismatch,
    AllocationFailure,
    MissingDictionary,
    ChecksumMismatch,
    CorruptBlock,
    InvalidConfig,
    Io,
}

impl CtfError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CtfError::CorruptDictionary(_) => ErrorKind::CorruptDictionary,
            CtfError::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            CtfError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            CtfError::MissingColumn(_) => ErrorKind::MissingColumn,
            CtfError::ArityMismatch(_) => ErrorKind::ArityMismatch,
            CtfError::DuplicateColumn(_) => ErrorKind::DuplicateColumn,
            CtfError::SymbolOutOfRange { .. } => ErrorKind::SymbolOutOfRange,
            CtfError::TruncatedBuffer(_) => ErrorKind::TruncatedBuffer,
            CtfError::BadMagic(_) => ErrorKind::BadMagic,
            CtfError::VersionMismatch { .. } => ErrorKind::VersionMismatch,
            CtfError::AllocationFailure(_) => ErrorKind::AllocationFailure,
            CtfError::MissingDictionary(_) => ErrorKind::MissingDictionary,
            CtfError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            CtfError::CorruptBlock(_) => ErrorKind::CorruptBlock,
            CtfError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            CtfError::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn truncated(what: impl Into<String>) -> Self {
        CtfError::TruncatedBuffer(what.into())
    }
}

pub type Result<T> = std::result::Result<T, CtfError>;

/// Reserve `additional` bytes, reporting allocator refusal as a typed error.
pub(crate) fn try_reserve(buf: &mut Vec<u8>, additional: usize) -> Result<()> {
    buf.try_reserve(additional)
        .map_err(|_| CtfError::AllocationFailure(buf.len().saturating_add(additional)))
}
