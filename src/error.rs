use thiserror::Error;

#[derive(Debug, Error)]
pub enum MbatError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed record at {path}:{line}: \"{content}\"")]
    MalformedRecord {
        path: String,
        line: usize,
        content: String,
    },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("missing metadata: {0}")]
    MissingMetadata(String),

    #[error("dimension mismatch: {0}")]
    Dimension(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MbatError>;
