use thiserror::Error;

use crate::chunk::ChunkId;

pub type Result<T> = std::result::Result<T, StrataError>;

#[derive(Debug, Error)]
pub enum StrataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid repository format: {0}")]
    InvalidFormat(String),

    #[error("repository parameter mismatch: {0}")]
    ParameterMismatch(String),

    #[error("unknown chunk tag: {0}")]
    UnknownChunkTag(u8),

    #[error("chunk not found in repository: {0}")]
    ChunkMissing(ChunkId),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage worker terminated early")]
    WorkerTerminated,
}
