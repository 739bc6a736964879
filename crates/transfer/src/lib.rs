//! Chunked upload ingestion: chunk storage, ordered assembly and per-session
//! coordination.
//!
//! Chunks live under `{chunks_root}/{base}-{upload_id}/{file}.part.{index:05}`.
//! Once every index of a session is present, the [`Assembler`] concatenates
//! them in index order into `{completed_root}/{timestamp}-{random}-{file}`
//! and the [`ChunkStore`] removes the session's chunks.

mod assemble;
mod chunked;
mod locks;
mod service;
mod store;
mod types;
mod validation;

pub use assemble::{Assembler, unique_output_name};
pub use chunked::{ChunkReader, calculate_file_checksum, checksum_bytes};
pub use locks::{SessionGuard, SessionLocks};
pub use service::{IngestOutcome, IngestService, SessionStatus};
pub use store::ChunkStore;
pub use types::{AssembledFile, Chunk, SessionKey, UploadSession, chunk_file_name, parse_chunk_index};
pub use validation::{MAX_FILE_NAME_LEN, validate_file_name, validate_name_component};

use chunkdock_protocol::ErrorResponse;

/// Default chunk size used when splitting a local file: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no chunks found for session {0}")]
    SessionNotFound(String),

    #[error("missing chunk {index} for file {file_name}")]
    MissingChunk { file_name: String, index: u32 },

    #[error("invalid session key: {0}")]
    InvalidSessionKey(String),

    #[error("checksum mismatch for chunk {index}")]
    ChecksumMismatch { index: u32 },

    #[error("chunk index {0} out of range")]
    ChunkIndexOutOfRange(u32),

    #[error("assembled size {actual} does not match declared size {expected}")]
    SizeMismatch { expected: u64, actual: u64 },
}

impl TransferError {
    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Io(_) => "io",
            TransferError::SessionNotFound(_) => "session_not_found",
            TransferError::MissingChunk { .. } => "missing_chunk",
            TransferError::InvalidSessionKey(_) => "invalid_session_key",
            TransferError::ChecksumMismatch { .. } => "checksum_mismatch",
            TransferError::ChunkIndexOutOfRange(_) => "chunk_index_out_of_range",
            TransferError::SizeMismatch { .. } => "size_mismatch",
        }
    }

    /// Builds the error body relayed to the client.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}
