//! Request and response shapes exchanged between an upload host and the
//! chunk ingestion service.
//!
//! The host parses client requests into these types, hands them to the
//! service, and relays the serialized responses back unchanged.

pub mod constants;
pub mod messages;

// Re-export primary types for convenience.
pub use constants::{
    CHUNK_INDEX_WIDTH, CHUNK_SEPARATOR, COMPLETED_URL_PREFIX, DEFAULT_SESSION_COMPONENT,
    MAX_CHUNK_INDEX,
};
pub use messages::{
    ChunkUploadPayload, ChunkUploadRequest, CompletedResponse, ErrorResponse, MergeRequest,
    UploadResponse, UploadingResponse, progress_percent,
};
