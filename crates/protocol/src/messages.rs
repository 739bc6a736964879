use serde::{Deserialize, Serialize};

use crate::constants::{COMPLETED_URL_PREFIX, DEFAULT_SESSION_COMPONENT};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Metadata sent alongside every chunk.
///
/// All fields are optional on the wire; accessors apply the host defaults
/// (`"default"` for name/upload id, index 0, one chunk in total).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// SHA-256 hex digest of the chunk payload (empty means no verification).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

impl ChunkUploadRequest {
    /// Base name of the session, `"default"` when absent or empty.
    pub fn base_name(&self) -> &str {
        non_empty_or_default(self.name.as_deref())
    }

    /// Upload identifier of the session, `"default"` when absent or empty.
    pub fn upload_id(&self) -> &str {
        non_empty_or_default(self.upload_id.as_deref())
    }

    /// Session folder name: `{base_name}-{upload_id}`.
    pub fn folder_name(&self) -> String {
        format!("{}-{}", self.base_name(), self.upload_id())
    }

    pub fn chunk_index(&self) -> u32 {
        self.chunk_index.unwrap_or(0)
    }

    /// Declared chunk count; a request without one describes a single-chunk upload.
    pub fn total_chunks(&self) -> u32 {
        self.total_chunks.filter(|n| *n > 0).unwrap_or(1)
    }

    /// Logical file name, falling back to the name the transport attached
    /// to the uploaded part.
    pub fn file_name_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self.file_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => fallback,
        }
    }

    /// Declared total size; zero is treated as "not declared".
    pub fn file_size(&self) -> Option<u64> {
        self.file_size.filter(|s| *s > 0)
    }
}

fn non_empty_or_default(value: Option<&str>) -> &str {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => DEFAULT_SESSION_COMPONENT,
    }
}

/// Chunk metadata plus payload for JSON transports.
///
/// The `data` field is base64-encoded in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadPayload {
    #[serde(flatten)]
    pub meta: ChunkUploadRequest,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Out-of-band merge of a session whose completion was missed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub file_name: String,
    pub folder_name: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Result of a chunk upload or merge, tagged by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UploadResponse {
    Uploading(UploadingResponse),
    Completed(CompletedResponse),
}

impl UploadResponse {
    pub fn is_completed(&self) -> bool {
        matches!(self, UploadResponse::Completed(_))
    }
}

/// The session is still waiting for chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadingResponse {
    pub message: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub file_name: String,
    pub progress: u32,
}

impl UploadingResponse {
    pub fn new(chunk_index: u32, total_chunks: u32, file_name: impl Into<String>) -> Self {
        Self {
            message: format!(
                "Chunk {}/{} uploaded successfully",
                chunk_index.saturating_add(1),
                total_chunks
            ),
            chunk_index,
            total_chunks,
            file_name: file_name.into(),
            progress: progress_percent(chunk_index, total_chunks),
        }
    }
}

/// The session was assembled into a final file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedResponse {
    pub message: String,
    /// Generated name of the assembled file.
    pub file_name: String,
    pub original_file_name: String,
    pub url: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl CompletedResponse {
    /// Completion triggered by the last chunk of an upload.
    pub fn assembled(
        file_name: impl Into<String>,
        original_file_name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self::with_message(
            "File uploaded and assembled successfully",
            file_name.into(),
            original_file_name.into(),
            path.into(),
        )
    }

    /// Completion triggered by an explicit merge request.
    pub fn merged(
        file_name: impl Into<String>,
        original_file_name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self::with_message(
            "File merged successfully",
            file_name.into(),
            original_file_name.into(),
            path.into(),
        )
    }

    fn with_message(
        message: &str,
        file_name: String,
        original_file_name: String,
        path: String,
    ) -> Self {
        Self {
            message: message.to_string(),
            url: format!("{COMPLETED_URL_PREFIX}{file_name}"),
            file_name,
            original_file_name,
            path,
            total_chunks: None,
            size: None,
        }
    }
}

/// Error body relayed to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable error kind.
    pub code: String,
    pub message: String,
}

/// Upload progress in percent, based on the index of the chunk just received.
pub fn progress_percent(chunk_index: u32, total_chunks: u32) -> u32 {
    if total_chunks == 0 {
        return 0;
    }
    let done = u64::from(chunk_index) + 1;
    let pct = (done * 100 + u64::from(total_chunks) / 2) / u64::from(total_chunks);
    pct.min(100) as u32
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
