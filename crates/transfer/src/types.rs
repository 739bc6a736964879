use std::fmt;
use std::path::PathBuf;

use chunkdock_protocol::{CHUNK_INDEX_WIDTH, CHUNK_SEPARATOR};

use crate::TransferError;
use crate::validation::{validate_file_name, validate_name_component};

/// Identity of an upload session: the name of its chunk directory.
///
/// Built from a base name and an upload id as `{base}-{upload_id}`, so two
/// concurrent uploads of files sharing a name never share chunk slots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// Derives the key from a caller-supplied base name and upload id.
    pub fn new(base_name: &str, upload_id: &str) -> Result<Self, TransferError> {
        validate_name_component("upload name", base_name)?;
        validate_name_component("upload id", upload_id)?;
        let key = format!("{base_name}-{upload_id}");
        validate_name_component("session key", &key)?;
        Ok(Self(key))
    }

    /// Uses an existing session folder name as the key (merge requests).
    pub fn from_folder(folder_name: &str) -> Result<Self, TransferError> {
        validate_name_component("folder name", folder_name)?;
        Ok(Self(folder_name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Descriptor of one logical file transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub key: SessionKey,
    /// Logical final file name (validated).
    pub file_name: String,
    /// Declared chunk count, if the client sent one.
    pub total_chunks: Option<u32>,
    /// Declared total size in bytes, if the client sent one.
    pub file_size: Option<u64>,
}

impl UploadSession {
    /// Creates a descriptor with no declared total or size.
    pub fn new(key: SessionKey, file_name: &str) -> Result<Self, TransferError> {
        validate_file_name(file_name)?;
        Ok(Self {
            key,
            file_name: file_name.to_string(),
            total_chunks: None,
            file_size: None,
        })
    }

    /// Sets the declared chunk count; zero means "unknown".
    pub fn with_total_chunks(mut self, total: u32) -> Self {
        self.total_chunks = (total > 0).then_some(total);
        self
    }

    /// Sets the declared file size; zero means "unknown".
    pub fn with_file_size(mut self, size: u64) -> Self {
        self.file_size = (size > 0).then_some(size);
        self
    }
}

/// One indexed fragment of an upload.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Zero-based position of the chunk within the file.
    pub index: u32,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data` (empty means no verification).
    pub checksum: String,
}

impl Chunk {
    /// Creates a chunk without a checksum.
    pub fn new(index: u32, data: Vec<u8>) -> Self {
        Self {
            index,
            data,
            checksum: String::new(),
        }
    }
}

/// A finished, committed output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFile {
    /// Full path of the output in the completed-files root.
    pub path: PathBuf,
    /// Generated name (`{timestamp}-{random}-{original}`).
    pub file_name: String,
    /// Original logical file name.
    pub original_file_name: String,
    pub total_chunks: u32,
    /// Bytes written to the output.
    pub size: u64,
}

/// Storage name of chunk `index` of `file_name`: `{file_name}.part.{index:05}`.
pub fn chunk_file_name(file_name: &str, index: u32) -> String {
    format!(
        "{file_name}{CHUNK_SEPARATOR}{index:0width$}",
        width = CHUNK_INDEX_WIDTH
    )
}

/// Parses the chunk index out of a directory entry name, if the entry is a
/// chunk of `file_name`.
pub fn parse_chunk_index(file_name: &str, entry_name: &str) -> Option<u32> {
    let digits = entry_name
        .strip_prefix(file_name)?
        .strip_prefix(CHUNK_SEPARATOR)?;
    if digits.len() != CHUNK_INDEX_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::MAX_FILE_NAME_LEN;

    #[test]
    fn session_key_joins_name_and_id() {
        let key = SessionKey::new("photo", "abc123").unwrap();
        assert_eq!(key.as_str(), "photo-abc123");
        assert_eq!(key.to_string(), "photo-abc123");
    }

    #[test]
    fn session_key_rejects_traversal() {
        assert!(matches!(
            SessionKey::new("..", "x"),
            Err(TransferError::InvalidSessionKey(_))
        ));
        assert!(SessionKey::new("photo", "../../etc").is_err());
        assert!(SessionKey::from_folder("a/b").is_err());
    }

    #[test]
    fn session_rejects_bad_file_name() {
        let key = SessionKey::new("photo", "1").unwrap();
        assert!(UploadSession::new(key.clone(), "../img.bin").is_err());
        assert!(UploadSession::new(key, "img.bin").is_ok());
    }

    #[test]
    fn overlong_names_are_rejected_up_front() {
        let long = "a".repeat(200);
        assert!(matches!(
            SessionKey::new(&long, &long),
            Err(TransferError::InvalidSessionKey(_))
        ));

        let key = SessionKey::new("photo", "1").unwrap();
        let too_long = "b".repeat(MAX_FILE_NAME_LEN + 1);
        assert!(matches!(
            UploadSession::new(key, &too_long),
            Err(TransferError::InvalidSessionKey(_))
        ));
    }

    #[test]
    fn zero_total_and_size_mean_unknown() {
        let key = SessionKey::new("photo", "1").unwrap();
        let session = UploadSession::new(key, "img.bin")
            .unwrap()
            .with_total_chunks(0)
            .with_file_size(0);
        assert_eq!(session.total_chunks, None);
        assert_eq!(session.file_size, None);

        let session = session.with_total_chunks(3).with_file_size(25);
        assert_eq!(session.total_chunks, Some(3));
        assert_eq!(session.file_size, Some(25));
    }

    #[test]
    fn chunk_name_is_zero_padded() {
        assert_eq!(chunk_file_name("img.bin", 0), "img.bin.part.00000");
        assert_eq!(chunk_file_name("img.bin", 42), "img.bin.part.00042");
        assert_eq!(chunk_file_name("img.bin", 99_999), "img.bin.part.99999");
    }

    #[test]
    fn parse_accepts_own_chunks_only() {
        assert_eq!(parse_chunk_index("f", "f.part.00000"), Some(0));
        assert_eq!(parse_chunk_index("f", "f.part.00004"), Some(4));
        assert_eq!(parse_chunk_index("f", "g.part.00004"), None);
        assert_eq!(parse_chunk_index("f", "f.part.0004"), None);
        assert_eq!(parse_chunk_index("f", "f.part.000004"), None);
        assert_eq!(parse_chunk_index("f", "f.part.0000a"), None);
        assert_eq!(parse_chunk_index("f", "f.part.00001.3f2a.tmp"), None);
        // A file whose name extends another file's name is not confused with it.
        assert_eq!(parse_chunk_index("f", "f.part.00001.part.00000"), None);
        assert_eq!(parse_chunk_index("a.b", "a.b.part.00007"), Some(7));
    }
}
