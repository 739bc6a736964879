//! Filesystem-backed chunk storage.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chunkdock_protocol::{CHUNK_SEPARATOR, MAX_CHUNK_INDEX};
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::chunked::checksum_bytes;
use crate::types::{Chunk, SessionKey, UploadSession, chunk_file_name, parse_chunk_index};

/// Suffix of in-flight chunk writes. Never matches a chunk name.
const TEMP_SUFFIX: &str = ".tmp";

/// Stores chunks as `{root}/{session_key}/{file_name}.part.{index:05}`.
///
/// Holds no state besides its root, so clones are cheap and every call sees
/// the current filesystem contents.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every chunk of a session.
    pub fn session_dir(&self, key: &SessionKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Path of one chunk slot.
    pub fn chunk_path(&self, session: &UploadSession, index: u32) -> PathBuf {
        self.session_dir(&session.key)
            .join(chunk_file_name(&session.file_name, index))
    }

    /// Writes a chunk into its slot, replacing any earlier upload of the
    /// same index.
    ///
    /// - Rejects indices that do not fit the 5-digit encoding.
    /// - Verifies the checksum if non-empty.
    /// - Creates the session directory as needed.
    /// - Writes to a temporary sibling and renames it into place, so a
    ///   partially written chunk is never observed as present.
    pub fn write_chunk(&self, session: &UploadSession, chunk: &Chunk) -> Result<(), TransferError> {
        if chunk.index > MAX_CHUNK_INDEX {
            return Err(TransferError::ChunkIndexOutOfRange(chunk.index));
        }

        if !chunk.checksum.is_empty() && checksum_bytes(&chunk.data) != chunk.checksum {
            return Err(TransferError::ChecksumMismatch { index: chunk.index });
        }

        let dir = self.session_dir(&session.key);
        fs::create_dir_all(&dir)?;

        let final_path = self.chunk_path(session, chunk.index);
        let temp_path = dir.join(format!(
            "{}.{}{TEMP_SUFFIX}",
            chunk_file_name(&session.file_name, chunk.index),
            uuid::Uuid::new_v4().simple()
        ));

        let result = write_file(&temp_path, &chunk.data)
            .and_then(|()| fs::rename(&temp_path, &final_path));
        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        debug!(
            session = %session.key,
            file = %session.file_name,
            index = chunk.index,
            bytes = chunk.data.len(),
            "chunk stored"
        );
        Ok(())
    }

    /// Returns `true` if chunk `index` of the session is present.
    pub fn chunk_exists(&self, session: &UploadSession, index: u32) -> bool {
        self.chunk_path(session, index).is_file()
    }

    /// Opens chunk `index` for reading.
    ///
    /// A missing slot is reported as [`TransferError::MissingChunk`].
    pub fn open_chunk(&self, session: &UploadSession, index: u32) -> Result<File, TransferError> {
        File::open(self.chunk_path(session, index)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => TransferError::MissingChunk {
                file_name: session.file_name.clone(),
                index,
            },
            _ => TransferError::Io(e),
        })
    }

    /// Sorted indices of every chunk of the session currently on disk.
    ///
    /// A snapshot: chunks written during the scan may or may not appear.
    pub fn present_chunks(&self, session: &UploadSession) -> Result<Vec<u32>, TransferError> {
        let entries = match fs::read_dir(self.session_dir(&session.key)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut indices: Vec<u32> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name();
                parse_chunk_index(&session.file_name, &name.to_string_lossy())
            })
            .collect();
        indices.sort_unstable();
        Ok(indices)
    }

    /// Infers the chunk count from storage: `max(index) + 1`, or 0 when no
    /// chunk of the session exists.
    pub fn count_chunks(&self, session: &UploadSession) -> Result<u32, TransferError> {
        Ok(self
            .present_chunks(session)?
            .last()
            .map_or(0, |max| max + 1))
    }

    /// Returns `true` iff every index in `[0, total)` is present.
    ///
    /// Stops at the first missing index. A session whose directory does not
    /// exist is never complete.
    pub fn is_complete(&self, session: &UploadSession, total: u32) -> bool {
        if !self.session_dir(&session.key).is_dir() {
            return false;
        }
        (0..total).all(|index| self.chunk_exists(session, index))
    }

    /// Indices in `[0, total)` that have not been uploaded yet.
    pub fn missing_chunks(
        &self,
        session: &UploadSession,
        total: u32,
    ) -> Result<Vec<u32>, TransferError> {
        let present = self.present_chunks(session)?;
        Ok((0..total)
            .filter(|index| present.binary_search(index).is_err())
            .collect())
    }

    /// Removes every chunk (and stale in-flight write) of the session's file,
    /// then the session directory if it is left empty.
    ///
    /// Best effort: a missing directory is a no-op and individual removal
    /// failures are logged and skipped. Returns the number of chunks removed.
    pub fn delete_session(&self, session: &UploadSession) -> usize {
        let dir = self.session_dir(&session.key);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(dir = %dir.display(), error = %e, "failed to read session directory");
                }
                return 0;
            }
        };

        let temp_prefix = format!("{}{CHUNK_SEPARATOR}", session.file_name);
        let mut deleted = 0usize;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let is_chunk = parse_chunk_index(&session.file_name, &name).is_some();
            let is_stale_temp = name.starts_with(&temp_prefix) && name.ends_with(TEMP_SUFFIX);
            if !is_chunk && !is_stale_temp {
                continue;
            }

            match fs::remove_file(entry.path()) {
                Ok(()) if is_chunk => deleted += 1,
                Ok(()) => {}
                Err(e) => {
                    warn!(file = %entry.path().display(), error = %e, "failed to delete chunk");
                }
            }
        }

        let is_empty = fs::read_dir(&dir)
            .map(|mut rest| rest.next().is_none())
            .unwrap_or(false);
        if is_empty && let Err(e) = fs::remove_dir(&dir) {
            warn!(dir = %dir.display(), error = %e, "failed to remove session directory");
        }

        info!(session = %session.key, file = %session.file_name, deleted, "cleaned up chunks");
        deleted
    }
}

fn write_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn session(file_name: &str) -> UploadSession {
        let key = SessionKey::new("photo", "abc123").unwrap();
        UploadSession::new(key, file_name).unwrap()
    }

    fn write(store: &ChunkStore, session: &UploadSession, index: u32, data: &[u8]) {
        store
            .write_chunk(session, &Chunk::new(index, data.to_vec()))
            .unwrap();
    }

    #[test]
    fn write_creates_session_dir_and_slot() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let s = session("img.bin");

        write(&store, &s, 3, b"data");

        let path = dir.path().join("photo-abc123").join("img.bin.part.00003");
        assert_eq!(std::fs::read(path).unwrap(), b"data");
        assert!(store.chunk_exists(&s, 3));
        assert!(!store.chunk_exists(&s, 0));
    }

    #[test]
    fn write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let s = session("img.bin");

        write(&store, &s, 0, b"a");
        write(&store, &s, 1, b"b");

        let names: Vec<String> = std::fs::read_dir(store.session_dir(&s.key))
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| !n.ends_with(".tmp")));
    }

    #[test]
    fn rewrite_replaces_payload() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let s = session("img.bin");

        write(&store, &s, 0, b"first upload");
        write(&store, &s, 0, b"retry");

        let content = std::fs::read(store.chunk_path(&s, 0)).unwrap();
        assert_eq!(content, b"retry");
        assert_eq!(store.count_chunks(&s).unwrap(), 1);
    }

    #[test]
    fn write_verifies_checksum() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let s = session("img.bin");

        let data = b"test data";
        let good = Chunk {
            index: 0,
            data: data.to_vec(),
            checksum: checksum_bytes(data),
        };
        store.write_chunk(&s, &good).unwrap();

        let bad = Chunk {
            index: 1,
            data: data.to_vec(),
            checksum: "0000000000000000000000000000000000000000000000000000000000000000".into(),
        };
        let result = store.write_chunk(&s, &bad);
        assert!(matches!(
            result.unwrap_err(),
            TransferError::ChecksumMismatch { index: 1 }
        ));
        assert!(!store.chunk_exists(&s, 1));
    }

    #[test]
    fn write_rejects_index_beyond_width() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let s = session("img.bin");

        let result = store.write_chunk(&s, &Chunk::new(100_000, b"x".to_vec()));
        assert!(matches!(
            result.unwrap_err(),
            TransferError::ChunkIndexOutOfRange(100_000)
        ));
        write(&store, &s, 99_999, b"x");
        assert_eq!(store.count_chunks(&s).unwrap(), 100_000);
    }

    #[test]
    fn count_infers_from_highest_index() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let s = session("f");

        for index in 0..5 {
            write(&store, &s, index, b"x");
        }
        assert_eq!(store.count_chunks(&s).unwrap(), 5);
    }

    #[test]
    fn count_ignores_other_files_and_gaps() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let s = session("f");
        let other = session("g");

        write(&store, &s, 0, b"x");
        write(&store, &s, 6, b"x");
        write(&store, &other, 9, b"x");
        std::fs::write(store.session_dir(&s.key).join("notes.txt"), b"n").unwrap();

        // Gaps are not filled in: the count is max + 1.
        assert_eq!(store.count_chunks(&s).unwrap(), 7);
        assert_eq!(store.present_chunks(&s).unwrap(), vec![0, 6]);
        assert_eq!(store.count_chunks(&other).unwrap(), 10);
    }

    #[test]
    fn count_is_zero_for_unknown_session() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        assert_eq!(store.count_chunks(&session("img.bin")).unwrap(), 0);
        assert!(store.present_chunks(&session("img.bin")).unwrap().is_empty());
    }

    #[test]
    fn completeness_transitions_on_last_chunk() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let s = session("img.bin");

        assert!(!store.is_complete(&s, 4));
        for index in 0..3 {
            write(&store, &s, index, b"x");
            assert!(!store.is_complete(&s, 4));
        }
        write(&store, &s, 3, b"x");
        assert!(store.is_complete(&s, 4));
    }

    #[test]
    fn missing_chunks_lists_gaps() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let s = session("img.bin");

        write(&store, &s, 0, b"x");
        write(&store, &s, 2, b"x");
        assert_eq!(store.missing_chunks(&s, 5).unwrap(), vec![1, 3, 4]);
        assert!(store.missing_chunks(&s, 1).unwrap().is_empty());
    }

    #[test]
    fn open_missing_chunk_is_typed() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let s = session("img.bin");

        write(&store, &s, 0, b"x");
        let err = store.open_chunk(&s, 1).unwrap_err();
        assert!(matches!(err, TransferError::MissingChunk { index: 1, .. }));
    }

    #[test]
    fn delete_removes_chunks_and_empty_dir() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let s = session("img.bin");

        for index in 0..3 {
            write(&store, &s, index, b"x");
        }
        std::fs::write(
            store.session_dir(&s.key).join("img.bin.part.00001.dead.tmp"),
            b"stale",
        )
        .unwrap();

        assert_eq!(store.delete_session(&s), 3);
        assert!(!store.session_dir(&s.key).exists());
    }

    #[test]
    fn delete_keeps_dir_shared_with_other_file() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let s = session("a.bin");
        let other = session("b.bin");

        write(&store, &s, 0, b"x");
        write(&store, &other, 0, b"y");

        assert_eq!(store.delete_session(&s), 1);
        assert!(store.session_dir(&s.key).is_dir());
        assert!(store.chunk_exists(&other, 0));
    }

    #[test]
    fn delete_of_clean_session_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let s = session("img.bin");

        assert_eq!(store.delete_session(&s), 0);
        write(&store, &s, 0, b"x");
        assert_eq!(store.delete_session(&s), 1);
        assert_eq!(store.delete_session(&s), 0);
    }
}
