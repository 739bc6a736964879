use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use chunkdock_protocol::MAX_CHUNK_INDEX;
use sha2::{Digest, Sha256};

use crate::types::Chunk;
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Splits a local file into indexed, checksummed chunks (client side).
pub struct ChunkReader {
    file: std::fs::File,
    chunk_size: usize,
    next_index: u32,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (4 MiB) is used. Fails
    /// with [`TransferError::ChunkIndexOutOfRange`] if the file would need
    /// more chunks than a session can hold.
    pub fn new(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        let reader = Self {
            file,
            chunk_size,
            next_index: 0,
            file_size,
        };
        let total = reader.total_chunks_u64();
        if total > u64::from(MAX_CHUNK_INDEX) + 1 {
            return Err(TransferError::ChunkIndexOutOfRange(
                u32::try_from(total - 1).unwrap_or(u32::MAX),
            ));
        }
        Ok(reader)
    }

    /// Number of chunks the file splits into (0 for an empty file).
    pub fn total_chunks(&self) -> u32 {
        // Bounded by the check in `new`.
        self.total_chunks_u64() as u32
    }

    fn total_chunks_u64(&self) -> u64 {
        self.file_size.div_ceil(self.chunk_size as u64)
    }

    /// Positions the reader at chunk `index` (for resume).
    pub fn seek_to_chunk(&mut self, index: u32) -> Result<(), TransferError> {
        let offset = u64::from(index) * self.chunk_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.next_index = index;
        Ok(())
    }

    /// Reads the next chunk. Returns `None` at EOF.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let offset = u64::from(self.next_index) * self.chunk_size as u64;
        if offset >= self.file_size {
            return Ok(None);
        }

        let read_size = std::cmp::min(self.file_size - offset, self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; read_size];
        self.file.read_exact(&mut buf)?;

        let chunk = Chunk {
            index: self.next_index,
            checksum: checksum_bytes(&buf),
            data: buf,
        };
        self.next_index += 1;
        Ok(Some(chunk))
    }

    /// Index of the chunk the next call to [`next_chunk`](Self::next_chunk) returns.
    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn checksum_bytes_deterministic() {
        let c1 = checksum_bytes(b"hello world");
        let c2 = checksum_bytes(b"hello world");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 64); // SHA-256 = 64 hex chars.
    }

    #[test]
    fn checksum_bytes_different_data() {
        assert_ne!(checksum_bytes(b"hello"), checksum_bytes(b"world"));
    }

    #[test]
    fn calculate_file_checksum_matches_bytes() {
        let dir = TempDir::new().unwrap();
        let data = b"test content for checksum";
        let path = create_test_file(dir.path(), "test.bin", data);

        assert_eq!(calculate_file_checksum(&path).unwrap(), checksum_bytes(data));
    }

    #[test]
    fn chunk_reader_reads_all() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"AABBCCDDEE");

        let mut reader = ChunkReader::new(&path, 4).unwrap();
        assert_eq!(reader.file_size(), 10);
        assert_eq!(reader.total_chunks(), 3);

        let c0 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c0.index, 0);
        assert_eq!(&c0.data, b"AABB");
        assert_eq!(c0.checksum, checksum_bytes(b"AABB"));

        let c1 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c1.index, 1);
        assert_eq!(&c1.data, b"CCDD");

        let c2 = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c2.index, 2);
        assert_eq!(&c2.data, b"EE");

        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn chunk_reader_seek_and_resume() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");

        let mut reader = ChunkReader::new(&path, 4).unwrap();
        reader.seek_to_chunk(1).unwrap();
        assert_eq!(reader.next_index(), 1);

        let c = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c.index, 1);
        assert_eq!(&c.data, b"4567");
    }

    #[test]
    fn chunk_reader_default_chunk_size() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"x");
        let reader = ChunkReader::new(&path, 0).unwrap();
        assert_eq!(reader.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(reader.total_chunks(), 1);
    }

    #[test]
    fn chunk_reader_empty_file_has_no_chunks() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "empty.bin", b"");
        let mut reader = ChunkReader::new(&path, 4).unwrap();
        assert_eq!(reader.total_chunks(), 0);
        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn chunk_reader_rejects_too_many_chunks() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "big.bin", &[0u8; 100_001]);
        assert!(matches!(
            ChunkReader::new(&path, 1),
            Err(TransferError::ChunkIndexOutOfRange(100_000))
        ));
        assert_eq!(ChunkReader::new(&path, 2).unwrap().total_chunks(), 50_001);
    }
}
