//! Ordered reassembly of a session's chunks into one output file.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{error, info};

use crate::TransferError;
use crate::store::ChunkStore;
use crate::types::{AssembledFile, UploadSession};

/// Output buffer size for the assembled file (256 KB).
const OUTPUT_BUFFER_SIZE: usize = 256 * 1024;

/// Concatenates chunks from a [`ChunkStore`] into the completed-files root.
#[derive(Debug, Clone)]
pub struct Assembler {
    store: ChunkStore,
    completed_root: PathBuf,
}

impl Assembler {
    pub fn new(store: ChunkStore, completed_root: &Path) -> Self {
        Self {
            store,
            completed_root: completed_root.to_path_buf(),
        }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn completed_root(&self) -> &Path {
        &self.completed_root
    }

    /// Assembles every chunk of `session`, in ascending index order, into a
    /// new file named `{timestamp}-{random}-{file_name}`.
    ///
    /// The output is written under a hidden temporary name, synced, and only
    /// then renamed to its final name. On any failure the temporary file is
    /// removed and the chunks are left untouched, so the client can re-upload
    /// and retry.
    ///
    /// Does not delete the chunks; call [`cleanup`](Self::cleanup) once the
    /// result has been accepted.
    pub fn assemble(&self, session: &UploadSession) -> Result<AssembledFile, TransferError> {
        let total = self.resolve_total(session)?;

        fs::create_dir_all(&self.completed_root)?;

        let file_name = unique_output_name(&session.file_name);
        let final_path = self.completed_root.join(&file_name);
        let temp_path = self.completed_root.join(format!(".{file_name}.tmp"));

        let size = match self.write_output(session, total, &temp_path) {
            Ok(size) => size,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                error!(session = %session.key, file = %session.file_name, error = %e, "assembly failed");
                return Err(e);
            }
        };

        if let Some(expected) = session.file_size
            && expected != size
        {
            let _ = fs::remove_file(&temp_path);
            error!(
                session = %session.key,
                file = %session.file_name,
                expected,
                actual = size,
                "assembled size does not match declared size"
            );
            return Err(TransferError::SizeMismatch {
                expected,
                actual: size,
            });
        }

        if let Err(e) = fs::rename(&temp_path, &final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        info!(
            session = %session.key,
            file = %session.file_name,
            output = %final_path.display(),
            chunks = total,
            bytes = size,
            "assembled upload"
        );

        Ok(AssembledFile {
            path: final_path,
            file_name,
            original_file_name: session.file_name.clone(),
            total_chunks: total,
            size,
        })
    }

    /// Deletes the session's chunks after a successful assembly.
    pub fn cleanup(&self, session: &UploadSession) -> usize {
        self.store.delete_session(session)
    }

    /// Declared total if positive, otherwise inferred from storage.
    fn resolve_total(&self, session: &UploadSession) -> Result<u32, TransferError> {
        let total = match session.total_chunks {
            Some(total) if total > 0 => total,
            _ => self.store.count_chunks(session)?,
        };
        if total == 0 {
            return Err(TransferError::SessionNotFound(format!(
                "{}/{}",
                session.key, session.file_name
            )));
        }
        Ok(total)
    }

    /// Appends chunks `0..total` to `path` and syncs it. Returns bytes written.
    fn write_output(
        &self,
        session: &UploadSession,
        total: u32,
        path: &Path,
    ) -> Result<u64, TransferError> {
        let mut writer = BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, File::create(path)?);
        let mut size = 0u64;

        for index in 0..total {
            let mut chunk = self.store.open_chunk(session, index)?;
            size += io::copy(&mut chunk, &mut writer)?;
        }

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(size)
    }
}

/// Collision-resistant output name: `{unix_millis}-{random}-{file_name}`.
pub fn unique_output_name(file_name: &str) -> String {
    let timestamp = chrono::Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    format!("{timestamp}-{suffix}-{file_name}")
}
