//! Async facade used by the request-handling layer.
//!
//! Chunk writes, completion checks and merges for one session are serialized
//! through [`SessionLocks`]; the blocking filesystem work itself runs on
//! tokio's blocking pool so request tasks never stall the runtime.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chunkdock_protocol::{
    ChunkUploadPayload, CompletedResponse, MergeRequest, UploadResponse, UploadingResponse,
};
use tracing::{debug, info};

use crate::TransferError;
use crate::assemble::Assembler;
use crate::locks::SessionLocks;
use crate::store::ChunkStore;
use crate::types::{AssembledFile, Chunk, SessionKey, UploadSession};

/// How long a completed result is remembered for duplicate completion triggers.
const COMPLETED_RETENTION: Duration = Duration::from_secs(10 * 60);

/// Result of a completion check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Some chunks are still missing (or the total is unknown).
    Uploading {
        chunk_index: u32,
        total_chunks: Option<u32>,
    },
    /// The session has been assembled and its chunks removed.
    Completed(AssembledFile),
}

impl IngestOutcome {
    /// Converts the outcome into the response relayed to the client.
    pub fn into_response(self, file_name: &str) -> UploadResponse {
        match self {
            IngestOutcome::Uploading {
                chunk_index,
                total_chunks,
            } => UploadResponse::Uploading(UploadingResponse::new(
                chunk_index,
                total_chunks.unwrap_or(0),
                file_name,
            )),
            IngestOutcome::Completed(file) => {
                let mut resp = CompletedResponse::assembled(
                    file.file_name,
                    file.original_file_name,
                    file.path.to_string_lossy(),
                );
                resp.total_chunks = Some(file.total_chunks);
                resp.size = Some(file.size);
                UploadResponse::Completed(resp)
            }
        }
    }
}

/// Present and missing chunks of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Declared total, or the count inferred from storage.
    pub total_chunks: u32,
    pub present: Vec<u32>,
    pub missing: Vec<u32>,
}

impl SessionStatus {
    pub fn is_complete(&self) -> bool {
        self.total_chunks > 0 && self.missing.is_empty()
    }
}

/// Chunk ingestion entry points (thread-safe, cheap to clone).
#[derive(Clone)]
pub struct IngestService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    assembler: Assembler,
    locks: SessionLocks,
    /// Last completed result per (session key, file name).
    completed: Mutex<HashMap<(String, String), (AssembledFile, Instant)>>,
    assemblies: AtomicU64,
}

impl IngestService {
    /// Creates a service storing chunks under `chunks_root` and assembled
    /// files under `completed_root`.
    pub fn new(chunks_root: &Path, completed_root: &Path) -> Self {
        let store = ChunkStore::new(chunks_root);
        Self {
            inner: Arc::new(ServiceInner {
                assembler: Assembler::new(store, completed_root),
                locks: SessionLocks::new(),
                completed: Mutex::new(HashMap::new()),
                assemblies: AtomicU64::new(0),
            }),
        }
    }

    /// Uses `{root}/chunks` and `{root}/completed`.
    pub fn with_uploads_root(root: &Path) -> Self {
        Self::new(&root.join("chunks"), &root.join("completed"))
    }

    pub fn store(&self) -> &ChunkStore {
        self.inner.assembler.store()
    }

    pub fn completed_root(&self) -> &Path {
        self.inner.assembler.completed_root()
    }

    /// Number of assemblies that produced an output file.
    pub fn assemblies_run(&self) -> u64 {
        self.inner.assemblies.load(Ordering::SeqCst)
    }

    /// Stores one chunk. Safe to repeat for the same index (last write wins).
    ///
    /// Once the session has been assembled, a chunk whose index belongs to
    /// the assembled file is a retry and is dropped without touching disk;
    /// the next completion check reports the same result. A chunk beyond the
    /// assembled total starts a new transfer under the same key.
    pub async fn write_chunk(
        &self,
        session: &UploadSession,
        chunk: Chunk,
    ) -> Result<(), TransferError> {
        let _guard = self.inner.locks.lock(&session.key).await;
        if let Some(done) = self.completed_result(session) {
            if chunk.index < done.total_chunks {
                debug!(
                    session = %session.key,
                    file = %session.file_name,
                    index = chunk.index,
                    "session already assembled, dropping retried chunk"
                );
                return Ok(());
            }
            self.forget_completed(session);
        }

        let store = self.store().clone();
        let session = session.clone();
        run_blocking(move || store.write_chunk(&session, &chunk)).await
    }

    /// Checks whether the session is complete and, if so, assembles it and
    /// removes its chunks.
    ///
    /// `chunk_index` is the index just received and only feeds the progress
    /// report. Without a declared total the session is never auto-completed;
    /// use [`force_assemble`](Self::force_assemble) instead.
    ///
    /// Concurrent triggers for the same session run one at a time: the first
    /// assembles, later ones observe the same completed result.
    pub async fn check_and_assemble(
        &self,
        session: &UploadSession,
        chunk_index: u32,
    ) -> Result<IngestOutcome, TransferError> {
        let _guard = self.inner.locks.lock(&session.key).await;

        if let Some(done) = self.completed_result(session) {
            debug!(session = %session.key, file = %session.file_name, "already assembled");
            return Ok(IngestOutcome::Completed(done));
        }

        let Some(total) = session.total_chunks else {
            return Ok(IngestOutcome::Uploading {
                chunk_index,
                total_chunks: None,
            });
        };

        let assembler = self.inner.assembler.clone();
        let job = session.clone();
        let assembled = run_blocking(move || {
            if !assembler.store().is_complete(&job, total) {
                return Ok(None);
            }
            info!(session = %job.key, file = %job.file_name, total, "all chunks received, assembling");
            let file = assembler.assemble(&job)?;
            assembler.cleanup(&job);
            Ok(Some(file))
        })
        .await?;

        match assembled {
            Some(file) => {
                self.remember_completed(session, &file);
                Ok(IngestOutcome::Completed(file))
            }
            None => Ok(IngestOutcome::Uploading {
                chunk_index,
                total_chunks: Some(total),
            }),
        }
    }

    /// Writes a chunk, then runs the completion check.
    pub async fn ingest(
        &self,
        session: &UploadSession,
        chunk: Chunk,
    ) -> Result<IngestOutcome, TransferError> {
        let index = chunk.index;
        self.write_chunk(session, chunk).await?;
        self.check_and_assemble(session, index).await
    }

    /// Out-of-band merge: assembles `file_name` from the session folder
    /// `folder_name`, inferring the chunk count from storage.
    ///
    /// Used for recovery when automatic completion was missed.
    pub async fn force_assemble(
        &self,
        file_name: &str,
        folder_name: &str,
    ) -> Result<AssembledFile, TransferError> {
        let session = UploadSession::new(SessionKey::from_folder(folder_name)?, file_name)?;
        let _guard = self.inner.locks.lock(&session.key).await;

        if let Some(done) = self.completed_result(&session) {
            return Ok(done);
        }

        let assembler = self.inner.assembler.clone();
        let job = session.clone();
        let file = run_blocking(move || {
            let file = assembler.assemble(&job)?;
            assembler.cleanup(&job);
            Ok(file)
        })
        .await?;

        info!(folder = folder_name, file = file_name, output = %file.file_name, "forced merge completed");
        self.remember_completed(&session, &file);
        Ok(file)
    }

    /// Reports present and missing chunks without modifying anything.
    pub async fn status(&self, session: &UploadSession) -> Result<SessionStatus, TransferError> {
        let _guard = self.inner.locks.lock(&session.key).await;

        let store = self.store().clone();
        let session = session.clone();
        run_blocking(move || {
            let present = store.present_chunks(&session)?;
            let total = session
                .total_chunks
                .unwrap_or_else(|| present.last().map_or(0, |max| max + 1));
            let missing = store.missing_chunks(&session, total)?;
            Ok(SessionStatus {
                total_chunks: total,
                present,
                missing,
            })
        })
        .await
    }

    /// Handles one chunk upload as relayed by the host.
    ///
    /// `part_name` is the name the transport attached to the uploaded part,
    /// used when the request carries no `fileName`.
    pub async fn handle_chunk(
        &self,
        payload: ChunkUploadPayload,
        part_name: &str,
    ) -> Result<UploadResponse, TransferError> {
        let meta = &payload.meta;
        let file_name = meta.file_name_or(part_name).to_string();
        let key = SessionKey::new(meta.base_name(), meta.upload_id())?;
        let session = UploadSession::new(key, &file_name)?
            .with_total_chunks(meta.total_chunks())
            .with_file_size(meta.file_size().unwrap_or(0));

        let chunk = Chunk {
            index: meta.chunk_index(),
            checksum: meta.checksum.clone(),
            data: payload.data,
        };
        debug!(session = %session.key, file = %file_name, index = chunk.index, "chunk received");

        let outcome = self.ingest(&session, chunk).await?;
        Ok(outcome.into_response(&file_name))
    }

    /// Handles an explicit merge request.
    pub async fn handle_merge(&self, req: &MergeRequest) -> Result<UploadResponse, TransferError> {
        let file = self.force_assemble(&req.file_name, &req.folder_name).await?;
        let mut resp = CompletedResponse::merged(
            file.file_name,
            file.original_file_name,
            file.path.to_string_lossy(),
        );
        resp.total_chunks = Some(file.total_chunks);
        resp.size = Some(file.size);
        Ok(UploadResponse::Completed(resp))
    }

    fn completed_key(session: &UploadSession) -> (String, String) {
        (session.key.as_str().to_string(), session.file_name.clone())
    }

    fn completed_result(&self, session: &UploadSession) -> Option<AssembledFile> {
        let map = self.inner.completed.lock().unwrap_or_else(|e| e.into_inner());
        map.get(&Self::completed_key(session))
            .filter(|(_, at)| at.elapsed() < COMPLETED_RETENTION)
            .map(|(file, _)| file.clone())
    }

    fn remember_completed(&self, session: &UploadSession, file: &AssembledFile) {
        self.inner.assemblies.fetch_add(1, Ordering::SeqCst);
        let mut map = self.inner.completed.lock().unwrap_or_else(|e| e.into_inner());
        map.retain(|_, (_, at)| at.elapsed() < COMPLETED_RETENTION);
        map.insert(Self::completed_key(session), (file.clone(), Instant::now()));
    }

    fn forget_completed(&self, session: &UploadSession) {
        let mut map = self.inner.completed.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(&Self::completed_key(session));
    }
}

/// Runs blocking filesystem work off the async runtime.
async fn run_blocking<T, F>(f: F) -> Result<T, TransferError>
where
    F: FnOnce() -> Result<T, TransferError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransferError::Io(std::io::Error::other(e)))?
}
