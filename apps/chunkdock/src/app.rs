//! Command implementations. Each command drives the ingestion service the
//! way a request handler would and prints the relayed JSON response.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chunkdock_protocol::{MergeRequest, UploadResponse};
use chunkdock_transfer::{
    ChunkReader, IngestOutcome, IngestService, SessionKey, TransferError, UploadSession,
    calculate_file_checksum,
};
use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::task::JoinSet;

/// Options of the `upload` command.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub path: PathBuf,
    pub name: String,
    pub upload_id: Option<String>,
    pub file_name: Option<String>,
    pub chunk_size: usize,
    pub shuffle: bool,
    pub concurrency: usize,
}

/// Splits a local file into chunks and ingests them, possibly out of order
/// and in parallel, until the session completes.
pub async fn upload(service: &IngestService, opts: UploadOptions) -> anyhow::Result<()> {
    let file_name = match &opts.file_name {
        Some(name) => name.clone(),
        None => opts
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .context("source path has no usable file name")?,
    };
    let upload_id = opts
        .upload_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

    let mut reader = ChunkReader::new(&opts.path, opts.chunk_size).map_err(report)?;
    let total = reader.total_chunks();
    if total == 0 {
        anyhow::bail!("cannot upload an empty file: {}", opts.path.display());
    }

    let key = SessionKey::new(&opts.name, &upload_id).map_err(report)?;
    let session = UploadSession::new(key, &file_name)
        .map_err(report)?
        .with_total_chunks(total)
        .with_file_size(reader.file_size());

    let mut order: Vec<u32> = (0..total).collect();
    if opts.shuffle {
        order.shuffle(&mut rand::thread_rng());
    }

    tracing::info!(
        session = %session.key,
        file = %file_name,
        chunks = total,
        bytes = reader.file_size(),
        "starting upload"
    );

    let concurrency = opts.concurrency.max(1);
    let mut tasks: JoinSet<Result<IngestOutcome, TransferError>> = JoinSet::new();
    let mut completed: Option<UploadResponse> = None;

    for index in order {
        reader.seek_to_chunk(index).map_err(report)?;
        let Some(chunk) = reader.next_chunk().map_err(report)? else {
            anyhow::bail!("source file shrank while reading chunk {index}");
        };

        if tasks.len() >= concurrency
            && let Some(joined) = tasks.join_next().await
        {
            record(joined?.map_err(report)?, &file_name, &mut completed);
        }

        let service = service.clone();
        let session = session.clone();
        tasks.spawn(async move { service.ingest(&session, chunk).await });
    }

    while let Some(joined) = tasks.join_next().await {
        record(joined?.map_err(report)?, &file_name, &mut completed);
    }

    let Some(resp) = completed else {
        anyhow::bail!("all chunks sent but the session did not complete");
    };
    print_json(&resp)?;

    if let UploadResponse::Completed(done) = &resp {
        let source = calculate_file_checksum(&opts.path).map_err(report)?;
        let output = calculate_file_checksum(Path::new(&done.path)).map_err(report)?;
        if source != output {
            anyhow::bail!("assembled file checksum {output} differs from source {source}");
        }
        tracing::info!(sha256 = %output, "assembled file verified");
    }
    Ok(())
}

fn record(outcome: IngestOutcome, file_name: &str, completed: &mut Option<UploadResponse>) {
    let resp = outcome.into_response(file_name);
    match &resp {
        UploadResponse::Uploading(u) => {
            tracing::info!(chunk = u.chunk_index, progress = u.progress, "{}", u.message);
        }
        UploadResponse::Completed(_) => *completed = Some(resp),
    }
}

/// Forces assembly of a session whose completion was missed.
pub async fn merge(
    service: &IngestService,
    file_name: &str,
    folder_name: &str,
) -> anyhow::Result<()> {
    let req = MergeRequest {
        file_name: file_name.to_string(),
        folder_name: folder_name.to_string(),
    };
    let resp = service.handle_merge(&req).await.map_err(report)?;
    print_json(&resp)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport<'a> {
    folder_name: &'a str,
    file_name: &'a str,
    total_chunks: u32,
    present: Vec<u32>,
    missing: Vec<u32>,
    complete: bool,
}

/// Prints present and missing chunks of a session.
pub async fn status(
    service: &IngestService,
    name: &str,
    upload_id: &str,
    file_name: &str,
    total_chunks: Option<u32>,
) -> anyhow::Result<()> {
    let key = SessionKey::new(name, upload_id).map_err(report)?;
    let session = UploadSession::new(key, file_name)
        .map_err(report)?
        .with_total_chunks(total_chunks.unwrap_or(0));

    let status = service.status(&session).await.map_err(report)?;
    let complete = status.is_complete();
    print_json(&StatusReport {
        folder_name: session.key.as_str(),
        file_name,
        total_chunks: status.total_chunks,
        present: status.present,
        missing: status.missing,
        complete,
    })
}

/// Prints the error body a host would relay, then hands the error on.
fn report(err: TransferError) -> anyhow::Error {
    if let Ok(json) = serde_json::to_string_pretty(&err.to_response()) {
        println!("{json}");
    }
    anyhow::Error::new(err)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
