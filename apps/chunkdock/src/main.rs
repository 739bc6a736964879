//! chunkdock entry point.

mod app;
mod config;

use std::path::PathBuf;

use chunkdock_transfer::IngestService;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "chunkdock", version, about = "Chunked upload ingestion")]
struct Cli {
    /// Configuration file (defaults to the platform config directory).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Overrides `uploads_root` from the configuration.
    #[arg(long, global = true, value_name = "PATH")]
    uploads_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Split a local file into chunks and ingest them.
    Upload {
        /// File to upload.
        path: PathBuf,
        /// Upload base name.
        #[arg(long, default_value = chunkdock_protocol::DEFAULT_SESSION_COMPONENT)]
        name: String,
        /// Upload id (random when omitted).
        #[arg(long)]
        upload_id: Option<String>,
        /// Logical file name (defaults to the source file name).
        #[arg(long)]
        file_name: Option<String>,
        /// Chunk size in bytes (defaults to the configured size).
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Send chunks in random order.
        #[arg(long)]
        shuffle: bool,
        /// Number of chunks in flight at once.
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
    /// Assemble a session whose completion was missed.
    Merge {
        #[arg(long)]
        file_name: String,
        /// Session folder, `{name}-{uploadId}`.
        #[arg(long)]
        folder_name: String,
    },
    /// Show present and missing chunks of a session.
    Status {
        #[arg(long, default_value = chunkdock_protocol::DEFAULT_SESSION_COMPONENT)]
        name: String,
        #[arg(long, default_value = chunkdock_protocol::DEFAULT_SESSION_COMPONENT)]
        upload_id: String,
        #[arg(long)]
        file_name: String,
        /// Declared chunk count (inferred from storage when omitted).
        #[arg(long)]
        total_chunks: Option<u32>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration.
    let config = config::Config::load(cli.config.as_deref())?;

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let uploads_root = cli
        .uploads_root
        .clone()
        .unwrap_or_else(|| config.uploads_root());
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        uploads_root = %uploads_root.display(),
        "configuration loaded"
    );

    let service = IngestService::with_uploads_root(&uploads_root);

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match cli.command {
            Command::Upload {
                path,
                name,
                upload_id,
                file_name,
                chunk_size,
                shuffle,
                concurrency,
            } => {
                let opts = app::UploadOptions {
                    path,
                    name,
                    upload_id,
                    file_name,
                    chunk_size: chunk_size.unwrap_or(config.chunk_size),
                    shuffle,
                    concurrency,
                };
                app::upload(&service, opts).await
            }
            Command::Merge {
                file_name,
                folder_name,
            } => app::merge(&service, &file_name, &folder_name).await,
            Command::Status {
                name,
                upload_id,
                file_name,
                total_chunks,
            } => app::status(&service, &name, &upload_id, &file_name, total_chunks).await,
        }
    })
}
