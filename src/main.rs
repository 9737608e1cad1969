use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use file_uploader::uploader::{instructions, validate_drop};
use file_uploader::{
    Config, FileDescriptor, HttpUploadClient, ManagerOptions, SessionStatus, UploadManager,
    WidgetId,
};

/// Upload files through one upload session and print the final state as JSON.
#[derive(Parser, Debug)]
#[command(name = "file-uploader", version)]
struct Args {
    /// Path to the TOML config
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Allow more than one file regardless of the config
    #[arg(long)]
    multiple: bool,

    /// Widget id used in the upload URLs (random when omitted)
    #[arg(long)]
    widget_id: Option<String>,

    /// Files to drop into the session
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn guess_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("csv") => "text/csv",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

async fn read_file(path: &Path) -> Result<FileDescriptor> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Invalid file name: {}", path.display()))?;

    Ok(FileDescriptor::new(name, guess_mime_type(path), data))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = Config::load(&args.config)
        .await
        .with_context(|| format!("Failed to load config: {}", args.config.display()))?;
    if args.multiple {
        config.session.multiple_files = true;
    }

    let widget_id = args.widget_id.map(WidgetId::new).unwrap_or_else(WidgetId::random);
    let client = Arc::new(HttpUploadClient::new(&config.client)?);
    let handle = UploadManager::new(client, ManagerOptions::from_config(widget_id, &config));
    let manager = handle.manager.clone();

    let (title, limit) = instructions(&config.session);
    tracing::info!("{} ({})", title, limit);

    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        files.push(read_file(path).await?);
    }

    let (accepted, rejected) = validate_drop(&config.session, files);
    let file_ids = manager.drop_files(accepted, rejected).await?;
    tracing::info!("Dropped {} file(s)", file_ids.len());

    let mut snapshots = manager.subscribe_snapshots();
    let logger = tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            for file in &snapshot.files {
                tracing::debug!("{} [{:?}] {}", file.name, file.status, file.status_line());
            }
        }
    });

    let snapshot = manager
        .wait_for(|snapshot| snapshot.is_settled() || snapshot.status == SessionStatus::Error)
        .await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    drop(manager);
    handle.shutdown().await?;
    logger.abort();

    if snapshot.status == SessionStatus::Error {
        anyhow::bail!(snapshot.error_message.unwrap_or_else(|| "Upload failed".to_string()));
    }

    Ok(())
}
