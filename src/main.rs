//! Multipart Uploadr - adaptive chunked uploader
//!
//! Command line front end for the upload engine, backed by the local
//! filesystem provider.

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use multipart_uploadr::{
    config::{Config, ProviderConfig},
    metrics, telemetry, Checkpoint, CheckpointStore, JsonFileStore, LocalFsProvider, ObjectKey,
    UploadOptions, UploadRequest, UploadResult, Uploader, Visibility,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Multipart Uploadr - single-shot, concurrent multipart and resumable uploads
#[derive(Parser, Debug)]
#[command(name = "multipart-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print Prometheus metrics to stdout before exiting
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file, choosing single-shot or multipart by size
    Upload(TransferArgs),
    /// Start or continue a checkpointed upload
    Resume(TransferArgs),
    /// Abandon a checkpointed upload
    Abort(TargetArgs),
    /// Print a time-limited download URL
    Presign {
        /// Object key
        key: String,

        /// Lifetime of the URL in seconds
        #[arg(long, default_value_t = 3600)]
        expires_in: u64,
    },
}

#[derive(ClapArgs, Debug)]
struct TargetArgs {
    /// Source file
    file: PathBuf,

    /// Destination prefix
    #[arg(short, long, default_value = "")]
    destination: String,

    /// Object name (defaults to the file name)
    #[arg(long)]
    name: Option<String>,
}

#[derive(ClapArgs, Debug)]
struct TransferArgs {
    #[command(flatten)]
    target: TargetArgs,

    #[arg(long)]
    content_type: Option<String>,

    /// Store the object as publicly readable
    #[arg(long)]
    public: bool,

    /// Extra metadata as key=value (repeatable)
    #[arg(long = "meta", value_parser = parse_key_val)]
    metadata: Vec<(String, String)>,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

impl TargetArgs {
    fn request(&self, file: PathBuf) -> UploadRequest {
        let mut request = UploadRequest::from_file(file).with_destination(&self.destination);
        if let Some(name) = &self.name {
            request = request.with_file_name(name);
        }
        request
    }
}

impl TransferArgs {
    fn request(&self, file: PathBuf) -> UploadRequest {
        let mut request = self.target.request(file);
        if let Some(content_type) = &self.content_type {
            request = request.with_content_type(content_type);
        }
        if self.public {
            request = request.with_visibility(Visibility::Public);
        }
        for (key, value) in &self.metadata {
            request = request.with_metadata(key, value);
        }
        request
    }
}

fn report(result: &UploadResult) -> anyhow::Result<()> {
    let summary = serde_json::json!({
        "success": result.success,
        "object_key": result.object_key.as_str(),
        "upload_id": result.upload_id,
        "etag": result.etag,
        "file_size": result.file_size,
        "download_url": result.download_url,
        "completed_at": result.completed_at.to_rfc3339(),
        "message": result.message,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if result.success {
        Ok(())
    } else {
        anyhow::bail!("upload of {} failed: {}", result.object_key, result.message)
    }
}

async fn run(args: Args, config: Config) -> anyhow::Result<()> {
    let ProviderConfig::Local(local) = &config.provider;
    let provider = Arc::new(LocalFsProvider::from_config(local));
    let store = Arc::new(JsonFileStore::new(&config.checkpoint_dir));
    let uploader = Uploader::new(provider)
        .with_options(UploadOptions::from(&config.upload))
        .with_checkpoint_store(store.clone());

    match args.command {
        Command::Upload(transfer) => {
            let request = transfer.request(transfer.target.file.clone());
            let result = uploader.smart_upload(request).await?;
            report(&result)
        }
        Command::Resume(transfer) => {
            let file = tokio::fs::canonicalize(&transfer.target.file)
                .await
                .with_context(|| format!("cannot open {}", transfer.target.file.display()))?;
            let request = transfer.request(file.clone());
            let id = Checkpoint::id_for(&file, &request.object_key()?);

            let mut checkpoint = store.load(&id).await?;
            if let Some(existing) = &checkpoint {
                info!(
                    checkpoint = %id,
                    completed = existing.completed_parts.len(),
                    remaining = existing.remaining_parts.len(),
                    "Resuming from checkpoint"
                );
            }

            let result = uploader.resume_upload(&request, &mut checkpoint).await?;
            if !result.success && checkpoint.is_some() {
                eprintln!(
                    "progress saved to {}; run resume again to continue",
                    store.dir().join(format!("{}.json", id)).display()
                );
            }
            report(&result)
        }
        Command::Abort(target) => {
            let file = tokio::fs::canonicalize(&target.file)
                .await
                .with_context(|| format!("cannot open {}", target.file.display()))?;
            let key = target.request(file.clone()).object_key()?;
            let id = Checkpoint::id_for(&file, &key);

            let checkpoint = store
                .load(&id)
                .await?
                .with_context(|| format!("no checkpoint for {} -> {}", file.display(), key))?;
            uploader.abort_upload(&checkpoint).await?;
            println!("aborted upload {}", checkpoint.upload_id.unwrap_or_default());
            Ok(())
        }
        Command::Presign { key, expires_in } => {
            let key = ObjectKey::resolve("", &key)?;
            let url = uploader
                .presigned_url(&key, Duration::from_secs(expires_in))
                .await?;
            println!("{}", url);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    // Initialize logging
    telemetry::init_subscriber(&config.logging)?;
    info!("Starting Multipart Uploadr v{}", multipart_uploadr::VERSION);
    info!("Loaded configuration from {:?}", args.config);

    let print_metrics = args.print_metrics;
    let outcome = run(args, config).await;

    if print_metrics {
        print!("{}", metrics::gather_text());
    }
    outcome
}
