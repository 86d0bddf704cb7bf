//! Upload orchestrator
//!
//! [`Uploader`] decides between a single-shot and a multipart upload and
//! drives the multipart state machine:
//!
//! ```text
//! smart_upload:  size < threshold ──► standard_upload
//!                size >= threshold ─► initiate ─► N x upload_part (worker pool)
//!                                                   ├─ all ok ──► complete
//!                                                   └─ failure ─► abort
//!
//! resume_upload: [initiate] ─► remaining parts one by one ─► complete
//!                (failures leave the checkpoint resumable, no abort)
//! ```
//!
//! Validation and sizing problems are returned as `Err`; backend failures
//! during an upload produce an `Ok(UploadResult)` with `success == false`
//! carrying the original error.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

use super::partition::{PartitionLimits, PartRange, PartitionPlan};
use super::range_reader::RangeReader;
use super::spool::SpooledFile;
use super::worker_pool::{TaskFailure, WorkerPool, DEFAULT_CONCURRENCY};
use super::{probe_file, ObjectKey, UploadError, UploadRequest, UploadResult, UploadSource};
use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use crate::config::UploadConfig;
use crate::metrics::{self, METHOD_MULTIPART, METHOD_RESUMABLE, METHOD_STANDARD};
use crate::provider::{
    ObjectAttributes, ObjectBody, ObjectMetadata, ProviderError, StorageProvider, UploadSession,
    UploadedPart,
};

/// Tuning knobs for an [`Uploader`]; unset values fall back to the
/// provider's limits
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub multipart_threshold: Option<u64>,
    /// Preferred part size
    pub part_size: Option<u64>,
    /// Raises the provider's minimum part size, never lowers it
    pub min_part_size: Option<u64>,
    /// Lowers the provider's part count limit, never raises it
    pub part_count_limit: Option<u32>,
    pub concurrency: usize,
    /// Where stream sources are spooled; system temp dir when unset
    pub spool_dir: Option<PathBuf>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            multipart_threshold: None,
            part_size: None,
            min_part_size: None,
            part_count_limit: None,
            concurrency: DEFAULT_CONCURRENCY,
            spool_dir: None,
        }
    }
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_multipart_threshold(mut self, threshold: u64) -> Self {
        self.multipart_threshold = Some(threshold);
        self
    }

    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = Some(part_size);
        self
    }

    pub fn with_min_part_size(mut self, min_part_size: u64) -> Self {
        self.min_part_size = Some(min_part_size);
        self
    }

    pub fn with_part_count_limit(mut self, limit: u32) -> Self {
        self.part_count_limit = Some(limit);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = Some(dir.into());
        self
    }
}

impl From<&UploadConfig> for UploadOptions {
    fn from(config: &UploadConfig) -> Self {
        Self {
            multipart_threshold: Some(config.multipart_threshold),
            part_size: Some(config.part_size),
            min_part_size: Some(config.min_part_size),
            part_count_limit: config.part_count_limit,
            concurrency: config.concurrency,
            spool_dir: config.spool_dir.clone(),
        }
    }
}

/// Upload engine, generic over the storage backend
pub struct Uploader<P: StorageProvider> {
    provider: Arc<P>,
    options: UploadOptions,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
}

impl<P: StorageProvider> Uploader<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            options: UploadOptions::default(),
            checkpoint_store: None,
        }
    }

    pub fn with_options(mut self, options: UploadOptions) -> Self {
        self.options = options;
        self
    }

    /// Persist checkpoints through `store` during resumable uploads
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Size at which uploads switch to multipart
    pub fn multipart_threshold(&self) -> u64 {
        self.options
            .multipart_threshold
            .unwrap_or_else(|| self.provider.limits().multipart_threshold)
    }

    /// Effective sizing limits: provider limits tightened by the options
    pub fn partition_limits(&self) -> PartitionLimits {
        let limits = self.provider.limits();
        PartitionLimits {
            min_part_size: self
                .options
                .min_part_size
                .map_or(limits.min_part_size, |min| min.max(limits.min_part_size)),
            max_part_size: limits.max_part_size,
            part_count_limit: self
                .options
                .part_count_limit
                .map_or(limits.part_count_limit, |limit| {
                    limit.min(limits.part_count_limit)
                }),
        }
    }

    /// Partition plan for a file of `file_size` bytes
    pub fn plan(&self, file_size: u64) -> Result<PartitionPlan, UploadError> {
        Ok(PartitionPlan::compute(
            file_size,
            self.options.part_size,
            self.partition_limits(),
        )?)
    }

    /// Upload a file or stream, choosing single-shot or multipart by size
    #[tracing::instrument(
        name = "upload.smart",
        skip(self, request),
        fields(
            upload.provider = self.provider.name(),
            upload.key = tracing::field::Empty,
            upload.bytes = tracing::field::Empty,
            upload.method = tracing::field::Empty
        ),
        err
    )]
    pub async fn smart_upload(&self, request: UploadRequest) -> Result<UploadResult, UploadError> {
        let key = request.object_key()?;
        let attributes = request.attributes();
        tracing::Span::current().record("upload.key", key.as_str());

        match request.source {
            UploadSource::File(path) => {
                let file_size = resolve_file_size(&path, request.size).await?;
                self.upload_file(&path, file_size, key, &attributes).await
            }
            UploadSource::Stream(mut reader) => match request.size {
                Some(size) if size < self.multipart_threshold() => {
                    let span = tracing::Span::current();
                    span.record("upload.bytes", size);
                    span.record("upload.method", METHOD_STANDARD);
                    let body = ObjectBody::new(reader, size);
                    Ok(self.standard_upload(key, body, &attributes).await)
                }
                declared => {
                    let spooled =
                        SpooledFile::from_reader(&mut reader, self.options.spool_dir.as_deref())
                            .await?;
                    if let Some(declared) = declared {
                        if declared != spooled.size() {
                            return Err(UploadError::Validation(format!(
                                "stream declared {} bytes but produced {}",
                                declared,
                                spooled.size()
                            )));
                        }
                    }
                    self.upload_file(spooled.path(), spooled.size(), key, &attributes)
                        .await
                }
            },
        }
    }

    async fn upload_file(
        &self,
        path: &Path,
        file_size: u64,
        key: ObjectKey,
        attributes: &ObjectAttributes,
    ) -> Result<UploadResult, UploadError> {
        let span = tracing::Span::current();
        span.record("upload.bytes", file_size);

        if file_size < self.multipart_threshold() {
            span.record("upload.method", METHOD_STANDARD);
            let reader = RangeReader::open(path, 0, file_size).await?;
            return Ok(self
                .standard_upload(key, ObjectBody::from_range(reader), attributes)
                .await);
        }

        span.record("upload.method", METHOD_MULTIPART);
        self.multipart_upload(path, file_size, key, attributes).await
    }

    async fn standard_upload(
        &self,
        key: ObjectKey,
        body: ObjectBody,
        attributes: &ObjectAttributes,
    ) -> UploadResult {
        let provider = self.provider.name();
        let file_size = body.length();
        let start = Instant::now();

        let result = match self.provider.standard_upload(&key, body, attributes).await {
            Ok(result) => result,
            Err(e) => {
                metrics::record_error("standard_upload");
                UploadResult::failed(key, file_size, UploadError::provider("standard_upload", e))
            }
        };

        let duration = start.elapsed();
        metrics::record_upload_duration(provider, METHOD_STANDARD, duration.as_secs_f64());
        if result.success {
            metrics::record_upload_success(provider, METHOD_STANDARD, file_size);
            tracing::info!(
                etag = ?result.etag,
                bytes = file_size,
                duration_ms = duration.as_millis() as u64,
                "Single-shot upload completed"
            );
        } else {
            metrics::record_upload_failure(provider, METHOD_STANDARD);
            tracing::error!(
                error = %result.message,
                duration_ms = duration.as_millis() as u64,
                "Single-shot upload failed"
            );
        }
        result
    }

    async fn multipart_upload(
        &self,
        path: &Path,
        file_size: u64,
        key: ObjectKey,
        attributes: &ObjectAttributes,
    ) -> Result<UploadResult, UploadError> {
        let provider = self.provider.name();
        let plan = self.plan(file_size)?;
        let start = Instant::now();

        let session = match self
            .provider
            .initiate_multipart_upload(&key, attributes)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                metrics::record_upload_failure(provider, METHOD_MULTIPART);
                metrics::record_error("initiate_multipart_upload");
                tracing::error!(error = %e, "Failed to initiate multipart upload");
                return Ok(UploadResult::failed(
                    key,
                    file_size,
                    UploadError::provider("initiate_multipart_upload", e),
                ));
            }
        };

        tracing::info!(
            upload_id = %session.upload_id,
            parts = plan.part_count,
            part_size = plan.part_size,
            concurrency = self.options.concurrency,
            "Initiated multipart upload"
        );

        let etags: Arc<DashMap<u32, String>> =
            Arc::new(DashMap::with_capacity(plan.part_count as usize));
        let shared_session = Arc::new(session.clone());
        let source: Arc<Path> = Arc::from(path);

        let tasks = plan.parts().map(|range| {
            let provider = Arc::clone(&self.provider);
            let session = Arc::clone(&shared_session);
            let source = Arc::clone(&source);
            let etags = Arc::clone(&etags);
            async move {
                let part = upload_part_range(provider.as_ref(), &session, &source, range).await?;
                etags.insert(part.part_number, part.etag.clone());
                Ok::<UploadedPart, UploadError>(part)
            }
            .in_current_span()
        });

        let outcome = WorkerPool::new(self.options.concurrency).run(tasks).await;

        let result = match outcome {
            Ok(_) => {
                let parts: BTreeMap<u32, String> = etags
                    .iter()
                    .map(|entry| (*entry.key(), entry.value().clone()))
                    .collect();
                self.finish_multipart(&session, &plan, &parts, key).await
            }
            Err(failure) => {
                let cause = match failure.cause {
                    TaskFailure::Failed(e) => e,
                    TaskFailure::Panicked(e) => UploadError::TaskPanicked(e.to_string()),
                };
                tracing::error!(
                    upload_id = %session.upload_id,
                    error = %cause,
                    started = failure.started,
                    skipped = failure.skipped,
                    "Part upload failed, aborting multipart upload"
                );
                self.abort_after_failure(&session).await;
                UploadResult::failed(key, file_size, cause)
                    .with_upload_id(session.upload_id.clone())
            }
        };

        let duration = start.elapsed();
        metrics::record_upload_duration(provider, METHOD_MULTIPART, duration.as_secs_f64());
        if result.success {
            metrics::record_upload_success(provider, METHOD_MULTIPART, file_size);
            metrics::record_multipart_parts(plan.part_count);
            tracing::info!(
                upload_id = %session.upload_id,
                etag = ?result.etag,
                parts = plan.part_count,
                duration_ms = duration.as_millis() as u64,
                "Multipart upload completed"
            );
        } else {
            metrics::record_upload_failure(provider, METHOD_MULTIPART);
        }

        Ok(result)
    }

    /// Complete a session once every part has an etag; aborts when parts
    /// are missing
    async fn finish_multipart(
        &self,
        session: &UploadSession,
        plan: &PartitionPlan,
        parts: &BTreeMap<u32, String>,
        key: ObjectKey,
    ) -> UploadResult {
        if let Err(e) = ensure_all_parts(parts, plan.part_count) {
            tracing::error!(upload_id = %session.upload_id, error = %e, "Refusing to complete");
            self.abort_after_failure(session).await;
            return UploadResult::failed(key, plan.file_size, e)
                .with_upload_id(session.upload_id.clone());
        }

        match self
            .provider
            .complete_multipart_upload(session, parts)
            .await
        {
            Ok(done) => UploadResult::succeeded(key, plan.file_size, done.etag, done.download_url)
                .with_upload_id(session.upload_id.clone()),
            Err(e) => {
                metrics::record_error("complete_multipart_upload");
                tracing::error!(
                    upload_id = %session.upload_id,
                    error = %e,
                    "Failed to complete multipart upload"
                );
                UploadResult::failed(
                    key,
                    plan.file_size,
                    UploadError::provider("complete_multipart_upload", e),
                )
                .with_upload_id(session.upload_id.clone())
            }
        }
    }

    /// Best-effort abort; a failure here is logged and never replaces the
    /// error that caused the abort
    async fn abort_after_failure(&self, session: &UploadSession) {
        let provider = self.provider.name();
        match self.provider.abort_multipart_upload(session).await {
            Ok(()) => {
                metrics::record_abort(provider, true);
                tracing::info!(upload_id = %session.upload_id, "Aborted multipart upload");
            }
            Err(e) => {
                metrics::record_abort(provider, false);
                metrics::record_error("abort_multipart_upload");
                tracing::warn!(
                    upload_id = %session.upload_id,
                    error = %e,
                    "Failed to abort multipart upload"
                );
            }
        }
    }

    /// Upload the unfinished parts recorded in `checkpoint`.
    ///
    /// With no checkpoint (or one without a session) a new session is opened
    /// and a fresh checkpoint is stored in `checkpoint`. Parts are uploaded
    /// one at a time and moved to `completed_parts` as they succeed. On
    /// failure the checkpoint keeps every completed part and the session is
    /// left open so a later call can continue.
    #[tracing::instrument(
        name = "upload.resume",
        skip(self, request, checkpoint),
        fields(
            upload.provider = self.provider.name(),
            upload.key = tracing::field::Empty,
            upload.id = tracing::field::Empty,
            upload.bytes = tracing::field::Empty
        ),
        err
    )]
    pub async fn resume_upload(
        &self,
        request: &UploadRequest,
        checkpoint: &mut Option<Checkpoint>,
    ) -> Result<UploadResult, UploadError> {
        let provider = self.provider.name();
        if !self.provider.supports_resumable_upload() {
            return Err(UploadError::Unsupported(format!(
                "provider '{}' does not support resumable uploads",
                provider
            )));
        }

        let path = request
            .source_path()
            .ok_or_else(|| {
                UploadError::Validation("resumable uploads require a file source".into())
            })?
            .to_path_buf();
        let key = request.object_key()?;
        let file_size = resolve_file_size(&path, request.size).await?;

        let span = tracing::Span::current();
        span.record("upload.key", key.as_str());
        span.record("upload.bytes", file_size);

        let start = Instant::now();
        let has_session = checkpoint
            .as_ref()
            .is_some_and(|cp| cp.upload_id.is_some());

        if has_session {
            if let Some(cp) = checkpoint.as_mut() {
                self.check_checkpoint(cp, &path, &key, file_size)?;
                self.reconcile(cp).await;
            }
        } else {
            let plan = self.plan(file_size)?;
            let session = match self
                .provider
                .initiate_multipart_upload(&key, &request.attributes())
                .await
            {
                Ok(session) => session,
                Err(e) => {
                    metrics::record_upload_failure(provider, METHOD_RESUMABLE);
                    metrics::record_error("initiate_multipart_upload");
                    return Ok(UploadResult::failed(
                        key,
                        file_size,
                        UploadError::provider("initiate_multipart_upload", e),
                    ));
                }
            };
            tracing::info!(
                upload_id = %session.upload_id,
                parts = plan.part_count,
                part_size = plan.part_size,
                "Initiated resumable upload"
            );
            *checkpoint = Some(Checkpoint::new(&session, &path, &plan, provider));
        }

        let Some(cp) = checkpoint.as_mut() else {
            return Err(CheckpointError::MissingSession.into());
        };
        self.persist(cp).await;

        let session = cp.session()?;
        span.record("upload.id", session.upload_id.as_str());

        let pending: Vec<u32> = cp.remaining_parts.iter().copied().collect();
        tracing::debug!(
            remaining = pending.len(),
            completed = cp.completed_parts.len(),
            "Resuming part uploads"
        );

        for part_number in pending {
            let range = cp.part_range(part_number)?;
            match upload_part_range(self.provider.as_ref(), &session, &path, range).await {
                Ok(part) => {
                    cp.mark_completed(part_number, part.etag)?;
                    self.persist(cp).await;
                }
                Err(e) => {
                    metrics::record_upload_failure(provider, METHOD_RESUMABLE);
                    let message = format!(
                        "part {} failed: {}; {} of {} parts uploaded",
                        part_number,
                        e,
                        cp.completed_parts.len(),
                        cp.part_count()
                    );
                    tracing::warn!(
                        upload_id = %session.upload_id,
                        part_number,
                        error = %e,
                        "Resumable upload interrupted"
                    );
                    return Ok(UploadResult::failed(key, file_size, e)
                        .with_upload_id(session.upload_id)
                        .with_message(message));
                }
            }
        }

        ensure_all_parts(&cp.completed_parts, cp.part_count())?;

        let result = match self
            .provider
            .complete_multipart_upload(&session, &cp.completed_parts)
            .await
        {
            Ok(done) => {
                self.forget(cp).await;
                UploadResult::succeeded(key, file_size, done.etag, done.download_url)
                    .with_upload_id(session.upload_id.clone())
            }
            Err(e) => {
                metrics::record_error("complete_multipart_upload");
                UploadResult::failed(
                    key,
                    file_size,
                    UploadError::provider("complete_multipart_upload", e),
                )
                .with_upload_id(session.upload_id.clone())
            }
        };

        let duration = start.elapsed();
        metrics::record_upload_duration(provider, METHOD_RESUMABLE, duration.as_secs_f64());
        if result.success {
            metrics::record_upload_success(provider, METHOD_RESUMABLE, file_size);
            metrics::record_multipart_parts(cp.part_count());
            tracing::info!(
                upload_id = %session.upload_id,
                parts = cp.part_count(),
                duration_ms = duration.as_millis() as u64,
                "Resumable upload completed"
            );
        } else {
            metrics::record_upload_failure(provider, METHOD_RESUMABLE);
        }

        Ok(result)
    }

    /// Abandon the session behind a checkpoint
    #[tracing::instrument(
        name = "upload.abort",
        skip(self, checkpoint),
        fields(upload.id = ?checkpoint.upload_id),
        err
    )]
    pub async fn abort_upload(&self, checkpoint: &Checkpoint) -> Result<(), UploadError> {
        let session = checkpoint.session()?;
        let result = self.provider.abort_multipart_upload(&session).await;
        metrics::record_abort(self.provider.name(), result.is_ok());
        result.map_err(|e| UploadError::provider("abort_multipart_upload", e))?;
        self.forget(checkpoint).await;
        tracing::info!(upload_id = %session.upload_id, "Abandoned resumable upload");
        Ok(())
    }

    /// A reloaded checkpoint must describe the same source and destination
    fn check_checkpoint(
        &self,
        checkpoint: &Checkpoint,
        path: &Path,
        key: &ObjectKey,
        file_size: u64,
    ) -> Result<(), UploadError> {
        checkpoint.validate()?;

        let mismatch = if checkpoint.source_path != path {
            Some(format!(
                "checkpoint is for {}, not {}",
                checkpoint.source_path.display(),
                path.display()
            ))
        } else if &checkpoint.object_key != key {
            Some(format!(
                "checkpoint targets {}, not {}",
                checkpoint.object_key, key
            ))
        } else if checkpoint.file_size != file_size {
            Some(format!(
                "source changed size since the checkpoint ({} -> {} bytes)",
                checkpoint.file_size, file_size
            ))
        } else if checkpoint.provider != self.provider.name() {
            Some(format!(
                "checkpoint belongs to provider '{}', not '{}'",
                checkpoint.provider,
                self.provider.name()
            ))
        } else {
            None
        };

        match mismatch {
            Some(reason) => Err(UploadError::Validation(reason)),
            None => Ok(()),
        }
    }

    /// Adopt parts the backend already holds but the checkpoint still lists
    /// as remaining
    async fn reconcile(&self, checkpoint: &mut Checkpoint) {
        let Ok(session) = checkpoint.session() else {
            return;
        };

        let listed = match self.provider.list_uploaded_parts(&session).await {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!(
                    upload_id = %session.upload_id,
                    error = %e,
                    "Could not list uploaded parts, trusting checkpoint"
                );
                return;
            }
        };

        let mut adopted = 0usize;
        for part in listed {
            if !checkpoint.remaining_parts.contains(&part.part_number) {
                continue;
            }
            let expected = checkpoint.part_range(part.part_number).map(|r| r.length);
            if matches!(expected, Ok(length) if length == part.size)
                && checkpoint
                    .mark_completed(part.part_number, part.etag)
                    .is_ok()
            {
                adopted += 1;
            }
        }

        if adopted > 0 {
            tracing::info!(
                upload_id = %session.upload_id,
                adopted,
                "Adopted parts already stored by the provider"
            );
        }
    }

    async fn persist(&self, checkpoint: &Checkpoint) {
        if let Some(store) = &self.checkpoint_store {
            if let Err(e) = store.save(checkpoint).await {
                metrics::record_error("checkpoint_save");
                tracing::warn!(checkpoint = %checkpoint.id, error = %e, "Failed to save checkpoint");
            }
        }
    }

    async fn forget(&self, checkpoint: &Checkpoint) {
        if let Some(store) = &self.checkpoint_store {
            if let Err(e) = store.remove(&checkpoint.id).await {
                tracing::warn!(checkpoint = %checkpoint.id, error = %e, "Failed to remove checkpoint");
            }
        }
    }

    /// Download an object
    pub async fn download(&self, key: &ObjectKey) -> Result<Bytes, UploadError> {
        self.provider
            .download(key)
            .await
            .map_err(|e| UploadError::provider("download", e))
    }

    /// Delete an object
    pub async fn delete(&self, key: &ObjectKey) -> Result<(), UploadError> {
        self.provider
            .delete(key)
            .await
            .map_err(|e| UploadError::provider("delete", e))
    }

    /// Fetch an object's metadata
    pub async fn get_metadata(&self, key: &ObjectKey) -> Result<ObjectMetadata, UploadError> {
        self.provider
            .get_metadata(key)
            .await
            .map_err(|e| UploadError::provider("get_metadata", e))
    }

    /// Time-limited download URL
    pub async fn presigned_url(
        &self,
        key: &ObjectKey,
        expires_in: Duration,
    ) -> Result<String, UploadError> {
        self.provider
            .generate_presigned_url(key, expires_in)
            .await
            .map_err(|e| UploadError::provider("generate_presigned_url", e))
    }
}

/// Size of a file source, checked against the size the caller declared
async fn resolve_file_size(path: &Path, declared: Option<u64>) -> Result<u64, UploadError> {
    let actual = probe_file(path).await?;
    match declared {
        Some(declared) if declared != actual => Err(UploadError::Validation(format!(
            "declared size {} does not match {} ({} bytes)",
            declared,
            path.display(),
            actual
        ))),
        _ => Ok(actual),
    }
}

/// Every part in `1..=part_count` has an etag and nothing else does
fn ensure_all_parts(parts: &BTreeMap<u32, String>, part_count: u32) -> Result<(), UploadError> {
    let missing: Vec<u32> = (1..=part_count)
        .filter(|n| !parts.contains_key(n))
        .collect();
    if missing.is_empty() && parts.len() == part_count as usize {
        Ok(())
    } else {
        Err(UploadError::IncompleteParts {
            expected: part_count,
            missing,
        })
    }
}

#[tracing::instrument(
    name = "upload.part",
    skip(provider, session, source, range),
    fields(
        upload.id = %session.upload_id,
        upload.part_number = range.part_number,
        upload.bytes = range.length
    ),
    err
)]
async fn upload_part_range<P: StorageProvider + ?Sized>(
    provider: &P,
    session: &UploadSession,
    source: &Path,
    range: PartRange,
) -> Result<UploadedPart, UploadError> {
    let reader = RangeReader::open(source, range.offset, range.length).await?;
    let result = provider
        .upload_part(session, range.part_number, reader, range.length)
        .await;
    metrics::record_part_upload(provider.name(), result.is_ok());

    let part = result.map_err(|e| UploadError::provider("upload_part", e))?;
    if part.part_number != range.part_number {
        return Err(UploadError::provider(
            "upload_part",
            ProviderError::InvalidPart {
                part_number: range.part_number,
                reason: format!("provider acknowledged part {}", part.part_number),
            },
        ));
    }

    tracing::debug!(etag = %part.etag, "Uploaded part");
    Ok(part)
}
