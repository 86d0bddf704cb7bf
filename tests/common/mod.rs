//! Shared test fixtures
//!
//! [`RecordingProvider`] keeps everything in memory, logs every adapter call
//! and can be told to fail specific operations.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use multipart_uploadr::provider::{
    CompletedUpload, ObjectAttributes, ObjectBody, ObjectMetadata, ProviderError, ProviderLimits,
    StorageProvider, UploadSession, UploadedPart,
};
use multipart_uploadr::upload::{ObjectKey, RangeReader, UploadResult};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncReadExt;

pub const PROVIDER_NAME: &str = "recording";

/// One adapter call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Standard { key: String, size: u64 },
    Initiate { key: String },
    UploadPart { part_number: u32, size: u64 },
    Complete { parts: BTreeMap<u32, String> },
    Abort { upload_id: String },
    ListParts { upload_id: String },
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    /// (upload_id, part_number) -> bytes
    parts: HashMap<(String, u32), Vec<u8>>,
    objects: HashMap<String, Vec<u8>>,
    next_upload: u32,
}

/// In-memory provider that records adapter calls
pub struct RecordingProvider {
    limits: ProviderLimits,
    resumable: bool,
    fail_initiate: bool,
    fail_complete: bool,
    fail_abort: bool,
    failing_parts: Mutex<HashSet<u32>>,
    part_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    state: Mutex<State>,
}

impl Default for RecordingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self {
            limits: ProviderLimits {
                min_part_size: 1,
                max_part_size: 1 << 20,
                part_count_limit: 1000,
                multipart_threshold: 64,
            },
            resumable: true,
            fail_initiate: false,
            fail_complete: false,
            fail_abort: false,
            failing_parts: Mutex::new(HashSet::new()),
            part_delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_limits(mut self, limits: ProviderLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn non_resumable(mut self) -> Self {
        self.resumable = false;
        self
    }

    pub fn failing_initiate(mut self) -> Self {
        self.fail_initiate = true;
        self
    }

    pub fn failing_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    pub fn failing_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    pub fn failing_part(self, part_number: u32) -> Self {
        self.failing_parts.lock().insert(part_number);
        self
    }

    pub fn with_part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = Some(delay);
        self
    }

    /// Let previously failing parts succeed
    pub fn heal(&self) {
        self.failing_parts.lock().clear();
    }

    /// Pretend a part was uploaded in an earlier run
    pub fn seed_part(&self, upload_id: &str, part_number: u32, data: &[u8]) {
        self.state
            .lock()
            .parts
            .insert((upload_id.to_string(), part_number), data.to_vec());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Part numbers passed to `upload_part`, in call order
    pub fn uploaded_part_numbers(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::UploadPart { part_number, .. } => Some(part_number),
                _ => None,
            })
            .collect()
    }

    pub fn standard_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Standard { .. }))
    }

    pub fn initiate_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Initiate { .. }))
    }

    pub fn complete_calls(&self) -> Vec<BTreeMap<u32, String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Complete { parts } => Some(parts),
                _ => None,
            })
            .collect()
    }

    pub fn abort_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Abort { .. }))
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Bytes of an assembled or directly uploaded object
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().objects.get(key).cloned()
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

pub fn part_etag(part_number: u32) -> String {
    format!("e{}", part_number)
}

#[async_trait]
impl StorageProvider for RecordingProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn limits(&self) -> ProviderLimits {
        self.limits
    }

    fn supports_resumable_upload(&self) -> bool {
        self.resumable
    }

    async fn standard_upload(
        &self,
        key: &ObjectKey,
        body: ObjectBody,
        _attributes: &ObjectAttributes,
    ) -> Result<UploadResult, ProviderError> {
        let size = body.length();
        self.record(Call::Standard {
            key: key.to_string(),
            size,
        });

        let mut data = Vec::new();
        body.into_reader().read_to_end(&mut data).await?;
        self.state.lock().objects.insert(key.to_string(), data);
        Ok(UploadResult::succeeded(
            key.clone(),
            size,
            "single",
            format!("mem://{}", key),
        ))
    }

    async fn initiate_multipart_upload(
        &self,
        key: &ObjectKey,
        _attributes: &ObjectAttributes,
    ) -> Result<UploadSession, ProviderError> {
        self.record(Call::Initiate {
            key: key.to_string(),
        });
        if self.fail_initiate {
            return Err(ProviderError::backend("initiate refused"));
        }
        let mut state = self.state.lock();
        state.next_upload += 1;
        Ok(UploadSession {
            object_key: key.clone(),
            upload_id: format!("upload-{}", state.next_upload),
        })
    }

    async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        mut body: RangeReader,
        length: u64,
    ) -> Result<UploadedPart, ProviderError> {
        self.record(Call::UploadPart {
            part_number,
            size: length,
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.part_delay {
            tokio::time::sleep(delay).await;
        }

        let mut data = Vec::new();
        let read = body.read_to_end(&mut data).await;
        let failing = self.failing_parts.lock().contains(&part_number);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        read?;

        if failing {
            return Err(ProviderError::backend(format!(
                "part {} rejected",
                part_number
            )));
        }

        let size = data.len() as u64;
        self.state
            .lock()
            .parts
            .insert((session.upload_id.clone(), part_number), data);
        Ok(UploadedPart {
            part_number,
            etag: part_etag(part_number),
            size,
            last_modified: Utc::now(),
        })
    }

    async fn complete_multipart_upload(
        &self,
        session: &UploadSession,
        parts: &BTreeMap<u32, String>,
    ) -> Result<CompletedUpload, ProviderError> {
        self.record(Call::Complete {
            parts: parts.clone(),
        });
        if self.fail_complete {
            return Err(ProviderError::backend("complete refused"));
        }

        let mut state = self.state.lock();
        let mut object = Vec::new();
        for &part_number in parts.keys() {
            if let Some(data) = state.parts.get(&(session.upload_id.clone(), part_number)) {
                object.extend_from_slice(data);
            }
        }
        state
            .objects
            .insert(session.object_key.to_string(), object);
        Ok(CompletedUpload {
            etag: format!("multi-{}", parts.len()),
            download_url: format!("mem://{}", session.object_key),
        })
    }

    async fn abort_multipart_upload(&self, session: &UploadSession) -> Result<(), ProviderError> {
        self.record(Call::Abort {
            upload_id: session.upload_id.clone(),
        });
        if self.fail_abort {
            return Err(ProviderError::backend("abort refused"));
        }
        self.state
            .lock()
            .parts
            .retain(|(upload_id, _), _| upload_id != &session.upload_id);
        Ok(())
    }

    async fn list_uploaded_parts(
        &self,
        session: &UploadSession,
    ) -> Result<Vec<UploadedPart>, ProviderError> {
        self.record(Call::ListParts {
            upload_id: session.upload_id.clone(),
        });
        let state = self.state.lock();
        let mut parts: Vec<UploadedPart> = state
            .parts
            .iter()
            .filter(|((upload_id, _), _)| upload_id == &session.upload_id)
            .map(|((_, part_number), data)| UploadedPart {
                part_number: *part_number,
                etag: part_etag(*part_number),
                size: data.len() as u64,
                last_modified: Utc::now(),
            })
            .collect();
        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    async fn download(&self, key: &ObjectKey) -> Result<Bytes, ProviderError> {
        self.object(key.as_str())
            .map(Bytes::from)
            .ok_or_else(|| ProviderError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ProviderError> {
        self.state
            .lock()
            .objects
            .remove(key.as_str())
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(key.to_string()))
    }

    async fn get_metadata(&self, key: &ObjectKey) -> Result<ObjectMetadata, ProviderError> {
        Err(ProviderError::NotFound(key.to_string()))
    }

    async fn generate_presigned_url(
        &self,
        key: &ObjectKey,
        expires_in: Duration,
    ) -> Result<String, ProviderError> {
        Ok(format!("mem://{}?ttl={}", key, expires_in.as_secs()))
    }
}

/// Temp file filled with random bytes
pub fn random_file(len: usize) -> (tempfile::NamedTempFile, Vec<u8>) {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);

    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(&data).expect("write temp file");
    file.flush().expect("flush temp file");
    (file, data)
}
