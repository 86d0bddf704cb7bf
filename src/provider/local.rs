//! Local filesystem storage provider
//!
//! Stores objects in a directory tree and implements the full multipart
//! protocol on top of it:
//!
//! ```text
//! <root>/objects/<key>                   object bytes
//! <root>/.meta/<key>.json                size, etag, attributes
//! <root>/.multipart/<upload_id>/session.json
//! <root>/.multipart/<upload_id>/00001.part + 00001.json
//! <root>/.tmp/                           staging for atomic publishes
//! ```
//!
//! ETags are the hex SHA-256 of the bytes. A multipart object's ETag is the
//! SHA-256 of its part ETags followed by `-<part count>`. Sessions live on
//! disk, so uploads can be resumed by another process.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use super::{
    CompletedUpload, ObjectAttributes, ObjectBody, ObjectMetadata, ProviderError, ProviderLimits,
    StorageProvider, UploadSession, UploadedPart,
};
use crate::config::LocalProviderConfig;
use crate::upload::{ObjectKey, RangeReader, UploadResult, Visibility};

type HmacSha256 = Hmac<Sha256>;

/// Provider name recorded in checkpoints
pub const LOCAL_PROVIDER_NAME: &str = "local";

/// Lifetime of the presigned URLs returned for private objects (1 hour)
pub const DEFAULT_PRESIGN_TTL: Duration = Duration::from_secs(3600);

const COPY_BUFFER_SIZE: usize = 65536;
const SESSION_FILE: &str = "session.json";

/// Characters left unescaped in key segments
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Serialize, Deserialize)]
struct ObjectRecord {
    size: u64,
    etag: String,
    last_modified: DateTime<Utc>,
    attributes: ObjectAttributes,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    object_key: ObjectKey,
    attributes: ObjectAttributes,
    initiated: DateTime<Utc>,
}

/// Directory-backed [`StorageProvider`]
pub struct LocalFsProvider {
    root: PathBuf,
    base_url: String,
    signing_secret: Vec<u8>,
    limits: ProviderLimits,
}

impl LocalFsProvider {
    /// Provider rooted at `root`, serving objects under `base_url`.
    ///
    /// A random signing secret is generated; presigned URLs only stay valid
    /// across restarts when a secret is configured.
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signing_secret: Uuid::new_v4().as_bytes().to_vec(),
            // Files have no minimum part size
            limits: ProviderLimits {
                min_part_size: 1,
                ..ProviderLimits::default()
            },
        }
    }

    pub fn from_config(config: &LocalProviderConfig) -> Self {
        let mut provider = Self::new(&config.root, &config.base_url);
        if let Some(secret) = &config.signing_secret {
            provider = provider.with_signing_secret(secret);
        }
        provider.limits.part_count_limit = config.part_count_limit;
        provider
    }

    pub fn with_signing_secret(mut self, secret: impl AsRef<[u8]>) -> Self {
        self.signing_secret = secret.as_ref().to_vec();
        self
    }

    pub fn with_limits(mut self, limits: ProviderLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path holding an object's bytes
    pub fn object_path(&self, key: &ObjectKey) -> Result<PathBuf, ProviderError> {
        Ok(self.root.join("objects").join(checked_key(key)?))
    }

    fn meta_path(&self, key: &ObjectKey) -> Result<PathBuf, ProviderError> {
        Ok(self
            .root
            .join(".meta")
            .join(format!("{}.json", checked_key(key)?)))
    }

    fn session_dir(&self, session: &UploadSession) -> Result<PathBuf, ProviderError> {
        let id = Uuid::parse_str(&session.upload_id)
            .map_err(|_| ProviderError::NoSuchUpload(session.upload_id.clone()))?;
        Ok(self.root.join(".multipart").join(id.simple().to_string()))
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join(".tmp").join(Uuid::new_v4().simple().to_string())
    }

    /// Unsigned URL of an object
    pub fn object_url(&self, key: &ObjectKey) -> String {
        let encoded: Vec<String> = key
            .as_str()
            .split('/')
            .map(|segment| utf8_percent_encode(segment, KEY_SEGMENT).to_string())
            .collect();
        format!("{}/{}", self.base_url, encoded.join("/"))
    }

    fn keyed_mac(&self, key: &ObjectKey, expires: i64) -> Result<HmacSha256, ProviderError> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_secret)
            .map_err(|_| ProviderError::backend("invalid signing secret"))?;
        mac.update(key.as_str().as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    fn presign(&self, key: &ObjectKey, expires_in: Duration) -> Result<String, ProviderError> {
        let ttl = chrono::Duration::from_std(expires_in)
            .map_err(|e| ProviderError::with_source("presign expiry out of range", e))?;
        let expires = (Utc::now() + ttl).timestamp();
        let signature = URL_SAFE_NO_PAD.encode(self.keyed_mac(key, expires)?.finalize().into_bytes());
        Ok(format!(
            "{}?expires={}&signature={}",
            self.object_url(key),
            expires,
            signature
        ))
    }

    /// Check a presigned URL's `expires` and `signature` query values
    pub fn verify_presigned(&self, key: &ObjectKey, expires: i64, signature: &str) -> bool {
        if expires < Utc::now().timestamp() {
            return false;
        }
        let Ok(provided) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        let Ok(mac) = self.keyed_mac(key, expires) else {
            return false;
        };
        mac.verify_slice(&provided).is_ok()
    }

    /// URL handed back in upload results
    fn download_url(
        &self,
        key: &ObjectKey,
        attributes: &ObjectAttributes,
    ) -> Result<String, ProviderError> {
        match attributes.visibility {
            Visibility::Public => Ok(self.object_url(key)),
            Visibility::Private => self.presign(key, DEFAULT_PRESIGN_TTL),
        }
    }

    /// Move a staged file into place and write its metadata
    async fn publish(
        &self,
        staged: &Path,
        key: &ObjectKey,
        record: &ObjectRecord,
    ) -> Result<(), ProviderError> {
        let object_path = self.object_path(key)?;
        let meta_path = self.meta_path(key)?;
        create_parent(&object_path).await?;
        create_parent(&meta_path).await?;

        write_json(&meta_path, record).await?;
        tokio::fs::rename(staged, &object_path).await?;
        Ok(())
    }

    async fn read_object_record(&self, key: &ObjectKey) -> Result<ObjectRecord, ProviderError> {
        match read_json(&self.meta_path(key)?).await {
            Err(ProviderError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                Err(ProviderError::NotFound(key.to_string()))
            }
            other => other,
        }
    }

    async fn read_session(&self, session: &UploadSession) -> Result<SessionRecord, ProviderError> {
        let dir = self.session_dir(session)?;
        let record: SessionRecord = match read_json(&dir.join(SESSION_FILE)).await {
            Err(ProviderError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(ProviderError::NoSuchUpload(session.upload_id.clone()))
            }
            other => other?,
        };
        if record.object_key != session.object_key {
            return Err(ProviderError::backend(format!(
                "upload {} belongs to {}, not {}",
                session.upload_id, record.object_key, session.object_key
            )));
        }
        Ok(record)
    }

    async fn assemble(
        &self,
        dir: &Path,
        parts: &BTreeMap<u32, String>,
        staged: &Path,
    ) -> Result<(u64, String), ProviderError> {
        create_parent(staged).await?;
        let mut out = tokio::fs::File::create(staged).await?;
        let mut etags = Sha256::new();
        let mut size = 0u64;

        for (&part_number, etag) in parts {
            let stored: UploadedPart = match read_json(&part_record_path(dir, part_number)).await {
                Err(ProviderError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                    return Err(ProviderError::InvalidPart {
                        part_number,
                        reason: "part was never uploaded".into(),
                    })
                }
                other => other?,
            };
            if &stored.etag != etag {
                return Err(ProviderError::InvalidPart {
                    part_number,
                    reason: format!("etag mismatch (stored {}, given {})", stored.etag, etag),
                });
            }

            let mut part = tokio::fs::File::open(part_data_path(dir, part_number)).await?;
            size += tokio::io::copy(&mut part, &mut out).await?;
            etags.update(etag.as_bytes());
        }

        out.flush().await?;
        out.sync_all().await?;
        Ok((
            size,
            format!("{}-{}", hex::encode(etags.finalize()), parts.len()),
        ))
    }
}

#[async_trait]
impl StorageProvider for LocalFsProvider {
    fn name(&self) -> &'static str {
        LOCAL_PROVIDER_NAME
    }

    fn limits(&self) -> ProviderLimits {
        self.limits
    }

    fn supports_resumable_upload(&self) -> bool {
        true
    }

    #[tracing::instrument(
        name = "local.put_object",
        skip(self, body, attributes),
        fields(upload.key = %key, upload.bytes = body.length()),
        err
    )]
    async fn standard_upload(
        &self,
        key: &ObjectKey,
        body: ObjectBody,
        attributes: &ObjectAttributes,
    ) -> Result<UploadResult, ProviderError> {
        let expected = body.length();
        let staged = self.temp_path();
        let mut reader = body.into_reader();

        let (size, etag) = match copy_hashed(&mut reader, &staged).await {
            Ok((size, _)) if size != expected => {
                discard(&staged).await;
                return Err(ProviderError::backend(format!(
                    "body produced {} bytes, expected {}",
                    size, expected
                )));
            }
            Ok(written) => written,
            Err(e) => {
                discard(&staged).await;
                return Err(e);
            }
        };

        let record = ObjectRecord {
            size,
            etag: etag.clone(),
            last_modified: Utc::now(),
            attributes: attributes.clone(),
        };
        if let Err(e) = self.publish(&staged, key, &record).await {
            discard(&staged).await;
            return Err(e);
        }

        let url = self.download_url(key, attributes)?;
        Ok(UploadResult::succeeded(key.clone(), size, etag, url))
    }

    #[tracing::instrument(
        name = "local.initiate_multipart",
        skip(self, attributes),
        fields(upload.key = %key, upload.id = tracing::field::Empty),
        err
    )]
    async fn initiate_multipart_upload(
        &self,
        key: &ObjectKey,
        attributes: &ObjectAttributes,
    ) -> Result<UploadSession, ProviderError> {
        checked_key(key)?;
        let session = UploadSession {
            object_key: key.clone(),
            upload_id: Uuid::new_v4().simple().to_string(),
        };
        let dir = self.session_dir(&session)?;
        tokio::fs::create_dir_all(&dir).await?;

        let record = SessionRecord {
            object_key: key.clone(),
            attributes: attributes.clone(),
            initiated: Utc::now(),
        };
        write_json(&dir.join(SESSION_FILE), &record).await?;

        tracing::Span::current().record("upload.id", session.upload_id.as_str());
        Ok(session)
    }

    #[tracing::instrument(
        name = "local.upload_part",
        skip(self, session, body),
        fields(upload.id = %session.upload_id, upload.part_number = part_number, upload.bytes = length),
        err
    )]
    async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        mut body: RangeReader,
        length: u64,
    ) -> Result<UploadedPart, ProviderError> {
        if part_number == 0 || part_number > self.limits.part_count_limit {
            return Err(ProviderError::InvalidPart {
                part_number,
                reason: format!("part numbers run from 1 to {}", self.limits.part_count_limit),
            });
        }
        self.read_session(session).await?;

        let dir = self.session_dir(session)?;
        let data_path = part_data_path(&dir, part_number);
        let staged = data_path.with_extension("part.tmp");

        let (size, etag) = match copy_hashed(&mut body, &staged).await {
            Ok((size, _)) if size != length => {
                discard(&staged).await;
                return Err(ProviderError::InvalidPart {
                    part_number,
                    reason: format!("received {} bytes, expected {}", size, length),
                });
            }
            Ok(written) => written,
            Err(e) => {
                discard(&staged).await;
                return Err(e);
            }
        };
        tokio::fs::rename(&staged, &data_path).await?;

        let part = UploadedPart {
            part_number,
            etag,
            size,
            last_modified: Utc::now(),
        };
        write_json(&part_record_path(&dir, part_number), &part).await?;
        Ok(part)
    }

    #[tracing::instrument(
        name = "local.complete_multipart",
        skip(self, session, parts),
        fields(upload.id = %session.upload_id, upload.key = %session.object_key, parts = parts.len()),
        err
    )]
    async fn complete_multipart_upload(
        &self,
        session: &UploadSession,
        parts: &BTreeMap<u32, String>,
    ) -> Result<CompletedUpload, ProviderError> {
        let record = self.read_session(session).await?;
        let count = parts.len() as u32;
        if let Some(missing) = (1..=count).find(|n| !parts.contains_key(n)) {
            return Err(ProviderError::InvalidPart {
                part_number: missing,
                reason: "part list is not contiguous from 1".into(),
            });
        }
        if count == 0 {
            return Err(ProviderError::backend("cannot complete an upload without parts"));
        }

        let dir = self.session_dir(session)?;
        let staged = self.temp_path();
        let (size, etag) = match self.assemble(&dir, parts, &staged).await {
            Ok(assembled) => assembled,
            Err(e) => {
                discard(&staged).await;
                return Err(e);
            }
        };

        let object = ObjectRecord {
            size,
            etag: etag.clone(),
            last_modified: Utc::now(),
            attributes: record.attributes,
        };
        if let Err(e) = self.publish(&staged, &session.object_key, &object).await {
            discard(&staged).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            tracing::warn!(error = %e, "Failed to clean up multipart staging");
        }

        Ok(CompletedUpload {
            download_url: self.download_url(&session.object_key, &object.attributes)?,
            etag,
        })
    }

    #[tracing::instrument(
        name = "local.abort_multipart",
        skip(self, session),
        fields(upload.id = %session.upload_id),
        err
    )]
    async fn abort_multipart_upload(&self, session: &UploadSession) -> Result<(), ProviderError> {
        let dir = self.session_dir(session)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ProviderError::NoSuchUpload(session.upload_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_uploaded_parts(
        &self,
        session: &UploadSession,
    ) -> Result<Vec<UploadedPart>, ProviderError> {
        self.read_session(session).await?;
        let dir = self.session_dir(session)?;

        let mut parts = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == SESSION_FILE || !name.ends_with(".json") {
                continue;
            }
            parts.push(read_json::<UploadedPart>(&entry.path()).await?);
        }
        parts.sort_by_key(|part| part.part_number);
        Ok(parts)
    }

    async fn download(&self, key: &ObjectKey) -> Result<Bytes, ProviderError> {
        match tokio::fs::read(self.object_path(key)?).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ProviderError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(name = "local.delete", skip(self), fields(upload.key = %key), err)]
    async fn delete(&self, key: &ObjectKey) -> Result<(), ProviderError> {
        match tokio::fs::remove_file(self.object_path(key)?).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ProviderError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        if let Err(e) = tokio::fs::remove_file(self.meta_path(key)?).await {
            if e.kind() != ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn get_metadata(&self, key: &ObjectKey) -> Result<ObjectMetadata, ProviderError> {
        let record = self.read_object_record(key).await?;
        Ok(ObjectMetadata {
            key: key.clone(),
            size: record.size,
            etag: record.etag,
            last_modified: record.last_modified,
            attributes: record.attributes,
        })
    }

    async fn generate_presigned_url(
        &self,
        key: &ObjectKey,
        expires_in: Duration,
    ) -> Result<String, ProviderError> {
        checked_key(key)?;
        self.presign(key, expires_in)
    }
}

/// Reject keys that would escape the storage root
fn checked_key(key: &ObjectKey) -> Result<&str, ProviderError> {
    let raw = key.as_str();
    if raw.is_empty()
        || raw.starts_with('/')
        || raw
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(ProviderError::backend(format!("invalid object key '{}'", raw)));
    }
    Ok(raw)
}

fn part_data_path(dir: &Path, part_number: u32) -> PathBuf {
    dir.join(format!("{:05}.part", part_number))
}

fn part_record_path(dir: &Path, part_number: u32) -> PathBuf {
    dir.join(format!("{:05}.json", part_number))
}

async fn create_parent(path: &Path) -> Result<(), ProviderError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Copy `reader` into a new file at `dest`, returning size and hex SHA-256
async fn copy_hashed<R>(reader: &mut R, dest: &Path) -> Result<(u64, String), ProviderError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    create_parent(dest).await?;
    let mut file = tokio::fs::File::create(dest).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut size = 0u64;

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        file.write_all(&buffer[..n]).await?;
        size += n as u64;
    }
    file.flush().await?;
    file.sync_all().await?;

    Ok((size, hex::encode(hasher.finalize())))
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove staged file");
        }
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ProviderError> {
    let body = serde_json::to_vec(value)
        .map_err(|e| ProviderError::with_source("failed to encode record", e))?;
    tokio::fs::write(path, body).await?;
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ProviderError> {
    let body = tokio::fs::read(path).await?;
    serde_json::from_slice(&body).map_err(|e| {
        ProviderError::with_source(format!("corrupt record {}", path.display()), e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(dir: &Path) -> LocalFsProvider {
        LocalFsProvider::new(dir, "http://files.local/")
            .with_signing_secret("test-secret")
            .with_limits(ProviderLimits {
                min_part_size: 1,
                max_part_size: 1024,
                part_count_limit: 10,
                multipart_threshold: 16,
            })
    }

    fn attrs(visibility: Visibility) -> ObjectAttributes {
        ObjectAttributes {
            content_type: "text/plain".into(),
            visibility,
            metadata: Default::default(),
            expires_at: None,
        }
    }

    fn body(data: &'static [u8]) -> ObjectBody {
        ObjectBody::new(Box::pin(data), data.len() as u64)
    }

    async fn part_file(dir: &Path, data: &[u8]) -> (PathBuf, u64) {
        let path = dir.join(format!("src-{}", Uuid::new_v4()));
        tokio::fs::write(&path, data).await.unwrap();
        (path, data.len() as u64)
    }

    #[tokio::test]
    async fn test_standard_upload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());
        let key = ObjectKey::resolve("docs", "hello.txt").unwrap();

        let result = provider
            .standard_upload(&key, body(b"hello"), &attrs(Visibility::Public))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(
            result.etag.as_deref(),
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
        assert_eq!(
            result.download_url.as_deref(),
            Some("http://files.local/docs/hello.txt")
        );

        assert_eq!(provider.download(&key).await.unwrap(), Bytes::from_static(b"hello"));
        let meta = provider.get_metadata(&key).await.unwrap();
        assert_eq!(meta.size, 5);
        assert_eq!(meta.attributes.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_standard_upload_rejects_short_body() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());
        let key = ObjectKey::resolve("", "short.bin").unwrap();

        let short = ObjectBody::new(Box::pin(&b"abc"[..]), 10);
        let err = provider
            .standard_upload(&key, short, &attrs(Visibility::Private))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Backend { .. }));
        assert!(matches!(
            provider.download(&key).await,
            Err(ProviderError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_multipart_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());
        let key = ObjectKey::resolve("big", "data.bin").unwrap();
        let session = provider
            .initiate_multipart_upload(&key, &attrs(Visibility::Public))
            .await
            .unwrap();

        let (src, len) = part_file(dir.path(), b"aaaabbbbcc").await;
        let mut etags = BTreeMap::new();
        for (n, offset, length) in [(2u32, 4u64, 4u64), (1, 0, 4), (3, 8, 2)] {
            let reader = RangeReader::open(&src, offset, length).await.unwrap();
            let part = provider.upload_part(&session, n, reader, length).await.unwrap();
            etags.insert(n, part.etag);
        }
        assert_eq!(len, 10);

        let listed = provider.list_uploaded_parts(&session).await.unwrap();
        assert_eq!(
            listed.iter().map(|p| p.part_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let done = provider
            .complete_multipart_upload(&session, &etags)
            .await
            .unwrap();
        assert!(done.etag.ends_with("-3"));
        assert_eq!(
            provider.download(&key).await.unwrap(),
            Bytes::from_static(b"aaaabbbbcc")
        );
        // Staging is gone once the object is assembled
        assert!(matches!(
            provider.list_uploaded_parts(&session).await,
            Err(ProviderError::NoSuchUpload(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_rejects_gaps_and_bad_etags() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());
        let key = ObjectKey::resolve("", "gappy.bin").unwrap();
        let session = provider
            .initiate_multipart_upload(&key, &attrs(Visibility::Private))
            .await
            .unwrap();

        let (src, _) = part_file(dir.path(), b"xxxx").await;
        let reader = RangeReader::open(&src, 0, 4).await.unwrap();
        let part = provider.upload_part(&session, 1, reader, 4).await.unwrap();

        let mut gappy = BTreeMap::new();
        gappy.insert(1, part.etag.clone());
        gappy.insert(3, "whatever".to_string());
        assert!(matches!(
            provider.complete_multipart_upload(&session, &gappy).await,
            Err(ProviderError::InvalidPart { part_number: 2, .. })
        ));

        let mut wrong = BTreeMap::new();
        wrong.insert(1, "not-the-etag".to_string());
        assert!(matches!(
            provider.complete_multipart_upload(&session, &wrong).await,
            Err(ProviderError::InvalidPart { part_number: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_abort_removes_session() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());
        let key = ObjectKey::resolve("", "gone.bin").unwrap();
        let session = provider
            .initiate_multipart_upload(&key, &attrs(Visibility::Private))
            .await
            .unwrap();

        provider.abort_multipart_upload(&session).await.unwrap();
        assert!(matches!(
            provider.abort_multipart_upload(&session).await,
            Err(ProviderError::NoSuchUpload(_))
        ));

        let (src, _) = part_file(dir.path(), b"late").await;
        let reader = RangeReader::open(&src, 0, 4).await.unwrap();
        assert!(matches!(
            provider.upload_part(&session, 1, reader, 4).await,
            Err(ProviderError::NoSuchUpload(_))
        ));
    }

    #[tokio::test]
    async fn test_part_number_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());
        let key = ObjectKey::resolve("", "n.bin").unwrap();
        let session = provider
            .initiate_multipart_upload(&key, &attrs(Visibility::Private))
            .await
            .unwrap();

        let (src, _) = part_file(dir.path(), b"zz").await;
        let reader = RangeReader::open(&src, 0, 2).await.unwrap();
        assert!(matches!(
            provider.upload_part(&session, 11, reader, 2).await,
            Err(ProviderError::InvalidPart { part_number: 11, .. })
        ));
    }

    #[tokio::test]
    async fn test_presigned_url_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());
        let key = ObjectKey::resolve("reports", "q3 summary.pdf").unwrap();

        let url = provider
            .generate_presigned_url(&key, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("http://files.local/reports/q3%20summary.pdf?expires="));

        let query = url.split_once('?').unwrap().1;
        let mut expires = 0i64;
        let mut signature = String::new();
        for pair in query.split('&') {
            match pair.split_once('=').unwrap() {
                ("expires", v) => expires = v.parse().unwrap(),
                ("signature", v) => signature = v.to_string(),
                _ => {}
            }
        }

        assert!(provider.verify_presigned(&key, expires, &signature));
        assert!(!provider.verify_presigned(&key, expires + 1, &signature));
        assert!(!provider.verify_presigned(&key, Utc::now().timestamp() - 10, &signature));

        let other = ObjectKey::resolve("reports", "other.pdf").unwrap();
        assert!(!provider.verify_presigned(&other, expires, &signature));
    }

    #[tokio::test]
    async fn test_private_objects_get_signed_urls() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());
        let key = ObjectKey::resolve("", "secret.txt").unwrap();

        let result = provider
            .standard_upload(&key, body(b"shh"), &attrs(Visibility::Private))
            .await
            .unwrap();
        assert!(result.download_url.unwrap().contains("&signature="));
    }

    #[tokio::test]
    async fn test_delete_and_missing_objects() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());
        let key = ObjectKey::resolve("", "tmp.txt").unwrap();

        provider
            .standard_upload(&key, body(b"x"), &attrs(Visibility::Public))
            .await
            .unwrap();
        provider.delete(&key).await.unwrap();

        assert!(matches!(provider.delete(&key).await, Err(ProviderError::NotFound(_))));
        assert!(matches!(
            provider.get_metadata(&key).await,
            Err(ProviderError::NotFound(_))
        ));
    }

    #[test]
    fn test_unknown_upload_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());
        let session = UploadSession {
            object_key: ObjectKey::resolve("", "a").unwrap(),
            upload_id: "../../etc".into(),
        };
        assert!(matches!(
            provider.session_dir(&session),
            Err(ProviderError::NoSuchUpload(_))
        ));
    }
}
