//! Resumable upload checkpoints
//!
//! A [`Checkpoint`] is plain data: it records which parts of a multipart
//! session are done and which are still outstanding, and holds no live
//! handles, so a caller can persist it between runs. After every mutation
//! `completed_parts` and `remaining_parts` are disjoint and together cover
//! `1..=part_count`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::provider::UploadSession;
use crate::upload::{ObjectKey, PartRange, PartitionPlan};

mod store;

pub use store::{CheckpointStore, JsonFileStore};

/// Checkpoint errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Part {0} is not part of this upload")]
    UnknownPart(u32),

    #[error("Part {0} is already completed")]
    AlreadyCompleted(u32),

    #[error("Checkpoint has no multipart session")]
    MissingSession,

    #[error("Inconsistent checkpoint: {0}")]
    Inconsistent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Progress record of a resumable multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    /// Backend session handle; `None` until a session is opened
    pub upload_id: Option<String>,
    pub object_key: ObjectKey,
    pub source_path: PathBuf,
    pub file_size: u64,
    pub part_size: u64,
    pub remaining_parts: BTreeSet<u32>,
    pub completed_parts: BTreeMap<u32, String>,
    pub provider: String,
    pub created_time: DateTime<Utc>,
}

impl Checkpoint {
    /// Fresh checkpoint for a newly opened session: every part remaining
    pub fn new(
        session: &UploadSession,
        source_path: impl Into<PathBuf>,
        plan: &PartitionPlan,
        provider: impl Into<String>,
    ) -> Self {
        let source_path = source_path.into();
        Self {
            id: Self::id_for(&source_path, &session.object_key),
            upload_id: Some(session.upload_id.clone()),
            object_key: session.object_key.clone(),
            source_path,
            file_size: plan.file_size,
            part_size: plan.part_size,
            remaining_parts: (1..=plan.part_count).collect(),
            completed_parts: BTreeMap::new(),
            provider: provider.into(),
            created_time: Utc::now(),
        }
    }

    /// Stable identifier for a (source, destination) pair
    pub fn id_for(source_path: &Path, object_key: &ObjectKey) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source_path.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(object_key.as_str().as_bytes());
        hex::encode(&hasher.finalize()[..16])
    }

    /// Session this checkpoint belongs to
    pub fn session(&self) -> Result<UploadSession, CheckpointError> {
        let upload_id = self
            .upload_id
            .clone()
            .ok_or(CheckpointError::MissingSession)?;
        Ok(UploadSession {
            object_key: self.object_key.clone(),
            upload_id,
        })
    }

    pub fn plan(&self) -> PartitionPlan {
        PartitionPlan {
            file_size: self.file_size,
            part_size: self.part_size,
            part_count: self.part_count(),
        }
    }

    pub fn part_count(&self) -> u32 {
        (self.remaining_parts.len() + self.completed_parts.len()) as u32
    }

    /// Byte range of a part of this upload
    pub fn part_range(&self, part_number: u32) -> Result<PartRange, CheckpointError> {
        self.plan()
            .part_range(part_number)
            .ok_or(CheckpointError::UnknownPart(part_number))
    }

    pub fn is_complete(&self) -> bool {
        self.remaining_parts.is_empty()
    }

    /// Bytes already uploaded
    pub fn completed_bytes(&self) -> u64 {
        self.completed_parts
            .keys()
            .filter_map(|&n| self.plan().part_range(n))
            .map(|range| range.length)
            .sum()
    }

    /// Move a part from remaining to completed.
    ///
    /// The checkpoint is unchanged when an error is returned.
    pub fn mark_completed(
        &mut self,
        part_number: u32,
        etag: impl Into<String>,
    ) -> Result<(), CheckpointError> {
        if self.completed_parts.contains_key(&part_number) {
            return Err(CheckpointError::AlreadyCompleted(part_number));
        }
        if !self.remaining_parts.remove(&part_number) {
            return Err(CheckpointError::UnknownPart(part_number));
        }
        self.completed_parts.insert(part_number, etag.into());
        Ok(())
    }

    /// Check the structural invariants of a (possibly reloaded) checkpoint
    pub fn validate(&self) -> Result<(), CheckpointError> {
        if self.part_size == 0 || self.file_size == 0 {
            return Err(CheckpointError::Inconsistent(
                "file and part size must be positive".into(),
            ));
        }

        let expected = self.file_size.div_ceil(self.part_size);
        if u64::from(self.part_count()) != expected {
            return Err(CheckpointError::Inconsistent(format!(
                "tracks {} parts but a {} byte file in {} byte parts has {}",
                self.part_count(),
                self.file_size,
                self.part_size,
                expected
            )));
        }

        if let Some(part) = self
            .remaining_parts
            .iter()
            .find(|n| self.completed_parts.contains_key(n))
        {
            return Err(CheckpointError::Inconsistent(format!(
                "part {} is both remaining and completed",
                part
            )));
        }

        let all: BTreeSet<u32> = self
            .remaining_parts
            .iter()
            .chain(self.completed_parts.keys())
            .copied()
            .collect();
        let contiguous = all.iter().copied().eq(1..=self.part_count());
        if !contiguous {
            return Err(CheckpointError::Inconsistent(
                "part numbers are not contiguous from 1".into(),
            ));
        }

        Ok(())
    }
}
