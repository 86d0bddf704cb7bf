//! Checkpoint persistence hooks
//!
//! The engine never persists checkpoints on its own. A caller that wants
//! progress to survive a crash hands the [`Uploader`](crate::upload::Uploader)
//! a [`CheckpointStore`]; it is called after every checkpoint mutation.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{Checkpoint, CheckpointError};

/// Persistence for checkpoints, keyed by checkpoint id
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    async fn load(&self, id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    async fn remove(&self, id: &str) -> Result<(), CheckpointError>;
}

/// Stores each checkpoint as `<dir>/<id>.json`
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

#[async_trait]
impl CheckpointStore for JsonFileStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(&checkpoint.id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(checkpoint)?;

        // Written to a temp file, then renamed into place
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(body) => {
                let checkpoint: Checkpoint = serde_json::from_slice(&body)?;
                checkpoint.validate()?;
                Ok(Some(checkpoint))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, id: &str) -> Result<(), CheckpointError> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
