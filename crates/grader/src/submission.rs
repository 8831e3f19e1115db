//! Lookup of a learner's saved notebook.
//!
//! A missing notebook is a normal result (`Ok(None)`); learners who never
//! opened the assignment have nothing on disk.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use labgrade_core::config::SubmissionConfig;
use tracing::debug;

use crate::error::StoreError;

/// A located submission, loaded into memory.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Where it was found, for logs.
    pub location: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Fetch the submission for `identity` on assignment `lab`.
    async fn fetch(&self, identity: &str, lab: &str) -> Result<Option<Submission>, StoreError>;
}

/// Submissions laid out on a local (or mounted) filesystem.
#[derive(Debug, Clone)]
pub struct FsSubmissionStore {
    root: PathBuf,
    path_template: String,
}

impl FsSubmissionStore {
    pub fn new(root: impl Into<PathBuf>, path_template: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            path_template: path_template.into(),
        }
    }

    pub fn from_config(config: &SubmissionConfig) -> Self {
        Self::new(config.root.clone(), config.path_template.clone())
    }

    /// Resolve the on-disk path. Keys that could escape `root` are rejected.
    fn resolve(&self, identity: &str, lab: &str) -> Result<PathBuf, StoreError> {
        for key in [identity, lab] {
            if !is_single_component(key) {
                return Err(StoreError::InvalidKey(key.to_string()));
            }
        }
        let relative = self
            .path_template
            .replace("{user}", identity)
            .replace("{lab}", lab);
        Ok(self.root.join(Path::new(&relative)))
    }
}

/// A key must name exactly one ordinary path component: no separators,
/// and not `.` or `..`.
fn is_single_component(key: &str) -> bool {
    if key.is_empty() || key.contains(&['/', '\\'][..]) {
        return false;
    }
    let mut components = Path::new(key).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[async_trait]
impl SubmissionStore for FsSubmissionStore {
    async fn fetch(&self, identity: &str, lab: &str) -> Result<Option<Submission>, StoreError> {
        let path = self.resolve(identity, lab)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(identity, path = %path.display(), size = bytes.len(), "submission located");
                Ok(Some(Submission {
                    location: path.display().to_string(),
                    bytes,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }
}
