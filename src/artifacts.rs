//! Artifacts metadata database.
//!
//! The builder records every artifact it produces, one JSON document per
//! line. A retried build appends new records rather than replacing old ones,
//! so several index records can exist for one image; readers pick the newest.

use crate::error::{Error, Result};
use crate::oci::Descriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Kind of artifact recorded by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    SociIndex,
    Ztoc,
}

/// One artifact produced by a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub kind: ArtifactKind,
    pub digest: String,
    pub media_type: String,
    pub size: u64,
    /// Manifest digest of the image the artifact was built for.
    pub image_digest: String,
    /// OCI platform string, e.g. `linux/amd64`.
    pub platform: String,
    pub created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    /// Descriptor of the recorded artifact.
    pub fn descriptor(&self) -> Descriptor {
        Descriptor {
            media_type: self.media_type.clone(),
            digest: self.digest.clone(),
            size: self.size,
            artifact_type: None,
            platform: None,
            annotations: Default::default(),
        }
    }
}

/// Handle to the database file inside a workspace.
#[derive(Debug, Clone)]
pub struct ArtifactsDb {
    path: PathBuf,
}

impl ArtifactsDb {
    /// Points at `path`; the file is created on first append.
    pub fn open(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a record.
    pub fn append(&self, record: &ArtifactRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.db_error(e))?;
        file.write_all(&line).map_err(|e| self.db_error(e))?;
        Ok(())
    }

    /// Reads every record. A missing file holds no records.
    pub fn records(&self) -> Result<Vec<ArtifactRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.db_error(e)),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| self.db_error(e)))
            .collect()
    }

    /// Index records built for `image_digest` on `platform`, in file order.
    pub fn index_records(&self, image_digest: &str, platform: &str) -> Result<Vec<ArtifactRecord>> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| {
                r.kind == ArtifactKind::SociIndex
                    && r.image_digest == image_digest
                    && r.platform == platform
            })
            .collect())
    }

    fn db_error(&self, e: impl std::fmt::Display) -> Error {
        Error::ArtifactsDb {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}
