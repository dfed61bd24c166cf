//! # Invocation Workspace
//!
//! Each invocation owns one directory under the ephemeral root:
//!
//! ```text
//! /tmp/<request-id>-<uuid>/
//! ├── content/       pulled manifests, configs and layers (BlobStore)
//! ├── store/         OCI layout written by the builder (OciLayout)
//! └── artifacts.db   build records (ArtifactsDb)
//! ```
//!
//! ## Lifecycle
//!
//! 1. [`Workspace::acquire`] probes free space and creates the directory
//! 2. [`Workspace::open_stores`] initializes the stores inside it
//! 3. [`Workspace::release`] removes the whole tree
//!
//! Release is shared between the main path and the deadline watchdog. Every
//! call removes whatever is on disk, since a call still in flight when the
//! watchdog fires may recreate directories. Only the first call reports
//! itself as the release; an absent tree is not an error.

use crate::artifacts::ArtifactsDb;
use crate::constants::{ARTIFACTS_DB_FILE, ARTIFACT_STORE_DIR, CONTENT_STORE_DIR};
use crate::error::{Error, Result};
use crate::layout::OciLayout;
use crate::storage::BlobStore;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// Ephemeral directory owned by one invocation.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    released: AtomicBool,
}

/// Stores living inside a [`Workspace`].
pub struct Stores {
    /// Pulled image content.
    pub content: BlobStore,
    /// Artifacts produced by the builder.
    pub artifacts: OciLayout,
    /// Build records.
    pub db: ArtifactsDb,
}

impl Workspace {
    /// Creates a uniquely-named workspace under `root`.
    ///
    /// Free space below `min_free_bytes` is logged but does not fail the
    /// call; small images still fit.
    pub fn acquire(root: &Path, request_id: &str, min_free_bytes: u64) -> Result<Self> {
        match free_space(root) {
            Ok(free) => {
                info!("There are {} bytes of free space in {}", free, root.display());
                if free < min_free_bytes {
                    warn!(
                        "Free space in {} is only {} bytes, which is less than {} bytes",
                        root.display(),
                        free,
                        min_free_bytes
                    );
                }
            }
            Err(e) => warn!("Unable to determine free space in {}: {}", root.display(), e),
        }

        info!("Creating a directory to store images and SOCI artifacts");

        let name = format!("{}-{}", sanitize(request_id), uuid::Uuid::now_v7().simple());
        let path = root.join(name);

        fs::create_dir_all(root)
            .and_then(|_| fs::create_dir(&path))
            .map_err(|e| Error::WorkspaceCreateFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        debug!("Workspace created at {}", path.display());

        Ok(Self {
            path,
            released: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_dir(&self) -> PathBuf {
        self.path.join(CONTENT_STORE_DIR)
    }

    pub fn artifact_store_dir(&self) -> PathBuf {
        self.path.join(ARTIFACT_STORE_DIR)
    }

    pub fn artifacts_db_path(&self) -> PathBuf {
        self.path.join(ARTIFACTS_DB_FILE)
    }

    /// Initializes the content store, the OCI layout and the database path.
    pub fn open_stores(&self) -> Result<Stores> {
        Ok(Stores {
            content: BlobStore::with_path(self.content_dir())?,
            artifacts: OciLayout::init(self.artifact_store_dir())?,
            db: ArtifactsDb::open(self.artifacts_db_path()),
        })
    }

    /// Returns true once [`release`](Workspace::release) has run.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Removes the workspace tree.
    ///
    /// Every call removes whatever exists at the path, so content recreated
    /// by an in-flight call after an earlier release is still cleaned up.
    /// Returns true only for the first call. Removal failures are logged,
    /// never returned.
    pub fn release(&self) -> bool {
        let first = !self.released.swap(true, Ordering::AcqRel);
        if first {
            info!("Removing all files in {}", self.path.display());
        } else {
            debug!("Workspace {} released again", self.path.display());
        }

        match fs::remove_dir_all(&self.path) {
            Ok(()) => {
                if !first {
                    warn!("Removed content recreated in {} after release", self.path.display());
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Workspace {} already absent", self.path.display());
            }
            Err(e) => error!(error = %e, "Clean up error"),
        }
        first
    }
}

/// Bytes available to unprivileged users on the filesystem holding `path`.
pub fn free_space(path: &Path) -> io::Result<u64> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(io::Error::from)?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

/// Keeps request-id characters that are safe in a directory name.
fn sanitize(request_id: &str) -> String {
    let safe: String = request_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if safe.is_empty() {
        "invocation".to_string()
    } else {
        safe
    }
}
