//! # Content-Addressed Blob Storage
//!
//! Stores manifests, configs and layers by their digest inside the
//! invocation workspace.
//!
//! ## Storage Model
//!
//! Blobs are stored one directory per algorithm, which is also the `blobs/`
//! layout of an OCI image layout:
//!
//! ```text
//! <base>/
//! └── sha256/
//!     ├── abcd1234...  (blob content)
//!     └── cdef5678...  (blob content)
//! ```
//!
//! ## Digest Verification
//!
//! Every write path hashes the content with the digest's algorithm (SHA-256,
//! SHA-384 or SHA-512) and compares it with the declared digest before the
//! blob becomes visible. Large blobs are streamed to a
//! staging file first and verified with [`BlobStore::commit`], so a layer is
//! never held in memory.
//!
//! ## Path Traversal Protection
//!
//! Digests are validated before constructing paths:
//! - Algorithm must be `sha256`, `sha384`, or `sha512`
//! - Hash must contain only hexadecimal characters
//! - Invalid digests return paths that won't exist
//!
//! ## Atomic Writes
//!
//! Blobs are written to a uniquely-named temp file and renamed into place,
//! so readers never observe a partial blob.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Content-addressed blob store.
pub struct BlobStore {
    /// Base directory for blob storage.
    base_dir: PathBuf,
}

impl BlobStore {
    /// Creates a blob store at the specified path.
    pub fn with_path(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir).map_err(|e| Error::StorageInitFailed {
            path: base_dir.clone(),
            reason: e.to_string(),
        })?;

        debug!("Blob store initialized at: {}", base_dir.display());

        Ok(Self { base_dir })
    }

    /// Returns the base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Checks if a blob exists.
    pub fn has_blob(&self, digest: &str) -> bool {
        self.blob_path(digest).exists()
    }

    /// Gets a blob by digest.
    pub fn get_blob(&self, digest: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(digest);
        fs::read(&path).map_err(|_| Error::BlobNotFound {
            digest: digest.to_string(),
        })
    }

    /// Gets a blob path without reading it.
    ///
    /// # Security
    ///
    /// This function validates the digest format to prevent path traversal:
    /// - Algorithm must be sha256, sha384, or sha512
    /// - Hash must contain only hexadecimal characters
    pub fn blob_path(&self, digest: &str) -> PathBuf {
        let (algo, hash) = digest.split_once(':').unwrap_or(("sha256", digest));

        let safe_algo = match algo {
            "sha256" | "sha384" | "sha512" => algo,
            _ => {
                warn!("Invalid digest algorithm '{}', defaulting to sha256", algo);
                "sha256"
            }
        };

        let safe_hash: String = hash.chars().filter(|c| c.is_ascii_hexdigit()).collect();

        if safe_hash.len() != hash.len() {
            warn!(
                "Digest hash contained non-hex characters, sanitized: {} -> {}",
                hash, safe_hash
            );
        }

        if safe_hash.is_empty() {
            return self.base_dir.join("invalid").join("empty");
        }

        self.base_dir.join(safe_algo).join(&safe_hash)
    }

    /// Stores a blob after verifying its content matches the digest.
    pub fn put_blob(&self, digest: &str, data: &[u8]) -> Result<()> {
        let (algorithm, expected_hash) = DigestAlgorithm::split(digest)?;
        let (computed_hash, _) = algorithm.hash(&mut &data[..])?;
        if computed_hash != expected_hash {
            return Err(Error::DigestMismatch {
                expected: digest.to_string(),
                computed: format!("{}:{}", algorithm, computed_hash),
            });
        }

        let path = self.blob_path(digest);
        if path.exists() {
            debug!("Blob {} already exists", digest);
            return Ok(());
        }
        self.ensure_parent(&path)?;

        let temp_path = self.staging_path(digest);
        fs::write(&temp_path, data).map_err(|e| Error::StorageWriteFailed(e.to_string()))?;
        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::StorageWriteFailed(e.to_string())
        })?;

        debug!("Stored blob {} ({} bytes, verified)", digest, data.len());
        Ok(())
    }

    /// Returns a fresh staging path for streaming a blob before [`commit`].
    ///
    /// [`commit`]: BlobStore::commit
    pub fn staging_path(&self, digest: &str) -> PathBuf {
        let path = self.blob_path(digest);
        path.with_extension(format!("tmp.{}", uuid::Uuid::now_v7()))
    }

    /// Verifies a staged file against `digest` and moves it into place.
    ///
    /// The staging file is removed whether or not verification succeeds.
    pub fn commit(&self, digest: &str, staging: &Path) -> Result<u64> {
        let result = self.verify_and_rename(digest, staging);
        if result.is_err() {
            let _ = fs::remove_file(staging);
        }
        result
    }

    fn verify_and_rename(&self, digest: &str, staging: &Path) -> Result<u64> {
        let (algorithm, expected_hash) = DigestAlgorithm::split(digest)?;

        let mut file = fs::File::open(staging)?;
        let (computed_hash, size) = algorithm.hash(&mut file)?;

        if computed_hash != expected_hash {
            return Err(Error::DigestMismatch {
                expected: digest.to_string(),
                computed: format!("{}:{}", algorithm, computed_hash),
            });
        }

        let path = self.blob_path(digest);
        self.ensure_parent(&path)?;
        fs::rename(staging, &path).map_err(|e| Error::StorageWriteFailed(e.to_string()))?;

        debug!("Committed blob {} ({} bytes, verified)", digest, size);
        Ok(size)
    }

    /// Returns the total size of all blobs.
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0u64;
        Self::walk_dir(&self.base_dir, &mut |path| {
            if let Ok(meta) = fs::metadata(path)
                && meta.is_file()
            {
                total += meta.len();
            }
        })?;
        Ok(total)
    }

    fn ensure_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::StorageWriteFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Walks a directory recursively.
    fn walk_dir(dir: &Path, callback: &mut impl FnMut(&Path)) -> Result<()> {
        if !dir.exists() {
            return Ok(());
        }

        for entry in fs::read_dir(dir).map_err(|e| Error::StorageWriteFailed(e.to_string()))? {
            let entry = entry.map_err(|e| Error::StorageWriteFailed(e.to_string()))?;
            let path = entry.path();

            if path.is_dir() {
                Self::walk_dir(&path, callback)?;
            } else {
                callback(&path);
            }
        }

        Ok(())
    }
}

/// Hash algorithms blob content can be verified with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// Splits `<algorithm>:<hex>` into a verifiable algorithm and its hex part.
    pub fn split(digest: &str) -> Result<(Self, &str)> {
        let (algorithm, hash) = digest
            .split_once(':')
            .ok_or_else(|| Error::StorageWriteFailed(format!("malformed digest '{}'", digest)))?;
        let algorithm = match algorithm {
            "sha256" => Self::Sha256,
            "sha384" => Self::Sha384,
            "sha512" => Self::Sha512,
            _ => {
                return Err(Error::UnsupportedDigestAlgorithm {
                    digest: digest.to_string(),
                });
            }
        };
        Ok((algorithm, hash))
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Hashes everything `reader` yields, returning the hex hash and the
    /// byte count.
    pub fn hash(self, reader: &mut impl io::Read) -> Result<(String, u64)> {
        match self {
            Self::Sha256 => hash_with::<Sha256>(reader),
            Self::Sha384 => hash_with::<Sha384>(reader),
            Self::Sha512 => hash_with::<Sha512>(reader),
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn hash_with<D: Digest + io::Write>(reader: &mut impl io::Read) -> Result<(String, u64)> {
    let mut hasher = D::new();
    let size = io::copy(reader, &mut hasher)?;
    Ok((hex::encode(hasher.finalize()), size))
}
