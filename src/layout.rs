//! OCI image-layout artifact store.
//!
//! The builder writes zTOCs, SOCI indices and converted manifests here. The
//! push step reads them back by descriptor.
//!
//! ```text
//! store/
//! ├── oci-layout     {"imageLayoutVersion": "1.0.0"}
//! ├── index.json     top-level descriptors
//! └── blobs/sha256/  content
//! ```

use crate::constants::OCI_IMAGE_INDEX_MEDIA_TYPE;
use crate::error::{Error, Result};
use crate::oci::{Descriptor, Manifest};
use crate::storage::BlobStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const LAYOUT_FILE: &str = "oci-layout";
const INDEX_FILE: &str = "index.json";
const BLOBS_DIR: &str = "blobs";
const LAYOUT_VERSION: &str = "1.0.0";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutMarker {
    image_layout_version: String,
}

/// OCI image layout rooted at a directory.
pub struct OciLayout {
    root: PathBuf,
    blobs: BlobStore,
}

impl OciLayout {
    /// Opens the layout at `root`, creating its skeleton if missing.
    pub fn init(root: PathBuf) -> Result<Self> {
        let init_err = |e: &dyn std::fmt::Display| Error::StorageInitFailed {
            path: root.clone(),
            reason: e.to_string(),
        };

        fs::create_dir_all(&root).map_err(|e| init_err(&e))?;
        let blobs = BlobStore::with_path(root.join(BLOBS_DIR))?;

        let marker = root.join(LAYOUT_FILE);
        if !marker.exists() {
            let body = serde_json::to_vec(&LayoutMarker {
                image_layout_version: LAYOUT_VERSION.to_string(),
            })
            .map_err(|e| init_err(&e))?;
            fs::write(&marker, body).map_err(|e| init_err(&e))?;
        }

        let layout = Self { root, blobs };
        if !layout.index_path().exists() {
            layout.write_index(&Manifest {
                schema_version: 2,
                media_type: Some(OCI_IMAGE_INDEX_MEDIA_TYPE.to_string()),
                ..Default::default()
            })?;
        }

        debug!("OCI layout initialized at: {}", layout.root.display());
        Ok(layout)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Blob storage backing the layout.
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Returns true if the described content is stored locally.
    pub fn exists(&self, desc: &Descriptor) -> bool {
        self.blobs.has_blob(&desc.digest)
    }

    /// Reads the described content.
    pub fn fetch(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        self.blobs.get_blob(&desc.digest)
    }

    /// Stores `bytes` and returns their descriptor.
    pub fn put(&self, media_type: &str, bytes: &[u8]) -> Result<Descriptor> {
        let desc = Descriptor::for_content(media_type, bytes);
        self.blobs.put_blob(&desc.digest, bytes)?;
        Ok(desc)
    }

    /// Records `desc` in `index.json`, replacing an entry with the same digest.
    pub fn add_reference(&self, desc: &Descriptor) -> Result<()> {
        let mut index = self.read_index()?;
        index.manifests.retain(|m| m.digest != desc.digest);
        index.manifests.push(desc.clone());
        self.write_index(&index)
    }

    /// Top-level descriptors listed in `index.json`.
    pub fn references(&self) -> Result<Vec<Descriptor>> {
        Ok(self.read_index()?.manifests)
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn read_index(&self) -> Result<Manifest> {
        let bytes = fs::read(self.index_path())?;
        Manifest::parse(&bytes)
    }

    fn write_index(&self, index: &Manifest) -> Result<()> {
        let body = serde_json::to_vec(&IndexFile::from(index))?;
        fs::write(self.index_path(), body)?;
        Ok(())
    }
}

/// Serialized form of `index.json`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexFile<'a> {
    schema_version: u32,
    media_type: &'a str,
    manifests: &'a [Descriptor],
}

impl<'a> From<&'a Manifest> for IndexFile<'a> {
    fn from(index: &'a Manifest) -> Self {
        Self {
            schema_version: 2,
            media_type: OCI_IMAGE_INDEX_MEDIA_TYPE,
            manifests: &index.manifests,
        }
    }
}
