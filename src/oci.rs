//! OCI descriptor and manifest models.
//!
//! Only the fields the pipeline inspects are modelled. Manifests are kept as
//! the exact bytes fetched from (or pushed to) the registry; the parsed
//! [`Manifest`] is a read-only view used to walk references.

use crate::constants::{
    DOCKER_MANIFEST_LIST_MEDIA_TYPE, DOCKER_MANIFEST_MEDIA_TYPE, OCI_IMAGE_INDEX_MEDIA_TYPE,
    OCI_IMAGE_MANIFEST_MEDIA_TYPE, SOCI_INDEX_DIGEST_ANNOTATION, SOCI_INDEX_V1_ARTIFACT_TYPE,
    SOCI_INDEX_V2_ARTIFACT_TYPE,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Content descriptor: identity of a blob or manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    /// Describes `bytes` stored under `media_type`.
    pub fn for_content(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            digest: sha256_digest(bytes),
            size: bytes.len() as u64,
            artifact_type: None,
            platform: None,
            annotations: BTreeMap::new(),
        }
    }

    /// Returns true if this descriptor points at a manifest or index.
    pub fn is_manifest(&self) -> bool {
        is_manifest_media_type(&self.media_type)
    }
}

/// Platform of an index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSpec {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// Shape of a parsed manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// Single-platform image manifest (OCI or Docker).
    Image,
    /// Multi-platform index (OCI index or Docker manifest list).
    Index,
}

/// Parsed view over an image manifest or image index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub artifact_type: Option<String>,
    #[serde(default)]
    pub config: Option<Descriptor>,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    #[serde(default)]
    pub subject: Option<Descriptor>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Manifest {
    /// Parses manifest bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Media type declared in the body, or inferred from its shape.
    pub fn resolved_media_type(&self) -> &str {
        match self.media_type.as_deref() {
            Some(media_type) => media_type,
            None if !self.manifests.is_empty() => OCI_IMAGE_INDEX_MEDIA_TYPE,
            None => OCI_IMAGE_MANIFEST_MEDIA_TYPE,
        }
    }

    /// Classifies the manifest by media type.
    pub fn kind(&self, digest: &str) -> Result<ManifestKind> {
        match self.resolved_media_type() {
            OCI_IMAGE_MANIFEST_MEDIA_TYPE | DOCKER_MANIFEST_MEDIA_TYPE => Ok(ManifestKind::Image),
            OCI_IMAGE_INDEX_MEDIA_TYPE | DOCKER_MANIFEST_LIST_MEDIA_TYPE => {
                Ok(ManifestKind::Index)
            }
            other => Err(Error::UnsupportedMediaType {
                digest: digest.to_string(),
                media_type: other.to_string(),
            }),
        }
    }

    /// Descriptors this manifest references, excluding its subject.
    pub fn references(&self) -> impl Iterator<Item = &Descriptor> {
        self.config
            .iter()
            .chain(self.layers.iter())
            .chain(self.manifests.iter())
    }

    /// Returns true if the manifest is itself a SOCI index artifact.
    pub fn is_soci_index(&self) -> bool {
        let is_soci = |t: &str| t == SOCI_INDEX_V1_ARTIFACT_TYPE || t == SOCI_INDEX_V2_ARTIFACT_TYPE;
        self.artifact_type.as_deref().is_some_and(is_soci)
            || self
                .config
                .as_ref()
                .is_some_and(|c| is_soci(&c.media_type))
    }

    /// Returns true if the manifest, or any manifest it lists, was produced by
    /// SOCI conversion.
    pub fn is_soci_converted(&self) -> bool {
        self.annotations.contains_key(SOCI_INDEX_DIGEST_ANNOTATION)
            || self
                .manifests
                .iter()
                .any(|m| m.annotations.contains_key(SOCI_INDEX_DIGEST_ANNOTATION))
    }
}

/// Returns true for image manifest and image index media types.
pub fn is_manifest_media_type(media_type: &str) -> bool {
    matches!(
        media_type,
        OCI_IMAGE_MANIFEST_MEDIA_TYPE
            | OCI_IMAGE_INDEX_MEDIA_TYPE
            | DOCKER_MANIFEST_MEDIA_TYPE
            | DOCKER_MANIFEST_LIST_MEDIA_TYPE
    )
}

/// Computes the `sha256:<hex>` digest of `bytes`.
pub fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}
