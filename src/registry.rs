//! # Registry Session
//!
//! Everything the pipeline does against the remote registry goes through
//! [`RegistrySession`]:
//!
//! | Operation                  | Purpose                                       |
//! |----------------------------|-----------------------------------------------|
//! | `validate_idempotency`     | skip digests that need no (more) work         |
//! | `pull`                     | manifest + config + layers into the content store |
//! | `push`                     | built artifacts, then the optional tag        |
//!
//! Sessions are created by a [`RegistryConnector`], one per invocation. The
//! production implementation, [`OciConnector`], speaks the OCI distribution
//! protocol through `oci-distribution`.
//!
//! ## Idempotency
//!
//! Pushing an index or a converted image produces another push event for the
//! same repository. The check stops that loop and avoids rebuilding for
//! replayed events. A digest needs no work when it is:
//!
//! - itself a SOCI index artifact
//! - a manifest or index produced by SOCI conversion
//! - a legacy request for an image that already has a SOCI index referrer
//!
//! Legacy builds only accept single-platform image manifests; anything else
//! is reported as [`Error::UnsupportedMediaType`].
//!
//! ## Pull
//!
//! Blobs are streamed to a staging file and verified against their digest
//! before they become visible (see [`BlobStore::commit`]). For an image index
//! every child manifest and its content is pulled.
//!
//! ## Push
//!
//! The graph below the built descriptor is walked children-first. Only
//! content present in the local artifact store is uploaded; anything else
//! (the original image's layers, its manifest) already lives in the registry.
//!
//! [`BlobStore::commit`]: crate::storage::BlobStore::commit

use crate::constants::{
    ACCEPTED_MANIFEST_MEDIA_TYPES, REGISTRY_REQUEST_TIMEOUT, SOCI_INDEX_V1_ARTIFACT_TYPE,
};
use crate::error::{Error, Result};
use crate::layout::OciLayout;
use crate::oci::{Descriptor, Manifest, ManifestKind};
use crate::orchestrator::BuildStrategy;
use crate::storage::{BlobStore, DigestAlgorithm};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use std::collections::HashSet;
use std::future::Future;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Result of the pre-build idempotency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Idempotency {
    /// No index exists yet; build one.
    Proceed,
    /// The digest needs no work, for the given reason.
    AlreadyProcessed(String),
}

/// Decides whether `digest` still needs an index for `strategy`.
///
/// `has_referrer` reports whether the registry already lists a SOCI index
/// referring to the digest; it only matters for legacy image manifests.
/// Digests whose content cannot be verified, and legacy requests for an
/// image index, are errors.
pub fn check_idempotency(
    manifest: &Manifest,
    digest: &str,
    strategy: BuildStrategy,
    has_referrer: bool,
) -> Result<Idempotency> {
    DigestAlgorithm::split(digest)?;

    if manifest.is_soci_index() {
        return Ok(Idempotency::AlreadyProcessed(format!(
            "{} is a SOCI index artifact",
            digest
        )));
    }
    if manifest.is_soci_converted() {
        return Ok(Idempotency::AlreadyProcessed(format!(
            "{} was produced by SOCI conversion",
            digest
        )));
    }

    match (manifest.kind(digest)?, strategy) {
        (ManifestKind::Index, BuildStrategy::Legacy) => Err(Error::UnsupportedMediaType {
            digest: digest.to_string(),
            media_type: manifest.resolved_media_type().to_string(),
        }),
        (ManifestKind::Image, BuildStrategy::Legacy) if has_referrer => {
            Ok(Idempotency::AlreadyProcessed(format!(
                "a SOCI index already exists for {}",
                digest
            )))
        }
        _ => Ok(Idempotency::Proceed),
    }
}

/// Returns true when [`check_idempotency`] would consult the referrer list.
fn needs_referrer_lookup(manifest: &Manifest, digest: &str, strategy: BuildStrategy) -> bool {
    strategy == BuildStrategy::Legacy
        && !manifest.is_soci_index()
        && !manifest.is_soci_converted()
        && matches!(manifest.kind(digest), Ok(ManifestKind::Image))
}

/// Creates authenticated registry sessions.
#[async_trait]
pub trait RegistryConnector: Send + Sync {
    /// Establishes a session with the registry at `registry_url`.
    async fn connect(&self, registry_url: &str) -> Result<Box<dyn RegistrySession>>;
}

/// Registry operations used by one invocation.
#[async_trait]
pub trait RegistrySession: Send + Sync {
    /// Checks whether the digest still needs an index for `strategy`.
    async fn validate_idempotency(
        &self,
        repository: &str,
        digest: &str,
        strategy: BuildStrategy,
    ) -> Result<Idempotency>;

    /// Pulls `repository@digest` into `store`, returning the image descriptor.
    async fn pull(&self, repository: &str, digest: &str, store: &BlobStore) -> Result<Descriptor>;

    /// Pushes `descriptor` and its local children from `store`, then tags it
    /// when `tag` is given.
    async fn push(
        &self,
        store: &OciLayout,
        descriptor: &Descriptor,
        repository: &str,
        tag: Option<&str>,
    ) -> Result<()>;
}

// =============================================================================
// Credentials
// =============================================================================

/// Registry credentials.
#[derive(Clone, Default)]
pub enum Credentials {
    /// No authentication.
    #[default]
    Anonymous,
    /// Username and password.
    Basic { username: String, password: String },
    /// Base64 `username:password`, as issued by the registry's
    /// authorization-token API.
    Token(String),
}

impl Credentials {
    /// Resolves the credentials into an `oci-distribution` auth value.
    pub fn registry_auth(&self, registry: &str) -> Result<RegistryAuth> {
        match self {
            Self::Anonymous => Ok(RegistryAuth::Anonymous),
            Self::Basic { username, password } => {
                Ok(RegistryAuth::Basic(username.clone(), password.clone()))
            }
            Self::Token(token) => {
                let auth_failed = |reason: String| Error::RegistryAuthFailed {
                    registry: registry.to_string(),
                    reason,
                };
                let decoded = STANDARD
                    .decode(token.trim())
                    .map_err(|e| auth_failed(format!("malformed authorization token: {}", e)))?;
                let decoded = String::from_utf8(decoded)
                    .map_err(|_| auth_failed("authorization token is not UTF-8".to_string()))?;
                let (username, password) = decoded.split_once(':').ok_or_else(|| {
                    auth_failed("authorization token is not 'user:password'".to_string())
                })?;
                Ok(RegistryAuth::Basic(username.to_string(), password.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::Basic { username, .. } => write!(f, "Basic({}, <redacted>)", username),
            Self::Token(_) => write!(f, "Token(<redacted>)"),
        }
    }
}

// =============================================================================
// OCI Distribution Implementation
// =============================================================================

/// Connector producing [`OciSession`]s.
#[derive(Debug, Clone, Default)]
pub struct OciConnector {
    credentials: Credentials,
}

impl OciConnector {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl RegistryConnector for OciConnector {
    async fn connect(&self, registry_url: &str) -> Result<Box<dyn RegistrySession>> {
        let auth = self.credentials.registry_auth(registry_url)?;
        let client = Client::new(ClientConfig {
            protocol: ClientProtocol::Https,
            ..Default::default()
        });

        info!("Registry session initialized for {}", registry_url);

        Ok(Box::new(OciSession {
            client,
            auth,
            registry: registry_url.to_string(),
        }))
    }
}

/// Registry session backed by `oci-distribution`.
pub struct OciSession {
    client: Client,
    auth: RegistryAuth,
    registry: String,
}

impl OciSession {
    fn digest_reference(&self, repository: &str, digest: &str) -> Reference {
        Reference::with_digest(
            self.registry.clone(),
            repository.to_string(),
            digest.to_string(),
        )
    }

    fn tag_reference(&self, repository: &str, tag: &str) -> Reference {
        Reference::with_tag(self.registry.clone(), repository.to_string(), tag.to_string())
    }

    /// Fetches raw manifest bytes, verifying them against a digest reference.
    async fn fetch_manifest(&self, reference: &Reference) -> Result<(Vec<u8>, String)> {
        let (bytes, digest) = bounded(
            format!("fetch manifest {}", reference),
            self.client
                .pull_manifest_raw(reference, &self.auth, &ACCEPTED_MANIFEST_MEDIA_TYPES),
        )
        .await?
        .map_err(|e| Error::ManifestFetchFailed {
            reference: reference.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(expected) = reference.digest()
            && expected != digest
        {
            return Err(Error::DigestMismatch {
                expected: expected.to_string(),
                computed: digest,
            });
        }
        Ok((bytes, digest))
    }

    /// Returns true if the referrers fallback tag lists a SOCI index.
    async fn has_soci_referrer(&self, repository: &str, digest: &str) -> bool {
        let reference = self.tag_reference(repository, &digest.replacen(':', "-", 1));
        match self.fetch_manifest(&reference).await {
            Ok((bytes, _)) => Manifest::parse(&bytes).is_ok_and(|referrers| {
                referrers
                    .manifests
                    .iter()
                    .any(|m| m.artifact_type.as_deref() == Some(SOCI_INDEX_V1_ARTIFACT_TYPE))
            }),
            Err(e) => {
                debug!("No referrers found for {}: {}", digest, e);
                false
            }
        }
    }

    /// Pulls one image manifest's config and layers.
    async fn pull_image_content(
        &self,
        reference: &Reference,
        manifest: &Manifest,
        store: &BlobStore,
    ) -> Result<()> {
        for desc in manifest.references() {
            self.pull_blob(reference, desc, store).await?;
        }
        Ok(())
    }

    /// Streams one blob into `store`.
    async fn pull_blob(
        &self,
        reference: &Reference,
        desc: &Descriptor,
        store: &BlobStore,
    ) -> Result<()> {
        if store.has_blob(&desc.digest) {
            debug!("Blob {} already present", desc.digest);
            return Ok(());
        }

        debug!("Pulling blob: {} ({} bytes)", desc.digest, desc.size);

        let staging = store.staging_path(&desc.digest);
        if let Some(parent) = staging.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let layer = OciDescriptor {
            media_type: desc.media_type.clone(),
            digest: desc.digest.clone(),
            size: desc.size as i64,
            urls: None,
            annotations: None,
        };

        let pulled = async {
            let mut file = tokio::fs::File::create(&staging).await?;
            bounded(
                format!("pull blob {}", desc.digest),
                self.client.pull_blob(reference, &layer, &mut file),
            )
            .await?
            .map_err(|e| Error::ImagePullFailed {
                reference: reference.to_string(),
                reason: format!("blob {}: {}", desc.digest, e),
            })?;
            file.flush().await?;
            Ok::<_, Error>(())
        }
        .await;

        if let Err(e) = pulled {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e);
        }

        store.commit(&desc.digest, &staging)?;
        Ok(())
    }

    /// Uploads one manifest or blob from the local store.
    async fn push_one(&self, store: &OciLayout, repository: &str, desc: &Descriptor) -> Result<()> {
        let bytes = store.fetch(desc)?;
        let reference = self.digest_reference(repository, &desc.digest);

        if desc.is_manifest() {
            self.push_manifest_bytes(&reference, bytes, &desc.media_type)
                .await
                .map_err(|reason| Error::ManifestPushFailed {
                    reference: reference.to_string(),
                    reason,
                })?;
        } else {
            bounded(
                format!("push blob {}", desc.digest),
                self.client.push_blob(&reference, &bytes, &desc.digest),
            )
            .await?
            .map_err(|e| Error::BlobPushFailed {
                digest: desc.digest.clone(),
                reason: e.to_string(),
            })?;
        }

        debug!("Pushed {} ({})", desc.digest, desc.media_type);
        Ok(())
    }

    async fn push_manifest_bytes(
        &self,
        reference: &Reference,
        bytes: Vec<u8>,
        media_type: &str,
    ) -> std::result::Result<(), String> {
        let content_type = http::HeaderValue::from_str(media_type).map_err(|e| e.to_string())?;
        bounded(
            format!("push manifest {}", reference),
            self.client.push_manifest_raw(reference, bytes, content_type),
        )
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[async_trait]
impl RegistrySession for OciSession {
    async fn validate_idempotency(
        &self,
        repository: &str,
        digest: &str,
        strategy: BuildStrategy,
    ) -> Result<Idempotency> {
        let reference = self.digest_reference(repository, digest);
        let (bytes, _) = self.fetch_manifest(&reference).await?;
        let manifest = Manifest::parse(&bytes)?;

        let has_referrer = needs_referrer_lookup(&manifest, digest, strategy)
            && self.has_soci_referrer(repository, digest).await;
        check_idempotency(&manifest, digest, strategy, has_referrer)
    }

    async fn pull(&self, repository: &str, digest: &str, store: &BlobStore) -> Result<Descriptor> {
        let reference = self.digest_reference(repository, digest);
        info!("Pulling image: {}", reference);

        let (bytes, _) = self.fetch_manifest(&reference).await?;
        let manifest = Manifest::parse(&bytes)?;
        store.put_blob(digest, &bytes)?;

        match manifest.kind(digest)? {
            ManifestKind::Image => self.pull_image_content(&reference, &manifest, store).await?,
            ManifestKind::Index => {
                for child in &manifest.manifests {
                    let child_ref = self.digest_reference(repository, &child.digest);
                    let (child_bytes, _) = self.fetch_manifest(&child_ref).await?;
                    let child_manifest = Manifest::parse(&child_bytes)?;
                    store.put_blob(&child.digest, &child_bytes)?;
                    if child_manifest.kind(&child.digest)? == ManifestKind::Image {
                        self.pull_image_content(&child_ref, &child_manifest, store)
                            .await?;
                    }
                }
            }
        }

        info!(
            "Pulled {} ({} bytes in content store)",
            reference,
            store.total_size()?
        );

        Ok(Descriptor {
            media_type: manifest.resolved_media_type().to_string(),
            digest: digest.to_string(),
            size: bytes.len() as u64,
            artifact_type: None,
            platform: None,
            annotations: Default::default(),
        })
    }

    async fn push(
        &self,
        store: &OciLayout,
        descriptor: &Descriptor,
        repository: &str,
        tag: Option<&str>,
    ) -> Result<()> {
        let root = self.digest_reference(repository, &descriptor.digest);
        bounded(
            format!("authenticate push to {}", root),
            self.client.auth(&root, &self.auth, RegistryOperation::Push),
        )
        .await?
        .map_err(|e| Error::RegistryAuthFailed {
            registry: self.registry.clone(),
            reason: e.to_string(),
        })?;

        let plan = push_order(store, descriptor)?;
        info!("Pushing {} artifacts for {}", plan.len(), root);
        for desc in &plan {
            self.push_one(store, repository, desc).await?;
        }

        if let Some(tag) = tag {
            let tagged = self.tag_reference(repository, tag);
            let bytes = store.fetch(descriptor)?;
            self.push_manifest_bytes(&tagged, bytes, &descriptor.media_type)
                .await
                .map_err(|reason| Error::TagFailed {
                    reference: tagged.to_string(),
                    reason,
                })?;
            info!("Tagged {} as {}", descriptor.digest, tagged);
        }

        Ok(())
    }
}

/// Orders the locally stored graph below `root` children-first.
///
/// Descriptors absent from `store` are skipped: they already exist in the
/// registry. The root itself must be local.
pub fn push_order(store: &OciLayout, root: &Descriptor) -> Result<Vec<Descriptor>> {
    if !store.exists(root) {
        return Err(Error::BlobNotFound {
            digest: root.digest.clone(),
        });
    }

    let mut order = Vec::new();
    let mut seen = HashSet::new();
    visit(store, root, &mut seen, &mut order)?;
    Ok(order)
}

fn visit(
    store: &OciLayout,
    desc: &Descriptor,
    seen: &mut HashSet<String>,
    order: &mut Vec<Descriptor>,
) -> Result<()> {
    if !seen.insert(desc.digest.clone()) || !store.exists(desc) {
        return Ok(());
    }

    if desc.is_manifest() {
        let manifest = Manifest::parse(&store.fetch(desc)?)?;
        for child in manifest.references() {
            visit(store, child, seen, order)?;
        }
    }

    order.push(desc.clone());
    Ok(())
}

/// Bounds a registry call by [`REGISTRY_REQUEST_TIMEOUT`].
async fn bounded<T>(operation: String, call: impl Future<Output = T>) -> Result<T> {
    tokio::time::timeout(REGISTRY_REQUEST_TIMEOUT, call)
        .await
        .map_err(|_| Error::Timeout {
            operation,
            duration: REGISTRY_REQUEST_TIMEOUT,
        })
}
