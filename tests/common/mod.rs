//! Shared fixtures: events, invocations and in-memory collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use soci_index_builder::{
    ArtifactKind, ArtifactRecord, BlobStore, BuildOptions, BuildStrategy, Config, Descriptor,
    Error, Idempotency, ImageActionDetail, ImageActionEvent, ImageTarget, IndexBuilder,
    Invocation, OCI_IMAGE_INDEX_MEDIA_TYPE, OCI_IMAGE_MANIFEST_MEDIA_TYPE, OciLayout,
    RegistryConnector, RegistrySession, Result, SOCI_INDEX_V1_ARTIFACT_TYPE, Stores,
};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ACCOUNT: &str = "123456789012";
pub const REGION: &str = "us-east-1";
pub const REPOSITORY: &str = "myrepo";

/// `sha256:` followed by 64 hex characters.
pub fn image_digest() -> String {
    format!("sha256:{}", "a".repeat(64))
}

pub fn push_event(tag: &str) -> ImageActionEvent {
    ImageActionEvent {
        source: "aws.ecr".to_string(),
        account: ACCOUNT.to_string(),
        detail_type: "ECR Image Action".to_string(),
        region: REGION.to_string(),
        detail: ImageActionDetail {
            action_type: "PUSH".to_string(),
            result: "SUCCESS".to_string(),
            repository_name: REPOSITORY.to_string(),
            image_digest: image_digest(),
            image_tag: tag.to_string(),
        },
    }
}

/// Invocation with a comfortable deadline.
pub fn invocation(request_id: &str) -> Invocation {
    Invocation::new(request_id, Utc::now() + ChronoDuration::minutes(15))
}

/// Invocation whose deadline is already inside the default margin.
pub fn expiring_invocation(request_id: &str) -> Invocation {
    Invocation::new(request_id, Utc::now() + ChronoDuration::seconds(5))
}

/// Config rooted in `work_root` with no free-space warning.
pub fn test_config(work_root: &Path, strategy: BuildStrategy) -> Config {
    Config {
        strategy,
        work_root: work_root.to_path_buf(),
        min_free_space: 0,
        ..Config::default()
    }
}

// =============================================================================
// Fake Registry
// =============================================================================

/// What the fake registry saw and how it should answer.
#[derive(Debug, Default)]
pub struct RegistryLog {
    pub connects: usize,
    pub idempotency_checks: usize,
    pub pulls: usize,
    pub pushes: usize,
    pub pushed: Vec<Descriptor>,
    pub tags: Vec<Option<String>>,
    pub registry_urls: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub enum IdempotencyAnswer {
    #[default]
    Proceed,
    AlreadyProcessed,
    Unsupported,
}

#[derive(Debug, Clone, Default)]
pub struct RegistryBehavior {
    pub idempotency: IdempotencyAnswer,
    pub fail_connect: bool,
    pub fail_pull: bool,
    pub fail_push: bool,
    pub fail_tag: bool,
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    pub log: Arc<Mutex<RegistryLog>>,
    pub behavior: RegistryBehavior,
}

impl FakeConnector {
    pub fn new(behavior: RegistryBehavior) -> Self {
        Self {
            log: Arc::default(),
            behavior,
        }
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, RegistryLog> {
        self.log.lock().unwrap()
    }

    /// Total pull, push and idempotency calls.
    pub fn registry_calls(&self) -> usize {
        let log = self.log();
        log.connects + log.idempotency_checks + log.pulls + log.pushes
    }
}

#[async_trait]
impl RegistryConnector for FakeConnector {
    async fn connect(&self, registry_url: &str) -> Result<Box<dyn RegistrySession>> {
        {
            let mut log = self.log.lock().unwrap();
            log.connects += 1;
            log.registry_urls.push(registry_url.to_string());
        }
        if self.behavior.fail_connect {
            return Err(Error::RegistryAuthFailed {
                registry: registry_url.to_string(),
                reason: "no credentials".to_string(),
            });
        }
        Ok(Box::new(FakeSession {
            log: self.log.clone(),
            behavior: self.behavior.clone(),
        }))
    }
}

pub struct FakeSession {
    log: Arc<Mutex<RegistryLog>>,
    behavior: RegistryBehavior,
}

#[async_trait]
impl RegistrySession for FakeSession {
    async fn validate_idempotency(
        &self,
        _repository: &str,
        digest: &str,
        _strategy: BuildStrategy,
    ) -> Result<Idempotency> {
        self.log.lock().unwrap().idempotency_checks += 1;
        match self.behavior.idempotency {
            IdempotencyAnswer::Proceed => Ok(Idempotency::Proceed),
            IdempotencyAnswer::AlreadyProcessed => Ok(Idempotency::AlreadyProcessed(format!(
                "a SOCI index already exists for {}",
                digest
            ))),
            IdempotencyAnswer::Unsupported => Err(Error::UnsupportedMediaType {
                digest: digest.to_string(),
                media_type: "application/vnd.unknown".to_string(),
            }),
        }
    }

    async fn pull(&self, repository: &str, digest: &str, store: &BlobStore) -> Result<Descriptor> {
        self.log.lock().unwrap().pulls += 1;
        if self.behavior.fail_pull {
            return Err(Error::ImagePullFailed {
                reference: format!("{}@{}", repository, digest),
                reason: "connection reset".to_string(),
            });
        }
        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_IMAGE_MANIFEST_MEDIA_TYPE,
            "layers": [],
        });
        let bytes = serde_json::to_vec(&manifest)?;
        let desc = Descriptor::for_content(OCI_IMAGE_MANIFEST_MEDIA_TYPE, &bytes);
        store.put_blob(&desc.digest, &bytes)?;
        Ok(desc)
    }

    async fn push(
        &self,
        store: &OciLayout,
        descriptor: &Descriptor,
        repository: &str,
        tag: Option<&str>,
    ) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.pushes += 1;
        if self.behavior.fail_push {
            return Err(Error::BlobPushFailed {
                digest: descriptor.digest.clone(),
                reason: "denied".to_string(),
            });
        }
        if !store.exists(descriptor) {
            return Err(Error::BlobNotFound {
                digest: descriptor.digest.clone(),
            });
        }
        log.pushed.push(descriptor.clone());
        if self.behavior.fail_tag && tag.is_some() {
            return Err(Error::TagFailed {
                reference: format!("{}:{}", repository, tag.unwrap_or_default()),
                reason: "tag immutable".to_string(),
            });
        }
        log.tags.push(tag.map(str::to_string));
        Ok(())
    }
}

// =============================================================================
// Fake Builder
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderMode {
    /// Writes this many index records, oldest first.
    Records(usize),
    /// Reports the empty-index condition.
    Empty,
    /// Fails outright.
    Fail,
    /// Sleeps, then leaves a partial layer behind and fails, like a pull or
    /// build still running when the watchdog fires.
    Stall(Duration),
}

impl Default for BuilderMode {
    fn default() -> Self {
        Self::Records(1)
    }
}

#[derive(Debug, Default)]
pub struct BuilderLog {
    pub builds: usize,
    pub converts: usize,
    /// Index descriptors written by `build`, oldest first.
    pub written: Vec<Descriptor>,
}

#[derive(Clone, Default)]
pub struct FakeBuilder {
    pub mode: BuilderMode,
    pub log: Arc<Mutex<BuilderLog>>,
}

impl FakeBuilder {
    pub fn new(mode: BuilderMode) -> Self {
        Self {
            mode,
            log: Arc::default(),
        }
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, BuilderLog> {
        self.log.lock().unwrap()
    }

    fn check_mode(&self) -> Result<()> {
        match self.mode {
            BuilderMode::Empty => Err(Error::EmptyIndex),
            BuilderMode::Fail => Err(Error::BuildFailed("layer decompression failed".into())),
            BuilderMode::Records(_) | BuilderMode::Stall(_) => Ok(()),
        }
    }
}

#[async_trait]
impl IndexBuilder for FakeBuilder {
    async fn build(
        &self,
        image: &ImageTarget,
        stores: &Stores,
        options: &BuildOptions,
    ) -> Result<Descriptor> {
        self.log.lock().unwrap().builds += 1;
        if let BuilderMode::Stall(delay) = self.mode {
            return stall(delay, image, stores).await;
        }
        self.check_mode()?;

        let BuilderMode::Records(count) = self.mode else {
            unreachable!()
        };
        let base = Utc::now();
        let mut last = None;
        for i in 0..count {
            let index = serde_json::json!({
                "schemaVersion": 2,
                "mediaType": OCI_IMAGE_MANIFEST_MEDIA_TYPE,
                "artifactType": SOCI_INDEX_V1_ARTIFACT_TYPE,
                "annotations": { "build": i.to_string() },
                "layers": [],
            });
            let desc = stores
                .artifacts
                .put(OCI_IMAGE_MANIFEST_MEDIA_TYPE, &serde_json::to_vec(&index)?)?;
            stores.db.append(&ArtifactRecord {
                kind: ArtifactKind::SociIndex,
                digest: desc.digest.clone(),
                media_type: desc.media_type.clone(),
                size: desc.size,
                image_digest: image.descriptor.digest.clone(),
                platform: options.platform.oci_platform(),
                created_at: base + ChronoDuration::seconds(i as i64),
            })?;
            self.log.lock().unwrap().written.push(desc.clone());
            last = Some(desc);
        }

        // A build that writes no records still reports a descriptor.
        Ok(last.unwrap_or_else(|| Descriptor::for_content(OCI_IMAGE_MANIFEST_MEDIA_TYPE, b"{}")))
    }

    async fn convert(
        &self,
        image: &ImageTarget,
        stores: &Stores,
        _options: &BuildOptions,
    ) -> Result<Descriptor> {
        self.log.lock().unwrap().converts += 1;
        if let BuilderMode::Stall(delay) = self.mode {
            return stall(delay, image, stores).await;
        }
        self.check_mode()?;

        let index = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_IMAGE_INDEX_MEDIA_TYPE,
            "manifests": [image.descriptor],
        });
        let desc = stores
            .artifacts
            .put(OCI_IMAGE_INDEX_MEDIA_TYPE, &serde_json::to_vec(&index)?)?;
        stores.artifacts.add_reference(&desc)?;
        Ok(desc)
    }
}

/// Writes 1 KiB to a fresh staging file after `delay`, recreating any
/// directories removed in the meantime.
async fn stall(delay: Duration, image: &ImageTarget, stores: &Stores) -> Result<Descriptor> {
    tokio::time::sleep(delay).await;
    let staging = stores.content.staging_path(&image.descriptor.digest);
    if let Some(parent) = staging.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&staging, vec![0u8; 1024])?;
    Err(Error::BuildFailed("interrupted".to_string()))
}

// =============================================================================
// Log Capture
// =============================================================================

/// Collects formatted log records written while its guard is installed.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Installs a subscriber writing into this capture for the current thread.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn contains(&self, text: &str) -> bool {
        self.contents().contains(text)
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
