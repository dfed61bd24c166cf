//! # SOCI Index Generator Constants
//!
//! Defines the thresholds, timeouts, store names, media types and outcome
//! messages used across the invocation pipeline. These constants are the
//! **single source of truth** for values that other systems observe.
//!
//! ## Message Stability
//!
//! The `*_MESSAGE` constants are returned to the invoking host and written to
//! logs verbatim. Alerting and dashboards match on these strings, so they must
//! not change between releases.
//!
//! ## Cross-References
//!
//! - [`crate::event`]: Uses the fixed provenance values
//! - [`crate::workspace`]: Uses the free-space threshold and store names
//! - [`crate::watchdog`]: Uses the deadline margin
//! - [`crate::registry`]: Uses media types and timeouts
//! - [`crate::outcome`]: Uses the outcome messages

use std::time::Duration;

// =============================================================================
// Event Provenance
// =============================================================================

/// Required `source` of an inbound event.
pub const EVENT_SOURCE: &str = "aws.ecr";

/// Required `detail-type` of an inbound event.
pub const EVENT_DETAIL_TYPE: &str = "ECR Image Action";

/// Required `detail.action-type` of an inbound event.
pub const EVENT_ACTION_TYPE: &str = "PUSH";

/// Required `detail.result` of an inbound event.
pub const EVENT_RESULT: &str = "SUCCESS";

/// Account ID grammar: exactly twelve digits.
pub const ACCOUNT_ID_PATTERN: &str = r"^[0-9]{12}$";

/// Repository name grammar: lowercase segments joined by `/`.
pub const REPOSITORY_NAME_PATTERN: &str =
    r"^(?:[a-z0-9]+(?:[._-][a-z0-9]+)*/)*[a-z0-9]+(?:[._-][a-z0-9]+)*$";

/// Image digest grammar: `<algorithm>:<hex>` with at least 32 hex characters.
pub const IMAGE_DIGEST_PATTERN: &str =
    r"^[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[A-Fa-f0-9]{32,}$";

/// Image tag grammar, bounded to 128 characters.
pub const IMAGE_TAG_PATTERN: &str = r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$";

// =============================================================================
// Registry Addressing
// =============================================================================

/// Registry domain suffix for commercial regions.
pub const REGISTRY_DOMAIN: &str = ".amazonaws.com";

/// Registry domain suffix for China-partition regions.
pub const REGISTRY_DOMAIN_CN: &str = ".amazonaws.com.cn";

/// Region-name prefix selecting [`REGISTRY_DOMAIN_CN`].
pub const CN_REGION_PREFIX: &str = "cn";

/// Suffix appended to the source tag when publishing a converted image.
pub const CONVERTED_TAG_SUFFIX: &str = "-soci";

// =============================================================================
// Workspace
// =============================================================================

/// Default ephemeral root under which workspaces are created.
pub const DEFAULT_WORK_ROOT: &str = "/tmp";

/// Minimum free space on the ephemeral root (6 GB).
///
/// **Rationale**: Images up to 6 GB are supported. Falling below this value
/// is logged as a warning; the invocation still proceeds because most images
/// are far smaller.
pub const MIN_FREE_SPACE_BYTES: u64 = 6_000_000_000;

/// Directory holding pulled manifests, configs and layers.
pub const CONTENT_STORE_DIR: &str = "content";

/// Directory holding the OCI image layout written by the builder.
pub const ARTIFACT_STORE_DIR: &str = "store";

/// File name of the artifacts metadata database.
pub const ARTIFACTS_DB_FILE: &str = "artifacts.db";

// =============================================================================
// Timeouts
// =============================================================================

/// Margin before the host deadline at which the watchdog fires.
///
/// **Rationale**: Leaves time for any in-flight write to fail on its own
/// once the workspace has been removed, rather than being torn down by the
/// host mid-write.
pub const DEADLINE_MARGIN: Duration = Duration::from_secs(10);

/// Timeout for a single registry request (manifest or blob).
///
/// **Rationale**: Layers of multi-gigabyte images can take minutes to stream.
/// The watchdog still bounds the whole invocation.
pub const REGISTRY_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

// =============================================================================
// Build
// =============================================================================

/// Environment variable selecting the build strategy.
pub const INDEX_VERSION_ENV: &str = "soci_index_version";

/// Identifier recorded by the builder in every index it produces.
pub const DEFAULT_BUILD_TOOL_IDENTIFIER: &str = "AWS SOCI Index Builder Cfn v0.2";

/// Default external builder executable.
pub const DEFAULT_BUILDER_PROGRAM: &str = "soci-builder";

/// Message of the builder's empty-index error.
///
/// Builders that predate the exported error kind only report this text, so
/// it is matched exactly in addition to the typed variant.
pub const EMPTY_INDEX_MESSAGE: &str =
    "no ztocs created, all layers either skipped or produced errors";

// =============================================================================
// Media Types
// =============================================================================

/// OCI image manifest media type.
pub const OCI_IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// OCI image index media type.
pub const OCI_IMAGE_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// Docker schema 2 manifest media type.
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v2+json";

/// Docker manifest list media type.
pub const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Artifact type of a V1 SOCI index.
pub const SOCI_INDEX_V1_ARTIFACT_TYPE: &str = "application/vnd.amazon.soci.index.v1+json";

/// Artifact type of a V2 SOCI index.
pub const SOCI_INDEX_V2_ARTIFACT_TYPE: &str = "application/vnd.amazon.soci.index.v2+json";

/// Annotation placed on SOCI-enabled manifests produced by conversion.
pub const SOCI_INDEX_DIGEST_ANNOTATION: &str = "com.amazon.soci.index-digest";

/// Manifest media types accepted when fetching an image.
pub const ACCEPTED_MANIFEST_MEDIA_TYPES: [&str; 4] = [
    OCI_IMAGE_MANIFEST_MEDIA_TYPE,
    OCI_IMAGE_INDEX_MEDIA_TYPE,
    DOCKER_MANIFEST_MEDIA_TYPE,
    DOCKER_MANIFEST_LIST_MEDIA_TYPE,
];

// =============================================================================
// Outcome Messages
// =============================================================================

pub const VALIDATION_FAILED_MESSAGE: &str = "ECRImageActionEvent validation error";
pub const REGISTRY_INIT_FAILED_MESSAGE: &str = "Remote registry initialization error";
pub const MANIFEST_VALIDATION_SKIP_MESSAGE: &str =
    "Exited early due to manifest validation error";
pub const UNTAGGED_CONVERSION_SKIP_MESSAGE: &str =
    "Skipped SOCI index generation for V2 as image has no tag";
pub const DIRECTORY_CREATE_FAILED_MESSAGE: &str = "Directory create error";
pub const STORAGE_INIT_FAILED_MESSAGE: &str = "OCI storage initialization error";
pub const PULL_FAILED_MESSAGE: &str = "Image pull error";
pub const BUILD_FAILED_MESSAGE: &str = "SOCI index build error";
pub const TAG_FAILED_MESSAGE: &str = "SOCI V2 OCI Image tag error";
pub const PUSH_FAILED_MESSAGE: &str = "SOCI index push error";
pub const EMPTY_INDEX_SKIP_MESSAGE: &str =
    "Skipping pushing SOCI index as it does not contain any zTOCs";
pub const SUCCESS_MESSAGE: &str = "Successfully built and pushed SOCI index";
pub const TIMEOUT_MESSAGE: &str = "Invocation timeout error";
