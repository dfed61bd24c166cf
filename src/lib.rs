//! # soci-index-builder
//!
//! **Event-driven SOCI index generation for container registries**
//!
//! A push of a container image to a registry emits an image-action event.
//! This crate turns that event into a published Seekable OCI (SOCI) index
//! for the image, so runtimes can lazily load it.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          Pipeline::handle                            │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ImageActionEvent ──► validate_event ──► RequestContext              │
//! │                                               │                      │
//! │  ┌────────────────────────────────────────────┼───────────────────┐  │
//! │  │                RegistrySession             │                   │  │
//! │  │   validate_idempotency │ pull │ push (+ tag)                   │  │
//! │  └────────────────────────────────────────────┼───────────────────┘  │
//! │                                               │                      │
//! │  ┌──────────────────────┐   ┌─────────────────┴──────────────────┐   │
//! │  │      Workspace       │   │        IndexOrchestrator           │   │
//! │  │  content │ layout │  │◄──│  Legacy (V1) │ Converted (V2)      │   │
//! │  │  artifacts.db        │   │       IndexBuilder (external)      │   │
//! │  └──────────┬───────────┘   └────────────────────────────────────┘   │
//! │             │                                                        │
//! │  ┌──────────┴───────────┐                                            │
//! │  │       Watchdog       │  fires DEADLINE_MARGIN before the deadline │
//! │  └──────────────────────┘                                            │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Outcome: Success │ Skipped(Skip) │ Failed { stage, error }          │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Outcomes and Retries
//!
//! The invoking host retries an invocation only when it returns an error.
//! Expected no-op conditions (already indexed, untagged conversion request,
//! empty index) and malformed events therefore reply with a message and no
//! error. See [`outcome`].
//!
//! # Build Strategies
//!
//! | Version | Strategy                         | Published as            |
//! |---------|----------------------------------|-------------------------|
//! | `V1`    | [`BuildStrategy::Legacy`]        | referrer of the image   |
//! | `V2`    | [`BuildStrategy::Converted`]     | `<tag>-soci`            |
//!
//! # Example
//!
//! ```rust,ignore
//! use soci_index_builder::{Config, Invocation, Pipeline};
//!
//! let pipeline = Pipeline::new(Config::from_env());
//! let outcome = pipeline.handle(&event, Invocation::new(request_id, deadline)).await;
//! let (message, error) = outcome.into_reply();
//! ```

pub mod artifacts;
pub mod builder;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod event;
pub mod layout;
pub mod oci;
pub mod orchestrator;
pub mod outcome;
pub mod pipeline;
pub mod platform;
pub mod registry;
pub mod storage;
pub mod watchdog;
pub mod workspace;

// Re-exports
pub use artifacts::{ArtifactKind, ArtifactRecord, ArtifactsDb};
pub use builder::{BuildOptions, CommandIndexBuilder, ImageTarget, IndexBuilder};
pub use config::Config;
pub use constants::*;
pub use context::{Invocation, RequestContext};
pub use error::{Error, Result};
pub use event::{ImageActionDetail, ImageActionEvent, Violation, validate_event};
pub use layout::OciLayout;
pub use oci::{Descriptor, Manifest, ManifestKind};
pub use orchestrator::{BuildResult, BuildStrategy, BuiltIndex, IndexOrchestrator};
pub use outcome::{Outcome, Skip, Stage};
pub use pipeline::Pipeline;
pub use platform::{Arch, Os, Platform};
pub use registry::{
    Credentials, Idempotency, OciConnector, RegistryConnector, RegistrySession,
    check_idempotency, push_order,
};
pub use storage::{BlobStore, DigestAlgorithm};
pub use watchdog::{Watchdog, WatchdogOutcome};
pub use workspace::{Stores, Workspace};
