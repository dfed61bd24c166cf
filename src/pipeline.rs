//! # Invocation Pipeline
//!
//! One [`Pipeline::handle`] call per trigger event. Stages run strictly in
//! order and the first terminal state wins:
//!
//! ```text
//!   validate ──► connect ──► idempotency ──► tag gate
//!                                               │
//!        ┌──────────────────────────────────────┘
//!        ▼
//!   acquire workspace ──► arm watchdog ──► open stores ──► pull ──► build ──► push
//!        │                                                                     │
//!        └──────────────── release workspace, disarm watchdog ◄────────────────┘
//! ```
//!
//! ## Failure Reporting
//!
//! A failing stage is logged exactly once, here, with its fixed message, and
//! the error is carried in the returned [`Outcome`]. The registry and builder
//! layers never log failures themselves.
//!
//! ## Resource Lifecycle
//!
//! Once a workspace is acquired, every exit path releases it and then
//! cancels the watchdog. If the watchdog fires first it releases the
//! workspace itself; the main path's release then removes anything the
//! in-flight call recreated.

use crate::builder::{BuildOptions, CommandIndexBuilder, ImageTarget, IndexBuilder};
use crate::config::Config;
use crate::context::{Invocation, RequestContext};
use crate::error::Error;
use crate::event::{ImageActionEvent, validate_event};
use crate::orchestrator::{BuildResult, IndexOrchestrator};
use crate::outcome::{Outcome, Skip, Stage};
use crate::platform::Platform;
use crate::registry::{Idempotency, OciConnector, RegistryConnector, RegistrySession};
use crate::watchdog::Watchdog;
use crate::workspace::Workspace;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};

/// Event handler wired to a registry connector and an index builder.
pub struct Pipeline {
    connector: Arc<dyn RegistryConnector>,
    builder: Arc<dyn IndexBuilder>,
    config: Config,
}

impl Pipeline {
    /// Creates the production pipeline: OCI registry access and the
    /// configured builder executable.
    pub fn new(config: Config) -> Self {
        let connector = Arc::new(OciConnector::new(config.credentials.clone()));
        let builder = Arc::new(CommandIndexBuilder::new(config.builder_program.clone()));
        Self::with_parts(config, connector, builder)
    }

    /// Creates a pipeline from explicit collaborators.
    pub fn with_parts(
        config: Config,
        connector: Arc<dyn RegistryConnector>,
        builder: Arc<dyn IndexBuilder>,
    ) -> Self {
        Self {
            connector,
            builder,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handles one trigger event.
    pub async fn handle(&self, event: &ImageActionEvent, invocation: Invocation) -> Outcome {
        let span = info_span!("invocation", request_id = %invocation.request_id);
        self.run(event, invocation).instrument(span).await
    }

    async fn run(&self, event: &ImageActionEvent, invocation: Invocation) -> Outcome {
        let ctx = match validate_event(event, invocation) {
            Ok(ctx) => ctx,
            Err(violations) => return fail(Stage::Validation, violations.into()),
        };

        let strategy = self.config.strategy;
        info!(
            repository = %ctx.repository(),
            digest = %ctx.digest(),
            tag = ctx.tag().unwrap_or_default(),
            version = %strategy,
            "Processing image push"
        );

        let session = match self.connector.connect(ctx.registry_url()).await {
            Ok(session) => session,
            Err(e) => return fail(Stage::RegistryInit, e),
        };

        match session
            .validate_idempotency(ctx.repository(), ctx.digest(), strategy)
            .await
        {
            Ok(Idempotency::Proceed) => {}
            Ok(Idempotency::AlreadyProcessed(reason)) => {
                info!(reason = %reason, "{}", Skip::AlreadyProcessed.message());
                return Skip::AlreadyProcessed.into();
            }
            // Unreadable or unsupported manifests are not retried.
            Err(e) => {
                warn!(error = %e, "{}", Skip::AlreadyProcessed.message());
                return Skip::AlreadyProcessed.into();
            }
        }

        let push_tag = match strategy.push_tag(&ctx) {
            Ok(tag) => tag,
            Err(skip) => {
                info!("{}", skip.message());
                return skip.into();
            }
        };

        let workspace = match Workspace::acquire(
            &self.config.work_root,
            ctx.request_id(),
            self.config.min_free_space,
        ) {
            Ok(workspace) => Arc::new(workspace),
            Err(e) => return fail(Stage::Workspace, e),
        };
        let watchdog = Watchdog::arm(ctx.deadline(), self.config.deadline_margin, workspace.clone());

        let outcome = self
            .process(&ctx, session.as_ref(), &workspace, push_tag.as_deref())
            .await;

        workspace.release();
        watchdog.disarm().await;
        outcome
    }

    /// Pull, build and push inside an acquired workspace.
    async fn process(
        &self,
        ctx: &RequestContext,
        session: &dyn RegistrySession,
        workspace: &Workspace,
        push_tag: Option<&str>,
    ) -> Outcome {
        let stores = match workspace.open_stores() {
            Ok(stores) => stores,
            Err(e) => return fail(Stage::StorageInit, e),
        };

        let descriptor = match session
            .pull(ctx.repository(), ctx.digest(), &stores.content)
            .await
        {
            Ok(descriptor) => descriptor,
            Err(e) => return fail(Stage::Pull, e),
        };
        info!(media_type = %descriptor.media_type, "Pulled image {}", ctx.image_name());

        let image = ImageTarget {
            name: ctx.image_name(),
            descriptor,
        };
        let options = BuildOptions {
            platform: Platform::detect(),
            build_tool_identifier: self.config.build_tool_identifier.clone(),
        };
        let orchestrator = IndexOrchestrator::new(self.builder.as_ref(), self.config.strategy, options);

        let built = match orchestrator.build(&image, &stores).await {
            Ok(BuildResult::Built(index)) => index,
            Ok(BuildResult::Empty) => {
                info!("{}", Skip::EmptyIndex.message());
                return Skip::EmptyIndex.into();
            }
            Err(e) => return fail(Stage::Build, e),
        };

        match session
            .push(&stores.artifacts, built.descriptor(), ctx.repository(), push_tag)
            .await
        {
            Ok(()) => {}
            Err(e @ Error::TagFailed { .. }) => return fail(Stage::Tag, e),
            Err(e) => return fail(Stage::Push, e),
        }

        info!(
            index_digest = %built.descriptor().digest,
            "{}",
            Outcome::Success.message()
        );
        Outcome::Success
    }
}

/// Logs a stage failure with its fixed message and wraps it.
fn fail(stage: Stage, error: Error) -> Outcome {
    error!(stage = ?stage, error = %error, "{}", stage.message());
    Outcome::failed(stage, error)
}
