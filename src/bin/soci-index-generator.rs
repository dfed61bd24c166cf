//! soci-index-generator - function host entry point
//!
//! Receives image-action events from the function runtime, runs the
//! pipeline and replies with the outcome message. Only retryable failures
//! are returned as errors.
//!
//! ## Environment
//!
//! Configuration is read once at startup (see `soci_index_builder::config`).
//! Log verbosity follows `RUST_LOG` and defaults to `info`. Records are
//! written as JSON lines so the host's log collector can index fields.

use chrono::{DateTime, Utc};
use lambda_runtime::{Error as HostError, LambdaEvent, run, service_fn};
use soci_index_builder::{Config, ImageActionEvent, Invocation, Pipeline};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), HostError> {
    init_tracing();

    let config = Config::from_env();
    tracing::info!(
        version = %config.strategy,
        work_root = %config.work_root.display(),
        builder = %config.builder_program.display(),
        "Starting SOCI index generator"
    );
    let pipeline = Pipeline::new(config);

    run(service_fn(|event: LambdaEvent<ImageActionEvent>| {
        handle(&pipeline, event)
    }))
    .await
}

async fn handle(pipeline: &Pipeline, event: LambdaEvent<ImageActionEvent>) -> Result<String, HostError> {
    let LambdaEvent { payload, context } = event;
    let invocation = Invocation::new(context.request_id, deadline(context.deadline)?);

    let (message, error) = pipeline.handle(&payload, invocation).await.into_reply();
    match error {
        Some(e) => Err(e.into()),
        None => Ok(message.to_string()),
    }
}

/// Converts the host deadline, in epoch milliseconds, to a timestamp.
fn deadline(epoch_millis: u64) -> Result<DateTime<Utc>, HostError> {
    i64::try_from(epoch_millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .ok_or_else(|| format!("invalid invocation deadline: {}", epoch_millis).into())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(false),
        )
        .init();
}
