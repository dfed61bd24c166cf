//! # Invocation Outcomes
//!
//! Every invocation ends in exactly one [`Outcome`]. The reply handed back to
//! the host is a `(message, error)` pair, and the error half is the only
//! thing the host's retry policy looks at:
//!
//! ```text
//!   Outcome                         message                    error
//!   ─────────────────────────────   ────────────────────────   ─────
//!   Success                         SUCCESS_MESSAGE            none
//!   Skipped(skip)                   skip.message()             none
//!   Failed { Validation, .. }       VALIDATION_FAILED_MESSAGE  none
//!   Failed { stage, error }         stage.message()            error
//! ```
//!
//! Messages are fixed per cause. Alerting is built on them, so they never
//! carry request-specific text.

use crate::constants::{
    BUILD_FAILED_MESSAGE, DIRECTORY_CREATE_FAILED_MESSAGE, EMPTY_INDEX_SKIP_MESSAGE,
    MANIFEST_VALIDATION_SKIP_MESSAGE, PULL_FAILED_MESSAGE, PUSH_FAILED_MESSAGE,
    REGISTRY_INIT_FAILED_MESSAGE, STORAGE_INIT_FAILED_MESSAGE, SUCCESS_MESSAGE,
    TAG_FAILED_MESSAGE, UNTAGGED_CONVERSION_SKIP_MESSAGE, VALIDATION_FAILED_MESSAGE,
};
use crate::error::Error;

/// Pipeline stage a failure originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validation,
    RegistryInit,
    Workspace,
    StorageInit,
    Pull,
    Build,
    Tag,
    Push,
}

impl Stage {
    /// Fixed message logged and returned for a failure in this stage.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Validation => VALIDATION_FAILED_MESSAGE,
            Self::RegistryInit => REGISTRY_INIT_FAILED_MESSAGE,
            Self::Workspace => DIRECTORY_CREATE_FAILED_MESSAGE,
            Self::StorageInit => STORAGE_INIT_FAILED_MESSAGE,
            Self::Pull => PULL_FAILED_MESSAGE,
            Self::Build => BUILD_FAILED_MESSAGE,
            Self::Tag => TAG_FAILED_MESSAGE,
            Self::Push => PUSH_FAILED_MESSAGE,
        }
    }
}

/// Expected no-op terminations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// The digest needs no work (already indexed, or itself a SOCI artifact).
    AlreadyProcessed,
    /// Conversion was requested for an untagged push.
    UntaggedConversion,
    /// The builder produced no zTOCs.
    EmptyIndex,
}

impl Skip {
    pub fn message(&self) -> &'static str {
        match self {
            Self::AlreadyProcessed => MANIFEST_VALIDATION_SKIP_MESSAGE,
            Self::UntaggedConversion => UNTAGGED_CONVERSION_SKIP_MESSAGE,
            Self::EmptyIndex => EMPTY_INDEX_SKIP_MESSAGE,
        }
    }
}

/// Terminal state of one invocation.
#[derive(Debug)]
pub enum Outcome {
    Success,
    Skipped(Skip),
    Failed { stage: Stage, error: Error },
}

impl Outcome {
    pub fn failed(stage: Stage, error: Error) -> Self {
        Self::Failed { stage, error }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Success => SUCCESS_MESSAGE,
            Self::Skipped(skip) => skip.message(),
            Self::Failed { stage, .. } => stage.message(),
        }
    }

    /// Returns true if the host should retry the invocation.
    pub fn is_retryable(&self) -> bool {
        self.reply_error().is_some()
    }

    /// Splits the outcome into the host reply.
    ///
    /// Validation failures are never retried, so they reply without an
    /// error even though the invocation failed.
    pub fn into_reply(self) -> (&'static str, Option<Error>) {
        let message = self.message();
        match self {
            Self::Failed { error, .. } if error.is_retryable() => (message, Some(error)),
            _ => (message, None),
        }
    }

    fn reply_error(&self) -> Option<&Error> {
        match self {
            Self::Failed { error, .. } if error.is_retryable() => Some(error),
            _ => None,
        }
    }
}

impl From<Skip> for Outcome {
    fn from(skip: Skip) -> Self {
        Self::Skipped(skip)
    }
}
