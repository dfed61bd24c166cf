//! # Registry Push Events
//!
//! Decodes and validates the notification emitted when an image is pushed to
//! the registry. Validation produces the [`RequestContext`] consumed by the
//! rest of the pipeline.
//!
//! ## Payload
//!
//! ```json
//! {
//!   "source": "aws.ecr",
//!   "account": "123456789012",
//!   "detail-type": "ECR Image Action",
//!   "region": "us-west-2",
//!   "detail": {
//!     "action-type": "PUSH",
//!     "result": "SUCCESS",
//!     "repository-name": "team/app",
//!     "image-digest": "sha256:…",
//!     "image-tag": "latest"
//!   }
//! }
//! ```
//!
//! Missing fields decode as empty strings so that they surface as
//! [`Violation`]s rather than as decode failures.
//!
//! ## Rules
//!
//! Every rule is evaluated; violations are collected in rule order and the
//! first one is the error reported for the invocation. An empty tag is
//! accepted and means the push was untagged.

use crate::constants::{
    ACCOUNT_ID_PATTERN, EVENT_ACTION_TYPE, EVENT_DETAIL_TYPE, EVENT_RESULT, EVENT_SOURCE,
    IMAGE_DIGEST_PATTERN, IMAGE_TAG_PATTERN, REPOSITORY_NAME_PATTERN,
};
use crate::context::{Invocation, RequestContext};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Notification that an image action happened in a registry repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ImageActionEvent {
    /// Event provider; must be [`EVENT_SOURCE`].
    pub source: String,
    /// Registry owner account.
    pub account: String,
    /// Event kind; must be [`EVENT_DETAIL_TYPE`].
    pub detail_type: String,
    /// Region hosting the registry.
    pub region: String,
    /// Action details.
    pub detail: ImageActionDetail,
}

/// Action-specific part of an [`ImageActionEvent`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ImageActionDetail {
    pub action_type: String,
    pub result: String,
    pub repository_name: String,
    pub image_digest: String,
    pub image_tag: String,
}

/// A single failed validation rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("the event's 'source' must be '{}'", EVENT_SOURCE)]
    Source,

    #[error("the event's 'account' must not be empty")]
    AccountEmpty,

    #[error("the event's 'detail-type' must be '{}'", EVENT_DETAIL_TYPE)]
    DetailType,

    #[error("the event's 'detail.action-type' must be '{}'", EVENT_ACTION_TYPE)]
    ActionType,

    #[error("the event's 'detail.result' must be '{}'", EVENT_RESULT)]
    ActionResult,

    #[error("the event's 'detail.repository-name' must not be empty")]
    RepositoryNameEmpty,

    #[error("the event's 'detail.image-digest' must not be empty")]
    ImageDigestEmpty,

    #[error("the event's 'account' must be a valid AWS account ID")]
    AccountId,

    #[error("the event's 'detail.repository-name' must be a valid repository name")]
    RepositoryName,

    #[error("the event's 'detail.image-digest' must be a valid image digest")]
    ImageDigest,

    #[error("the event's 'detail.image-tag' must be empty or a valid image tag")]
    ImageTag,

    /// A validation pattern failed to compile.
    #[error("invalid validation pattern '{pattern}': {reason}")]
    Pattern {
        pattern: &'static str,
        reason: String,
    },
}

/// Validates an event and builds the request context for the invocation.
///
/// Returns every violation found, in rule order, when the event is rejected.
/// Accepted values are carried into the context verbatim.
pub fn validate_event(
    event: &ImageActionEvent,
    invocation: Invocation,
) -> Result<RequestContext, Vec<Violation>> {
    let mut violations = Vec::new();
    let detail = &event.detail;

    if event.source != EVENT_SOURCE {
        violations.push(Violation::Source);
    }
    if event.account.is_empty() {
        violations.push(Violation::AccountEmpty);
    }
    if event.detail_type != EVENT_DETAIL_TYPE {
        violations.push(Violation::DetailType);
    }
    if detail.action_type != EVENT_ACTION_TYPE {
        violations.push(Violation::ActionType);
    }
    if detail.result != EVENT_RESULT {
        violations.push(Violation::ActionResult);
    }
    if detail.repository_name.is_empty() {
        violations.push(Violation::RepositoryNameEmpty);
    }
    if detail.image_digest.is_empty() {
        violations.push(Violation::ImageDigestEmpty);
    }

    if !matches_pattern(ACCOUNT_ID_PATTERN, &event.account, &mut violations) {
        violations.push(Violation::AccountId);
    }

    let repository = matches_pattern(
        REPOSITORY_NAME_PATTERN,
        &detail.repository_name,
        &mut violations,
    )
    .then(|| detail.repository_name.clone());
    if repository.is_none() {
        violations.push(Violation::RepositoryName);
    }

    let digest = matches_pattern(IMAGE_DIGEST_PATTERN, &detail.image_digest, &mut violations)
        .then(|| detail.image_digest.clone());
    if digest.is_none() {
        violations.push(Violation::ImageDigest);
    }

    let mut tag = None;
    if !detail.image_tag.is_empty() {
        if matches_pattern(IMAGE_TAG_PATTERN, &detail.image_tag, &mut violations) {
            tag = Some(detail.image_tag.clone());
        } else {
            violations.push(Violation::ImageTag);
        }
    }

    match (repository, digest) {
        (Some(repository), Some(digest)) if violations.is_empty() => Ok(RequestContext::new(
            invocation,
            &event.account,
            &event.region,
            repository,
            digest,
            tag,
        )),
        _ => Err(violations),
    }
}

/// Evaluates `pattern` against `value`, recording compile failures.
fn matches_pattern(pattern: &'static str, value: &str, violations: &mut Vec<Violation>) -> bool {
    match Regex::new(pattern) {
        Ok(re) => re.is_match(value),
        Err(e) => {
            violations.push(Violation::Pattern {
                pattern,
                reason: e.to_string(),
            });
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_kebab_case_payload() {
        let json = r#"{
            "source": "aws.ecr",
            "account": "123456789012",
            "detail-type": "ECR Image Action",
            "region": "us-east-1",
            "detail": {
                "action-type": "PUSH",
                "result": "SUCCESS",
                "repository-name": "app",
                "image-digest": "sha256:0123456789abcdef0123456789abcdef",
                "image-tag": "v1"
            }
        }"#;

        let event: ImageActionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.detail_type, "ECR Image Action");
        assert_eq!(event.detail.repository_name, "app");
        assert_eq!(event.detail.image_tag, "v1");
    }

    #[test]
    fn test_missing_fields_decode_empty() {
        let event: ImageActionEvent = serde_json::from_str(r#"{"source":"aws.ecr"}"#).unwrap();
        assert!(event.account.is_empty());
        assert!(event.detail.image_tag.is_empty());
    }

    #[test]
    fn test_patterns_compile() {
        for pattern in [
            ACCOUNT_ID_PATTERN,
            REPOSITORY_NAME_PATTERN,
            IMAGE_DIGEST_PATTERN,
            IMAGE_TAG_PATTERN,
        ] {
            let mut violations = Vec::new();
            matches_pattern(pattern, "x", &mut violations);
            assert!(violations.is_empty(), "pattern {} should compile", pattern);
        }
    }
}
