//! Request-scoped invocation state.
//!
//! A [`RequestContext`] is built once by [`crate::event::validate_event`] and
//! is read-only afterwards. Later stages borrow it; none can change what an
//! earlier stage established.

use crate::constants::{CN_REGION_PREFIX, REGISTRY_DOMAIN, REGISTRY_DOMAIN_CN};
use chrono::{DateTime, Utc};

/// Host-provided facts about the current invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Host request identifier, used to name the workspace.
    pub request_id: String,
    /// Absolute time at which the host kills the invocation.
    pub deadline: DateTime<Utc>,
}

impl Invocation {
    pub fn new(request_id: impl Into<String>, deadline: DateTime<Utc>) -> Self {
        Self {
            request_id: request_id.into(),
            deadline,
        }
    }
}

/// Validated fields of a push event plus the invocation they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    invocation: Invocation,
    registry_url: String,
    repository: String,
    digest: String,
    tag: Option<String>,
}

impl RequestContext {
    pub(crate) fn new(
        invocation: Invocation,
        account: &str,
        region: &str,
        repository: String,
        digest: String,
        tag: Option<String>,
    ) -> Self {
        Self {
            invocation,
            registry_url: registry_url(account, region),
            repository,
            digest,
            tag,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.invocation.request_id
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.invocation.deadline
    }

    /// Registry host, e.g. `123456789012.dkr.ecr.us-east-1.amazonaws.com`.
    pub fn registry_url(&self) -> &str {
        &self.registry_url
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Source tag of the push, `None` for untagged pushes.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// `<repository>@<digest>`, the name the builder records the image under.
    pub fn image_name(&self) -> String {
        format!("{}@{}", self.repository, self.digest)
    }
}

/// Derives the registry host for an account and region.
///
/// Regions whose name starts with `cn` live in the China partition and use
/// its domain suffix.
pub fn registry_url(account: &str, region: &str) -> String {
    let domain = if region.starts_with(CN_REGION_PREFIX) {
        REGISTRY_DOMAIN_CN
    } else {
        REGISTRY_DOMAIN
    };
    format!("{}.dkr.ecr.{}{}", account, region, domain)
}
