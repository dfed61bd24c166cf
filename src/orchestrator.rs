//! # Index Build Orchestration
//!
//! Chooses between the two index formats and normalizes what the builder
//! produced into a single [`BuildResult`].
//!
//! | Strategy    | Builder call | Artifact                    | Push tag        |
//! |-------------|--------------|-----------------------------|-----------------|
//! | `Legacy`    | `build`      | SOCI index (one platform)   | none            |
//! | `Converted` | `convert`    | OCI image index + SOCI data | `<tag>-soci`    |
//!
//! ## Legacy Builds
//!
//! The artifacts database may hold several index records for the same image,
//! for example after a retried build. Records are ordered by creation time
//! and the newest is authoritative. A build that reports success without a
//! discoverable record is an internal-consistency error.
//!
//! ## Empty Indices
//!
//! When every layer is skipped or fails, the builder reports the empty-index
//! condition. That is not a failure: the result is [`BuildResult::Empty`] and
//! nothing is pushed.

use crate::builder::{BuildOptions, ImageTarget, IndexBuilder};
use crate::constants::CONVERTED_TAG_SUFFIX;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::oci::Descriptor;
use crate::outcome::Skip;
use crate::workspace::Stores;
use tracing::info;

/// Index format selected for the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildStrategy {
    /// `V1`: single-platform SOCI index referring to the image.
    #[default]
    Legacy,
    /// `V2`: multi-platform OCI index wrapping the image and its SOCI index.
    Converted,
}

impl BuildStrategy {
    /// Parses the configured version. Only `V2` selects conversion.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value {
            Some("V2") => Self::Converted,
            _ => Self::Legacy,
        }
    }

    /// Configuration value naming this strategy.
    pub fn version(&self) -> &'static str {
        match self {
            Self::Legacy => "V1",
            Self::Converted => "V2",
        }
    }

    /// Tag the built artifact is published under.
    ///
    /// Conversion needs a source tag; an untagged push is skipped before
    /// anything is built.
    pub fn push_tag(&self, ctx: &RequestContext) -> std::result::Result<Option<String>, Skip> {
        match self {
            Self::Legacy => Ok(None),
            Self::Converted => match ctx.tag() {
                Some(tag) if !tag.is_empty() => {
                    Ok(Some(format!("{}{}", tag, CONVERTED_TAG_SUFFIX)))
                }
                _ => Err(Skip::UntaggedConversion),
            },
        }
    }
}

impl std::fmt::Display for BuildStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.version())
    }
}

/// Artifact produced by a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltIndex {
    /// Newest SOCI index recorded for the image.
    Legacy {
        descriptor: Descriptor,
        /// Number of matching records found in the artifacts database.
        records: usize,
    },
    /// Converted OCI image index.
    Converted { descriptor: Descriptor },
}

impl BuiltIndex {
    /// Descriptor handed to the push step.
    pub fn descriptor(&self) -> &Descriptor {
        match self {
            Self::Legacy { descriptor, .. } | Self::Converted { descriptor } => descriptor,
        }
    }
}

/// Outcome of one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildResult {
    Built(BuiltIndex),
    /// No zTOC was produced; nothing to push.
    Empty,
}

/// Drives an [`IndexBuilder`] for the configured strategy.
pub struct IndexOrchestrator<'a> {
    builder: &'a dyn IndexBuilder,
    strategy: BuildStrategy,
    options: BuildOptions,
}

impl<'a> IndexOrchestrator<'a> {
    pub fn new(builder: &'a dyn IndexBuilder, strategy: BuildStrategy, options: BuildOptions) -> Self {
        Self {
            builder,
            strategy,
            options,
        }
    }

    pub fn strategy(&self) -> BuildStrategy {
        self.strategy
    }

    /// Builds the index for `image` into `stores`.
    pub async fn build(&self, image: &ImageTarget, stores: &Stores) -> Result<BuildResult> {
        info!("Building SOCI index");

        let built = match self.strategy {
            BuildStrategy::Legacy => self.build_legacy(image, stores).await,
            BuildStrategy::Converted => self.build_converted(image, stores).await,
        };

        match built {
            Ok(index) => Ok(BuildResult::Built(index)),
            Err(e) if e.is_empty_index() => Ok(BuildResult::Empty),
            Err(e) => Err(e),
        }
    }

    async fn build_legacy(&self, image: &ImageTarget, stores: &Stores) -> Result<BuiltIndex> {
        let generated = self.builder.build(image, stores, &self.options).await?;
        info!("Generated SOCI Index Digest: {}", generated.digest);

        let mut records = stores
            .db
            .index_records(&image.descriptor.digest, &self.options.platform.oci_platform())?;
        records.sort_by_key(|r| r.created_at);

        let count = records.len();
        let newest = records.pop().ok_or_else(|| Error::NoIndexRecords {
            image: image.name.clone(),
        })?;

        Ok(BuiltIndex::Legacy {
            descriptor: newest.descriptor(),
            records: count,
        })
    }

    async fn build_converted(&self, image: &ImageTarget, stores: &Stores) -> Result<BuiltIndex> {
        let descriptor = self.builder.convert(image, stores, &self.options).await?;
        info!("Generated OCI Index Digest: {}", descriptor.digest);
        Ok(BuiltIndex::Converted { descriptor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_from_setting() {
        assert_eq!(BuildStrategy::from_setting(Some("V2")), BuildStrategy::Converted);
        assert_eq!(BuildStrategy::from_setting(Some("V1")), BuildStrategy::Legacy);
        assert_eq!(BuildStrategy::from_setting(Some("v2")), BuildStrategy::Legacy);
        assert_eq!(BuildStrategy::from_setting(None), BuildStrategy::Legacy);
    }

    #[test]
    fn test_strategy_display() {
        assert_eq!(BuildStrategy::Legacy.to_string(), "V1");
        assert_eq!(BuildStrategy::Converted.to_string(), "V2");
    }
}
