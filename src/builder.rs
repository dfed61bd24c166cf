//! # External Index Builder
//!
//! zTOC generation and SOCI index encoding are done outside this crate. The
//! [`IndexBuilder`] trait is the boundary; [`CommandIndexBuilder`] drives a
//! builder executable over the workspace stores.
//!
//! ## Command Protocol
//!
//! ```text
//! <program> build|convert
//!     --content-store <dir>   pulled image content
//!     --oci-layout <dir>      where artifacts are written
//!     --artifacts-db <file>   where build records are appended (build only)
//!     --image <name>          repository@digest
//!     --digest <digest> --media-type <type> --size <bytes>
//!     --platform <os/arch>    (build only)
//!     --build-tool-identifier <id>
//! ```
//!
//! On success the program prints the produced descriptor as JSON on stdout.
//! On failure it exits non-zero with the reason on stderr. A reason equal to
//! [`EMPTY_INDEX_MESSAGE`] is reported as [`Error::EmptyIndex`].

use crate::constants::EMPTY_INDEX_MESSAGE;
use crate::error::{Error, Result};
use crate::oci::Descriptor;
use crate::platform::Platform;
use crate::workspace::Stores;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Pulled image handed to the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTarget {
    /// `repository@digest`.
    pub name: String,
    /// Descriptor of the pulled manifest or index.
    pub descriptor: Descriptor,
}

/// Options shared by both build operations.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Target platform of a legacy build.
    pub platform: Platform,
    /// Identifier recorded in every produced index.
    pub build_tool_identifier: String,
}

/// Index-building operations.
#[async_trait]
pub trait IndexBuilder: Send + Sync {
    /// Builds a single-platform SOCI index.
    ///
    /// The builder writes artifacts to `stores.artifacts` and appends a
    /// record per index to `stores.db`; the returned descriptor is
    /// informational.
    async fn build(
        &self,
        image: &ImageTarget,
        stores: &Stores,
        options: &BuildOptions,
    ) -> Result<Descriptor>;

    /// Converts the image into an OCI index carrying SOCI artifacts for every
    /// platform and returns the index descriptor.
    async fn convert(
        &self,
        image: &ImageTarget,
        stores: &Stores,
        options: &BuildOptions,
    ) -> Result<Descriptor>;
}

/// Builder backed by an external executable.
#[derive(Debug, Clone)]
pub struct CommandIndexBuilder {
    program: PathBuf,
}

#[derive(Clone, Copy)]
enum Operation {
    Build,
    Convert,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Convert => "convert",
        }
    }

    fn failure(self, reason: String) -> Error {
        match self {
            Self::Build => Error::BuildFailed(reason),
            Self::Convert => Error::ConvertFailed(reason),
        }
    }
}

impl CommandIndexBuilder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(
        &self,
        operation: Operation,
        image: &ImageTarget,
        stores: &Stores,
        options: &BuildOptions,
    ) -> Result<Descriptor> {
        let mut command = Command::new(&self.program);
        command
            .arg(operation.as_str())
            .arg("--content-store")
            .arg(stores.content.base_dir())
            .arg("--oci-layout")
            .arg(stores.artifacts.root())
            .arg("--image")
            .arg(&image.name)
            .arg("--digest")
            .arg(&image.descriptor.digest)
            .arg("--media-type")
            .arg(&image.descriptor.media_type)
            .arg("--size")
            .arg(image.descriptor.size.to_string())
            .arg("--build-tool-identifier")
            .arg(&options.build_tool_identifier);

        if let Operation::Build = operation {
            command
                .arg("--artifacts-db")
                .arg(stores.db.path())
                .arg("--platform")
                .arg(options.platform.oci_platform());
        }

        debug!("Running builder: {:?}", command);

        let output = command
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                operation.failure(format!("failed to run {}: {}", self.program.display(), e))
            })?;

        if !output.status.success() {
            return Err(classify_failure(
                operation,
                &String::from_utf8_lossy(&output.stderr),
            ));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            operation.failure(format!("unreadable builder output: {}", e))
        })
    }
}

#[async_trait]
impl IndexBuilder for CommandIndexBuilder {
    async fn build(
        &self,
        image: &ImageTarget,
        stores: &Stores,
        options: &BuildOptions,
    ) -> Result<Descriptor> {
        self.run(Operation::Build, image, stores, options).await
    }

    async fn convert(
        &self,
        image: &ImageTarget,
        stores: &Stores,
        options: &BuildOptions,
    ) -> Result<Descriptor> {
        self.run(Operation::Convert, image, stores, options).await
    }
}

/// Maps builder stderr to an error, recognising the empty-index reason.
fn classify_failure(operation: Operation, stderr: &str) -> Error {
    let reason = stderr.trim();
    let last_line = reason.lines().last().unwrap_or_default().trim();
    if reason == EMPTY_INDEX_MESSAGE || last_line == EMPTY_INDEX_MESSAGE {
        Error::EmptyIndex
    } else {
        operation.failure(reason.to_string())
    }
}
