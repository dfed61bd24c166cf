//! Process configuration read from the environment.
//!
//! | Variable                     | Default                            |
//! |------------------------------|------------------------------------|
//! | `soci_index_version`         | `V1`                               |
//! | `SOCI_WORK_ROOT`             | `/tmp`                             |
//! | `SOCI_BUILDER_PATH`          | `soci-builder`                     |
//! | `SOCI_BUILD_TOOL_IDENTIFIER` | `AWS SOCI Index Builder Cfn v0.2`  |
//! | `REGISTRY_AUTH_TOKEN`        | unset (base64 `user:password`)     |
//! | `REGISTRY_USERNAME`          | unset                              |
//! | `REGISTRY_PASSWORD`          | unset                              |
//!
//! Configuration is read once at startup and is fixed for the lifetime of
//! the process.

use crate::constants::{
    DEADLINE_MARGIN, DEFAULT_BUILD_TOOL_IDENTIFIER, DEFAULT_BUILDER_PROGRAM, DEFAULT_WORK_ROOT,
    INDEX_VERSION_ENV, MIN_FREE_SPACE_BYTES,
};
use crate::orchestrator::BuildStrategy;
use crate::registry::Credentials;
use std::path::PathBuf;
use std::time::Duration;

pub const WORK_ROOT_ENV: &str = "SOCI_WORK_ROOT";
pub const BUILDER_PATH_ENV: &str = "SOCI_BUILDER_PATH";
pub const BUILD_TOOL_IDENTIFIER_ENV: &str = "SOCI_BUILD_TOOL_IDENTIFIER";
pub const REGISTRY_AUTH_TOKEN_ENV: &str = "REGISTRY_AUTH_TOKEN";
pub const REGISTRY_USERNAME_ENV: &str = "REGISTRY_USERNAME";
pub const REGISTRY_PASSWORD_ENV: &str = "REGISTRY_PASSWORD";

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Which index format to build.
    pub strategy: BuildStrategy,
    /// Ephemeral root under which workspaces are created.
    pub work_root: PathBuf,
    /// Free space below which a warning is logged.
    pub min_free_space: u64,
    /// Margin before the host deadline at which the watchdog fires.
    pub deadline_margin: Duration,
    /// External builder executable.
    pub builder_program: PathBuf,
    /// Identifier recorded in built indices.
    pub build_tool_identifier: String,
    /// Registry credentials.
    pub credentials: Credentials,
}

impl Config {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, which returns a variable's value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let credentials = match (
            non_empty(REGISTRY_AUTH_TOKEN_ENV),
            non_empty(REGISTRY_USERNAME_ENV),
            non_empty(REGISTRY_PASSWORD_ENV),
        ) {
            (Some(token), _, _) => Credentials::Token(token),
            (None, Some(username), Some(password)) => Credentials::Basic { username, password },
            _ => Credentials::Anonymous,
        };

        Self {
            strategy: BuildStrategy::from_setting(lookup(INDEX_VERSION_ENV).as_deref()),
            work_root: non_empty(WORK_ROOT_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_ROOT)),
            min_free_space: MIN_FREE_SPACE_BYTES,
            deadline_margin: DEADLINE_MARGIN,
            builder_program: non_empty(BUILDER_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILDER_PROGRAM)),
            build_tool_identifier: non_empty(BUILD_TOOL_IDENTIFIER_ENV)
                .unwrap_or_else(|| DEFAULT_BUILD_TOOL_IDENTIFIER.to_string()),
            credentials,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.strategy, BuildStrategy::Legacy);
        assert_eq!(config.work_root, PathBuf::from("/tmp"));
        assert_eq!(config.deadline_margin, Duration::from_secs(10));
        assert!(matches!(config.credentials, Credentials::Anonymous));
    }

    #[test]
    fn test_lookup_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("soci_index_version", "V2"),
            ("SOCI_WORK_ROOT", "/scratch"),
            ("REGISTRY_USERNAME", "AWS"),
            ("REGISTRY_PASSWORD", "secret"),
        ]);
        let config = Config::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.strategy, BuildStrategy::Converted);
        assert_eq!(config.work_root, PathBuf::from("/scratch"));
        assert!(matches!(config.credentials, Credentials::Basic { .. }));
    }
}
