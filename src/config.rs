//! Synthesis configuration
//!
//! Loaded from `stackweave.toml` in the working directory.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. CLI flags
//! 2. Environment variables (`STACKWEAVE_FORMAT`, `STACKWEAVE_MAX_DEPTH`, `STACKWEAVE_ISSUE_ORDER`)
//! 3. Config file
//! 4. Defaults

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::deferred::{DEFAULT_MAX_DEPTH, MAX_DEPTH_LIMIT};
use crate::error::{Result, StackError};

/// Order in which aggregated issues are reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueOrder {
    /// Tree traversal order (default)
    #[default]
    Declaration,
    /// Sorted by node path
    Path,
}

/// Template output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub issue_order: IssueOrder,

    /// Maximum nested resolution frames before a value is reported as runaway,
    /// between 1 and [`MAX_DEPTH_LIMIT`]
    pub max_depth: usize,

    pub format: OutputFormat,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            issue_order: IssueOrder::Declaration,
            max_depth: DEFAULT_MAX_DEPTH,
            format: OutputFormat::Json,
        }
    }
}

impl SynthConfig {
    pub const FILE_NAME: &'static str = "stackweave.toml";

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| StackError::Config {
            reason: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the resolver cannot honor
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_DEPTH_LIMIT).contains(&self.max_depth) {
            return Err(StackError::Config {
                reason: format!(
                    "max_depth must be between 1 and {}, got {}",
                    MAX_DEPTH_LIMIT, self.max_depth
                ),
            });
        }
        Ok(())
    }

    /// Load configuration from file
    ///
    /// Returns default config if file doesn't exist.
    /// Returns error if file exists but is malformed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| StackError::Config {
            reason: format!("Failed to read {}: {}", path.display(), e),
        })?;

        Self::from_toml(&content)
    }

    /// Load `stackweave.toml` from a directory
    pub fn discover(dir: &Path) -> Result<Self> {
        Self::load(&dir.join(Self::FILE_NAME))
    }

    /// Merge with process environment variables
    pub fn with_env(self) -> Self {
        self.with_env_from(|name| std::env::var(name).ok())
    }

    /// Merge with variables from `lookup`; unparsable values are ignored with a warning
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup("STACKWEAVE_FORMAT") {
            match raw.to_ascii_lowercase().as_str() {
                "json" => self.format = OutputFormat::Json,
                "yaml" => self.format = OutputFormat::Yaml,
                other => warn!(value = other, "ignoring STACKWEAVE_FORMAT"),
            }
        }

        if let Some(raw) = lookup("STACKWEAVE_MAX_DEPTH") {
            match raw.trim().parse::<usize>() {
                Ok(depth) if (1..=MAX_DEPTH_LIMIT).contains(&depth) => self.max_depth = depth,
                _ => warn!(value = %raw, "ignoring STACKWEAVE_MAX_DEPTH"),
            }
        }

        if let Some(raw) = lookup("STACKWEAVE_ISSUE_ORDER") {
            match raw.to_ascii_lowercase().as_str() {
                "declaration" => self.issue_order = IssueOrder::Declaration,
                "path" => self.issue_order = IssueOrder::Path,
                other => warn!(value = other, "ignoring STACKWEAVE_ISSUE_ORDER"),
            }
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = SynthConfig::default();
        assert_eq!(config.issue_order, IssueOrder::Declaration);
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(config.format, OutputFormat::Json);
    }

    #[test]
    fn parse_partial_toml() {
        let config = SynthConfig::from_toml("issue_order = \"path\"").unwrap();
        assert_eq!(config.issue_order, IssueOrder::Path);
        assert_eq!(config.format, OutputFormat::Json);
    }

    #[test]
    fn parse_full_toml() {
        let config = SynthConfig::from_toml(
            r#"
issue_order = "declaration"
max_depth = 32
format = "yaml"
"#,
        )
        .unwrap();
        assert_eq!(config.max_depth, 32);
        assert_eq!(config.format, OutputFormat::Yaml);
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = SynthConfig::from_toml("format = \"xml\"").unwrap_err();
        assert_eq!(err.code(), "SW-040");
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = SynthConfig::discover(dir.path()).unwrap();
        assert_eq!(config, SynthConfig::default());
    }

    #[test]
    fn discover_reads_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SynthConfig::FILE_NAME), "max_depth = 10\n").unwrap();
        let config = SynthConfig::discover(dir.path()).unwrap();
        assert_eq!(config.max_depth, 10);
    }

    #[test]
    fn env_overrides_file() {
        let config = SynthConfig::from_toml("format = \"json\"\nmax_depth = 10")
            .unwrap()
            .with_env_from(env(&[
                ("STACKWEAVE_FORMAT", "YAML"),
                ("STACKWEAVE_MAX_DEPTH", "64"),
                ("STACKWEAVE_ISSUE_ORDER", "path"),
            ]));
        assert_eq!(config.format, OutputFormat::Yaml);
        assert_eq!(config.max_depth, 64);
        assert_eq!(config.issue_order, IssueOrder::Path);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let config = SynthConfig::default().with_env_from(env(&[
            ("STACKWEAVE_FORMAT", "xml"),
            ("STACKWEAVE_MAX_DEPTH", "0"),
        ]));
        assert_eq!(config, SynthConfig::default());
    }

    #[test]
    fn max_depth_above_limit_is_rejected() {
        let err = SynthConfig::from_toml("max_depth = 1000000").unwrap_err();
        assert_eq!(err.code(), "SW-040");
        assert!(err.to_string().contains("max_depth"));

        let err = SynthConfig::from_toml("max_depth = 0").unwrap_err();
        assert_eq!(err.code(), "SW-040");

        let limit = format!("max_depth = {}", MAX_DEPTH_LIMIT);
        assert_eq!(SynthConfig::from_toml(&limit).unwrap().max_depth, MAX_DEPTH_LIMIT);
    }

    #[test]
    fn env_max_depth_above_limit_is_ignored() {
        let config = SynthConfig::default()
            .with_env_from(env(&[("STACKWEAVE_MAX_DEPTH", "1000000")]));
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
    }
}
