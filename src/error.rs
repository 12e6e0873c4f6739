//! Error types with fix suggestions
//!
//! Error code ranges:
//! - SW-010-019: Declaration errors (references, identifiers, tree shape)
//! - SW-020-029: Lifecycle errors
//! - SW-030-039: Placement errors
//! - SW-040-049: Configuration errors
//! - SW-050-059: Manifest errors
//! - SW-090-099: Synthesis and IO errors

use thiserror::Error;

use crate::report::ValidationReport;

pub type Result<T> = std::result::Result<T, StackError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum StackError {
    // ─────────────────────────────────────────────────────────────
    // Declaration errors: fail fast, these are caller bugs
    // ─────────────────────────────────────────────────────────────
    #[error("[SW-010] Output '{resource}.{key}' is already registered")]
    DuplicateReference { resource: String, key: String },

    #[error("[SW-011] Invalid identifier '{id}'")]
    InvalidIdentifier { id: String },

    #[error("[SW-012] Node '{parent}' already has a child named '{id}'")]
    DuplicateChild { parent: String, id: String },

    #[error("[SW-013] Node handle #{index} does not belong to this tree")]
    UnknownNode { index: usize },

    #[error("[SW-014] Top-level construct '{id}' would share the root's path")]
    RootPathCollision { id: String },

    #[error("[SW-020] Tree has already been synthesized")]
    AlreadySynthesized,

    #[error("[SW-030] Malformed placement: {details}")]
    MalformedConstraint { details: String },

    #[error("[SW-040] Configuration error: {reason}")]
    Config { reason: String },

    #[error("[SW-050] Manifest error: {details}")]
    Manifest { details: String },

    // ─────────────────────────────────────────────────────────────
    // Synthesis: aggregated report of everything wrong with the tree
    // ─────────────────────────────────────────────────────────────
    #[error("[SW-090] Synthesis found {} problem(s):\n{report}", .report.len())]
    Validation { report: ValidationReport },

    #[error("[SW-091] YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("[SW-092] JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("[SW-093] IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StackError {
    /// Get the error code (e.g., "SW-010")
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateReference { .. } => "SW-010",
            Self::InvalidIdentifier { .. } => "SW-011",
            Self::DuplicateChild { .. } => "SW-012",
            Self::UnknownNode { .. } => "SW-013",
            Self::RootPathCollision { .. } => "SW-014",
            Self::AlreadySynthesized => "SW-020",
            Self::MalformedConstraint { .. } => "SW-030",
            Self::Config { .. } => "SW-040",
            Self::Manifest { .. } => "SW-050",
            Self::Validation { .. } => "SW-090",
            Self::Yaml(_) => "SW-091",
            Self::Json(_) => "SW-092",
            Self::Io(_) => "SW-093",
        }
    }

    /// The aggregated report, if this is a synthesis failure
    pub fn report(&self) -> Option<&ValidationReport> {
        match self {
            Self::Validation { report } => Some(report),
            _ => None,
        }
    }
}

impl FixSuggestion for StackError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            StackError::DuplicateReference { .. } => {
                Some("Each resource output key can be exposed only once")
            }
            StackError::InvalidIdentifier { .. } => Some(
                "Identifiers must start with a letter and contain only letters, digits, '-' or '_'",
            ),
            StackError::DuplicateChild { .. } => Some("Use unique ids among siblings"),
            StackError::UnknownNode { .. } => {
                Some("Pass node handles returned by this tree's add_node")
            }
            StackError::RootPathCollision { .. } => Some(
                "Top-level paths omit the root id; rename the construct or nest it one level down",
            ),
            StackError::AlreadySynthesized => {
                Some("Finish all declarations before calling synthesize()")
            }
            StackError::MalformedConstraint { .. } => {
                Some("Constraint expressions and strategy fields must be non-empty")
            }
            StackError::Config { .. } => Some("Check stackweave.toml and STACKWEAVE_* variables"),
            StackError::Manifest { .. } => Some("Check the manifest against the documented format"),
            StackError::Validation { .. } => {
                Some("Declare every referenced resource and break reference cycles")
            }
            StackError::Yaml(_) => Some("Check YAML syntax: indentation and quoting"),
            StackError::Json(_) => None,
            StackError::Io(_) => Some("Check file path and permissions"),
        }
    }
}
