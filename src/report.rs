//! Synthesis issues and the aggregated validation report
//!
//! Everything that can only be discovered once the whole tree is declared
//! (unknown references, value cycles, failed checks) becomes an [`Issue`].
//! Issues are collected across the tree and surfaced together.

use std::fmt;

use thiserror::Error;

/// Category of a collected issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
    UnknownReference,
    CyclicReference,
    DepthExceeded,
    Check,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueKind::UnknownReference => write!(f, "unknown-reference"),
            IssueKind::CyclicReference => write!(f, "cyclic-reference"),
            IssueKind::DepthExceeded => write!(f, "depth-exceeded"),
            IssueKind::Check => write!(f, "check"),
        }
    }
}

/// Failure to resolve a deferred value
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown reference '{resource}.{key}'")]
    UnknownReference { resource: String, key: String },

    #[error("cyclic reference: {}", .chain.join(" -> "))]
    CyclicReference { chain: Vec<String> },

    #[error("resolution exceeded maximum depth of {max_depth}")]
    DepthExceeded { max_depth: usize },
}

impl ResolveError {
    pub fn kind(&self) -> IssueKind {
        match self {
            ResolveError::UnknownReference { .. } => IssueKind::UnknownReference,
            ResolveError::CyclicReference { .. } => IssueKind::CyclicReference,
            ResolveError::DepthExceeded { .. } => IssueKind::DepthExceeded,
        }
    }

    /// Resource identifiers taking part in a cycle, first-seen order
    pub fn cycle_members(&self) -> Vec<&str> {
        let ResolveError::CyclicReference { chain } = self else {
            return Vec::new();
        };
        let mut members: Vec<&str> = Vec::new();
        for link in chain {
            let resource = link.rsplit_once('.').map_or(link.as_str(), |(r, _)| r);
            if !members.contains(&resource) {
                members.push(resource);
            }
        }
        members
    }
}

/// A single problem found during synthesis, tagged with the owning node's path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub node: String,
    pub kind: IssueKind,
    pub message: String,
}

impl Issue {
    pub fn new(node: impl Into<String>, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            kind,
            message: message.into(),
        }
    }

    /// Issue raised while resolving the named property of a node
    pub fn from_resolve(node: impl Into<String>, property: &str, err: &ResolveError) -> Self {
        Self::new(node, err.kind(), format!("property '{}': {}", property, err))
    }

    pub fn check(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(node, IssueKind::Check, message)
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.node, self.kind, self.message)
    }
}

/// Every issue collected in one synthesis pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter()
    }

    /// Issues of one kind, in report order
    pub fn of_kind(&self, kind: IssueKind) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }

    /// Stable sort by node path; issues of one node keep their relative order
    pub fn sort_by_node(&mut self) {
        self.issues.sort_by(|a, b| a.node.cmp(&b.node));
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  - {}", issue)?;
        }
        Ok(())
    }
}

impl IntoIterator for ValidationReport {
    type Item = Issue;
    type IntoIter = std::vec::IntoIter<Issue>;

    fn into_iter(self) -> Self::IntoIter {
        self.issues.into_iter()
    }
}
