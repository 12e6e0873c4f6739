//! stackweave - infrastructure template synthesis
//!
//! Declare a tree of constructs whose properties may reference outputs of
//! constructs that do not exist yet, then synthesize it into one fully
//! resolved template or one complete report of what is wrong.

pub mod config;
pub mod constructs;
pub mod deferred;
pub mod error;
pub mod manifest;
pub mod placement;
pub mod registry;
pub mod report;
pub mod synth;
pub mod template;
pub mod tree;

pub use config::{IssueOrder, OutputFormat, SynthConfig};
pub use constructs::{ClusterConstruct, LaunchTarget, ScheduledTask};
pub use deferred::{DeferredValue, RefToken, Resolution};
pub use error::{FixSuggestion, StackError};
pub use manifest::Manifest;
pub use placement::{BinPackResource, PlacementAssembler, PlacementConstraint, PlacementStrategy};
pub use registry::ReferenceRegistry;
pub use report::{Issue, IssueKind, ResolveError, ValidationReport};
pub use template::{Template, TemplateNode};
pub use tree::{CheckContext, ConstructNode, ConstructTree, NodeId, TreeState};
