//! Construct tree: containment hierarchy + reference registry
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Containment is a
//! strict tree (parent owns children); value dependencies between nodes go
//! through the [`ReferenceRegistry`] only, so reference cycles never become
//! containment cycles.
//!
//! Lifecycle: `Declaring` → `Synthesized`. All mutation happens while declaring.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::SynthConfig;
use crate::deferred::{DeferredValue, RefToken, Resolution};
use crate::error::{Result, StackError};
use crate::registry::ReferenceRegistry;
use crate::report::ResolveError;
use crate::synth::Synthesizer;
use crate::template::Template;

static ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("identifier pattern is valid")
});

/// Output key every node exposes with its own path
pub const ID_OUTPUT: &str = "id";

/// Check that `id` is a valid node identifier or output key
pub fn validate_identifier(id: &str) -> Result<()> {
    if ID_PATTERN.is_match(id) {
        Ok(())
    } else {
        Err(StackError::InvalidIdentifier { id: id.to_string() })
    }
}

/// Handle to a node in one [`ConstructTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Validation predicate run after a node's properties resolve
pub type Check = Box<dyn Fn(&mut CheckContext<'_, '_>) -> Vec<String> + Send + Sync>;

pub struct ConstructNode {
    id: String,
    kind: String,
    path: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    properties: Vec<(String, DeferredValue)>,
    checks: Vec<Check>,
}

impl ConstructNode {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Globally unique path, e.g. `Cluster/Capacity`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Properties in insertion order
    pub fn properties(&self) -> &[(String, DeferredValue)] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&DeferredValue> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn check_count(&self) -> usize {
        self.checks.len()
    }

    pub(crate) fn checks(&self) -> &[Check] {
        &self.checks
    }
}

impl std::fmt::Debug for ConstructNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstructNode")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("children", &self.children.len())
            .field("properties", &self.properties.len())
            .field("checks", &self.checks.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeState {
    Declaring,
    Synthesized,
}

#[derive(Debug)]
pub struct ConstructTree {
    nodes: Vec<ConstructNode>,
    registry: ReferenceRegistry,
    state: TreeState,
}

impl ConstructTree {
    /// Create a tree with a root construct named `root_id`
    pub fn new(root_id: &str) -> Result<Self> {
        validate_identifier(root_id)?;

        let mut tree = Self {
            nodes: Vec::new(),
            registry: ReferenceRegistry::new(),
            state: TreeState::Declaring,
        };
        tree.insert(None, root_id, "Root", root_id.to_string())?;
        Ok(tree)
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn state(&self) -> TreeState {
        self.state
    }

    pub fn registry(&self) -> &ReferenceRegistry {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&ConstructNode> {
        self.nodes
            .get(id.0)
            .ok_or(StackError::UnknownNode { index: id.0 })
    }

    pub fn path(&self, id: NodeId) -> Result<&str> {
        self.node(id).map(ConstructNode::path)
    }

    /// Find a node by its path
    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.path == path).map(NodeId)
    }

    /// Declare a child construct
    pub fn add_node(&mut self, parent: NodeId, id: &str, kind: &str) -> Result<NodeId> {
        self.ensure_declaring()?;
        validate_identifier(id)?;

        let parent_node = self.node(parent)?;
        if parent_node
            .children
            .iter()
            .any(|c| self.nodes[c.0].id == id)
        {
            return Err(StackError::DuplicateChild {
                parent: parent_node.path.clone(),
                id: id.to_string(),
            });
        }

        // Paths are relative to the root so top-level constructs are addressed by id
        let path = if parent == self.root() {
            if id == self.nodes[0].id {
                return Err(StackError::RootPathCollision { id: id.to_string() });
            }
            id.to_string()
        } else {
            format!("{}/{}", parent_node.path, id)
        };

        let node = self.insert(Some(parent), id, kind, path)?;
        self.nodes[parent.0].children.push(node);
        Ok(node)
    }

    fn insert(
        &mut self,
        parent: Option<NodeId>,
        id: &str,
        kind: &str,
        path: String,
    ) -> Result<NodeId> {
        self.registry.register(
            RefToken::new(path.as_str(), ID_OUTPUT),
            DeferredValue::concrete(path.as_str()),
        )?;

        debug!(path = %path, kind, "declared construct");
        let node = NodeId(self.nodes.len());
        self.nodes.push(ConstructNode {
            id: id.to_string(),
            kind: kind.to_string(),
            path,
            parent,
            children: Vec::new(),
            properties: Vec::new(),
            checks: Vec::new(),
        });
        Ok(node)
    }

    /// Set or replace a property; replacing keeps its original position
    pub fn set_property(
        &mut self,
        node: NodeId,
        name: &str,
        value: impl Into<DeferredValue>,
    ) -> Result<()> {
        self.ensure_declaring()?;
        validate_identifier(name)?;
        let value = value.into();
        let target = self.node_mut(node)?;

        match target.properties.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => target.properties.push((name.to_string(), value)),
        }
        Ok(())
    }

    /// Register an output of `node` under `key`; returns a reference to it
    pub fn expose(
        &mut self,
        node: NodeId,
        key: &str,
        value: impl Into<DeferredValue>,
    ) -> Result<DeferredValue> {
        self.ensure_declaring()?;
        validate_identifier(key)?;
        let token = RefToken::new(self.path(node)?, key);
        self.registry.register(token.clone(), value.into())?;
        Ok(DeferredValue::from_token(token))
    }

    /// Reference to an output of a declared node
    pub fn reference(&self, node: NodeId, key: &str) -> Result<DeferredValue> {
        Ok(DeferredValue::reference(self.path(node)?, key))
    }

    /// Attach a validation predicate; errors it returns are reported at synthesis
    pub fn add_check<F>(&mut self, node: NodeId, check: F) -> Result<()>
    where
        F: Fn(&mut CheckContext<'_, '_>) -> Vec<String> + Send + Sync + 'static,
    {
        self.ensure_declaring()?;
        self.node_mut(node)?.checks.push(Box::new(check));
        Ok(())
    }

    /// Resolve and validate the whole tree with default configuration
    pub fn synthesize(&mut self) -> Result<Template> {
        self.synthesize_with(&SynthConfig::default())
    }

    /// Resolve and validate the whole tree; runs at most once per tree
    pub fn synthesize_with(&mut self, config: &SynthConfig) -> Result<Template> {
        self.ensure_declaring()?;
        self.state = TreeState::Synthesized;
        Synthesizer::new(self, config).run()
    }

    fn ensure_declaring(&self) -> Result<()> {
        match self.state {
            TreeState::Declaring => Ok(()),
            TreeState::Synthesized => Err(StackError::AlreadySynthesized),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut ConstructNode> {
        self.nodes
            .get_mut(id.0)
            .ok_or(StackError::UnknownNode { index: id.0 })
    }
}

/// What a validation predicate can see: the owning node's resolved
/// properties and any registered output
pub struct CheckContext<'a, 'r> {
    path: &'a str,
    properties: &'a Map<String, Value>,
    resolution: &'a mut Resolution<'r>,
}

impl<'a, 'r> CheckContext<'a, 'r> {
    pub(crate) fn new(
        path: &'a str,
        properties: &'a Map<String, Value>,
        resolution: &'a mut Resolution<'r>,
    ) -> Self {
        Self {
            path,
            properties,
            resolution,
        }
    }

    /// Path of the node being checked
    pub fn path(&self) -> &str {
        self.path
    }

    /// Resolved property, `None` if absent or failed to resolve
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> &Map<String, Value> {
        self.properties
    }

    /// Resolve a registered output
    pub fn lookup(&mut self, token: &RefToken) -> std::result::Result<Option<Value>, ResolveError> {
        self.resolution.resolve_token(token)
    }
}
