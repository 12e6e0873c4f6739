//! Resolved template: the fully concrete output of synthesis
//!
//! Serializes as a mapping of identifier → `{kind, properties, children}` with
//! children nested the same way, in declaration order.

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::config::OutputFormat;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateNode {
    pub id: String,
    pub kind: String,
    pub path: String,
    /// Resolved properties; absent ones are not present
    pub properties: Map<String, Value>,
    pub children: Vec<TemplateNode>,
}

impl TemplateNode {
    pub fn child(&self, id: &str) -> Option<&TemplateNode> {
        self.children.iter().find(|c| c.id == id)
    }

    /// Pre-order walk (self, then children in order)
    pub fn walk(&self) -> Vec<&TemplateNode> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}

/// Body of a node under its identifier key
struct NodeBody<'a>(&'a TemplateNode);

impl Serialize for NodeBody<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let node = self.0;
        let fields = 1
            + usize::from(!node.properties.is_empty())
            + usize::from(!node.children.is_empty());
        let mut state = serializer.serialize_struct("TemplateNode", fields)?;
        state.serialize_field("kind", &node.kind)?;
        if !node.properties.is_empty() {
            state.serialize_field("properties", &node.properties)?;
        }
        if !node.children.is_empty() {
            state.serialize_field("children", &Children(&node.children))?;
        }
        state.end()
    }
}

struct Children<'a>(&'a [TemplateNode]);

impl Serialize for Children<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for child in self.0 {
            map.serialize_entry(&child.id, &NodeBody(child))?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    root: TemplateNode,
}

impl Template {
    pub fn new(root: TemplateNode) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &TemplateNode {
        &self.root
    }

    /// Find a node by path; the root's own id is also accepted
    pub fn find(&self, path: &str) -> Option<&TemplateNode> {
        if path == self.root.path {
            return Some(&self.root);
        }
        let mut current = &self.root;
        for segment in path.split('/') {
            current = current.child(segment)?;
        }
        Some(current)
    }

    /// Resolved property of the node at `path`
    pub fn property(&self, path: &str, name: &str) -> Option<&Value> {
        self.find(path)?.properties.get(name)
    }

    pub fn node_count(&self) -> usize {
        self.root.walk().len()
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => self.to_json_pretty(),
            OutputFormat::Yaml => self.to_yaml(),
        }
    }
}

impl Serialize for Template {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        Children(std::slice::from_ref(&self.root)).serialize(serializer)
    }
}
