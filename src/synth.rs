//! Synthesizer: resolve every deferred value, run every check, emit a template
//!
//! Walks the tree depth-first in declaration order (parent before children).
//! Problems are collected, never thrown: a single pass reports everything wrong
//! with the tree, or yields a fully concrete template.

use serde_json::Map;
use tracing::{debug, info};

use crate::config::{IssueOrder, SynthConfig};
use crate::deferred::Resolution;
use crate::error::{Result, StackError};
use crate::report::{Issue, ValidationReport};
use crate::template::{Template, TemplateNode};
use crate::tree::{CheckContext, ConstructTree, NodeId};

/// One synthesis pass; reached only through [`ConstructTree::synthesize_with`],
/// which moves the tree to `Synthesized` first
pub(crate) struct Synthesizer<'t> {
    tree: &'t ConstructTree,
    config: &'t SynthConfig,
}

impl<'t> Synthesizer<'t> {
    pub(crate) fn new(tree: &'t ConstructTree, config: &'t SynthConfig) -> Self {
        Self { tree, config }
    }

    pub(crate) fn run(&self) -> Result<Template> {
        info!(nodes = self.tree.len(), "synthesizing construct tree");

        let mut resolution = Resolution::new(self.tree.registry(), self.config.max_depth);
        let mut report = ValidationReport::new();
        let root = self.visit(self.tree.root(), &mut resolution, &mut report)?;

        if !report.is_empty() {
            if self.config.issue_order == IssueOrder::Path {
                report.sort_by_node();
            }
            info!(issues = report.len(), "synthesis failed");
            return Err(StackError::Validation { report });
        }

        info!("synthesis complete");
        Ok(Template::new(root))
    }

    fn visit(
        &self,
        id: NodeId,
        resolution: &mut Resolution<'_>,
        report: &mut ValidationReport,
    ) -> Result<TemplateNode> {
        let node = self.tree.node(id)?;
        debug!(path = node.path(), "resolving construct");

        let mut properties = Map::new();
        for (name, value) in node.properties() {
            match resolution.resolve(value) {
                Ok(Some(resolved)) => {
                    properties.insert(name.clone(), resolved);
                }
                Ok(None) => {}
                Err(err) => report.push(Issue::from_resolve(node.path(), name, &err)),
            }
        }

        let mut ctx = CheckContext::new(node.path(), &properties, resolution);
        for check in node.checks() {
            for message in check(&mut ctx) {
                report.push(Issue::check(node.path(), message));
            }
        }

        let mut children = Vec::with_capacity(node.children().len());
        for child in node.children() {
            children.push(self.visit(*child, resolution, report)?);
        }

        Ok(TemplateNode {
            id: node.id().to_string(),
            kind: node.kind().to_string(),
            path: node.path().to_string(),
            properties,
            children,
        })
    }
}
