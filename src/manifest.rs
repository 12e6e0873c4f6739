//! Declarative YAML manifests
//!
//! ```yaml
//! name: App
//! resources:
//!   - id: Network
//!     kind: Vpc
//!     outputs:
//!       cidr: 10.0.0.0/16
//!   - id: Service
//!     kind: Service
//!     required: [cluster]
//!     properties:
//!       cluster: { ref: Cluster.id }
//!       subnets: [{ ref: Network.cidr }]
//!     placement:
//!       constraints:
//!         - distinctInstance
//!         - memberOf: "attribute:zone =~ eu-*"
//!       strategies:
//!         - spread: [zone, instanceId]
//!         - binpack: memory
//!         - random
//! ```
//!
//! A mapping with the single key `ref` is a reference token; the last `.`
//! separates the resource path from the output key.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::deferred::{DeferredValue, RefToken};
use crate::error::{Result, StackError};
use crate::placement::{BinPackResource, PlacementAssembler};
use crate::tree::{ConstructTree, NodeId};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceSpec {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub outputs: Map<String, Value>,
    /// Properties that must be present after resolution
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub placement: Option<PlacementSpec>,
    #[serde(default)]
    pub children: Vec<ResourceSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlacementSpec {
    #[serde(default)]
    pub constraints: Vec<ConstraintSpec>,
    #[serde(default)]
    pub strategies: Vec<StrategySpec>,
}

/// `distinctInstance` or `memberOf: <expression>`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConstraintSpec {
    Named(String),
    MemberOf {
        #[serde(rename = "memberOf")]
        member_of: String,
    },
}

/// `random`, `spread`, `spread: field`, `spread: [fields]` or `binpack: cpu|memory`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StrategySpec {
    Named(String),
    Spread { spread: SpreadFields },
    BinPack { binpack: BinPackResource },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SpreadFields {
    One(String),
    Many(Vec<String>),
}

impl Manifest {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Count of declared resources, nested ones included
    pub fn resource_count(&self) -> usize {
        fn count(specs: &[ResourceSpec]) -> usize {
            specs.iter().map(|s| 1 + count(&s.children)).sum()
        }
        count(&self.resources)
    }

    /// Declare every resource into a fresh tree
    pub fn build(&self) -> Result<ConstructTree> {
        let mut tree = ConstructTree::new(&self.name)?;
        let root = tree.root();
        for spec in &self.resources {
            declare(&mut tree, root, spec)?;
        }
        Ok(tree)
    }
}

fn declare(tree: &mut ConstructTree, parent: NodeId, spec: &ResourceSpec) -> Result<NodeId> {
    let node = tree.add_node(parent, &spec.id, &spec.kind)?;

    for (name, raw) in &spec.properties {
        tree.set_property(node, name, to_deferred(raw)?)?;
    }
    for (key, raw) in &spec.outputs {
        tree.expose(node, key, to_deferred(raw)?)?;
    }
    if let Some(placement) = &spec.placement {
        let assembler = assemble(placement)?;
        tree.set_property(node, "placementConstraints", assembler.constraints())?;
        tree.set_property(node, "placementStrategies", assembler.strategies())?;
    }
    if !spec.required.is_empty() {
        let required = spec.required.clone();
        tree.add_check(node, move |ctx| {
            required
                .iter()
                .filter(|name| ctx.property(name).is_none())
                .map(|name| format!("required property '{}' is missing", name))
                .collect()
        })?;
    }

    for child in &spec.children {
        declare(tree, node, child)?;
    }
    Ok(node)
}

/// Convert a manifest value, turning `{ref: "Path.key"}` into a reference
pub fn to_deferred(raw: &Value) -> Result<DeferredValue> {
    match raw {
        Value::Object(map) if map.len() == 1 && map.contains_key("ref") => {
            let target = map["ref"].as_str().unwrap_or_default();
            let token = RefToken::parse(target).ok_or_else(|| StackError::Manifest {
                details: format!("invalid reference {:?}, expected \"Resource.key\"", map["ref"]),
            })?;
            Ok(DeferredValue::from_token(token))
        }
        Value::Object(map) => {
            let entries = map
                .iter()
                .map(|(k, v)| Ok((k.clone(), to_deferred(v)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok(DeferredValue::map(entries))
        }
        Value::Array(items) => {
            let items = items.iter().map(to_deferred).collect::<Result<Vec<_>>>()?;
            Ok(DeferredValue::list(items))
        }
        scalar => Ok(DeferredValue::concrete(scalar.clone())),
    }
}

fn assemble(spec: &PlacementSpec) -> Result<PlacementAssembler> {
    let assembler = PlacementAssembler::new();

    for constraint in &spec.constraints {
        match constraint {
            ConstraintSpec::Named(name) if name == "distinctInstance" => {
                assembler.add_distinct_instance_constraint()?;
            }
            ConstraintSpec::Named(name) => {
                return Err(StackError::Manifest {
                    details: format!("unknown placement constraint '{}'", name),
                });
            }
            ConstraintSpec::MemberOf { member_of } => {
                assembler.add_member_of_constraint(member_of.as_str())?;
            }
        }
    }

    for strategy in &spec.strategies {
        match strategy {
            StrategySpec::Named(name) if name == "random" => {
                assembler.add_random_strategy()?;
            }
            StrategySpec::Named(name) if name == "spread" => {
                assembler.add_spread_strategy(Vec::<String>::new())?;
            }
            StrategySpec::Named(name) => {
                return Err(StackError::Manifest {
                    details: format!("unknown placement strategy '{}'", name),
                });
            }
            StrategySpec::Spread { spread } => match spread {
                SpreadFields::One(field) => {
                    assembler.add_spread_strategy([field.as_str()])?;
                }
                SpreadFields::Many(fields) => {
                    assembler.add_spread_strategy(fields.iter().map(String::as_str))?;
                }
            },
            StrategySpec::BinPack { binpack } => {
                assembler.add_bin_pack_strategy(*binpack)?;
            }
        }
    }

    Ok(assembler)
}
