//! Scheduling constructs: clusters with capacity, and tasks placed onto them
//!
//! A [`ScheduledTask`] refers to its cluster only by path, so the cluster may be
//! declared before or after the task. Whether a fleet-backed task has capacity
//! to run on is checked at synthesis, alongside every other problem in the tree.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::deferred::{DeferredValue, RefToken};
use crate::error::{Result, StackError};
use crate::placement::PlacementAssembler;
use crate::tree::{ConstructTree, NodeId, ID_OUTPUT};

/// Output a cluster exposes telling whether fleet capacity was added
pub const FLEET_CAPACITY_OUTPUT: &str = "hasFleetCapacity";

/// Where a task's containers run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchTarget {
    /// Hosts provisioned in the cluster (requires capacity)
    Fleet,
    /// Fully managed, no hosts to configure
    Managed,
}

impl LaunchTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            LaunchTarget::Fleet => "fleet",
            LaunchTarget::Managed => "managed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacitySpec {
    pub name: String,
    pub instance_type: String,
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Default)]
struct CapacityState {
    groups: Vec<CapacitySpec>,
    sealed: bool,
}

/// Cluster construct accumulating fleet capacity
#[derive(Debug, Clone)]
pub struct ClusterConstruct {
    node: NodeId,
    path: String,
    capacity: Arc<Mutex<CapacityState>>,
}

impl ClusterConstruct {
    pub fn new(tree: &mut ConstructTree, parent: NodeId, id: &str) -> Result<Self> {
        let node = tree.add_node(parent, id, "Cluster")?;
        let path = tree.path(node)?.to_string();
        let capacity: Arc<Mutex<CapacityState>> = Arc::default();

        let groups = Arc::clone(&capacity);
        tree.set_property(
            node,
            "capacity",
            DeferredValue::lazy(move || {
                let mut state = groups.lock();
                state.sealed = true;
                if state.groups.is_empty() {
                    return DeferredValue::absent();
                }
                DeferredValue::concrete(Value::Array(
                    state
                        .groups
                        .iter()
                        .map(|g| {
                            json!({
                                "name": g.name,
                                "instanceType": g.instance_type,
                                "minCapacity": g.min,
                                "maxCapacity": g.max,
                            })
                        })
                        .collect(),
                ))
            }),
        )?;

        let flag = Arc::clone(&capacity);
        tree.expose(
            node,
            FLEET_CAPACITY_OUTPUT,
            DeferredValue::lazy(move || {
                let mut state = flag.lock();
                state.sealed = true;
                DeferredValue::concrete(!state.groups.is_empty())
            }),
        )?;

        Ok(Self {
            node,
            path,
            capacity,
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Add an auto-scaling group of hosts to the cluster
    pub fn add_capacity(
        &self,
        name: impl Into<String>,
        instance_type: impl Into<String>,
        min: u32,
        max: u32,
    ) -> Result<&Self> {
        let name = name.into();
        let instance_type = instance_type.into();
        if name.trim().is_empty() || instance_type.trim().is_empty() {
            return Err(StackError::MalformedConstraint {
                details: "capacity name and instance type must be non-empty".to_string(),
            });
        }
        if min > max {
            return Err(StackError::MalformedConstraint {
                details: format!("capacity '{}' has min {} above max {}", name, min, max),
            });
        }

        let mut state = self.capacity.lock();
        if state.sealed {
            return Err(StackError::AlreadySynthesized);
        }
        state.groups.push(CapacitySpec {
            name,
            instance_type,
            min,
            max,
        });
        Ok(self)
    }

    pub fn has_capacity(&self) -> bool {
        !self.capacity.lock().groups.is_empty()
    }
}

/// A task scheduled onto a cluster, with placement rules
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    node: NodeId,
    launch: LaunchTarget,
    placement: PlacementAssembler,
}

impl ScheduledTask {
    /// Declare a task on the cluster at `cluster_path` (may be declared later)
    pub fn new(
        tree: &mut ConstructTree,
        parent: NodeId,
        id: &str,
        cluster_path: &str,
        launch: LaunchTarget,
    ) -> Result<Self> {
        let node = tree.add_node(parent, id, "ScheduledTask")?;
        let placement = PlacementAssembler::new();

        tree.set_property(node, "cluster", DeferredValue::reference(cluster_path, ID_OUTPUT))?;
        tree.set_property(node, "launchTarget", launch.as_str())?;
        tree.set_property(node, "placementConstraints", placement.constraints())?;
        tree.set_property(node, "placementStrategies", placement.strategies())?;

        let cluster_id = RefToken::new(cluster_path, ID_OUTPUT);
        let fleet_flag = RefToken::new(cluster_path, FLEET_CAPACITY_OUTPUT);
        tree.add_check(node, move |ctx| match launch {
            LaunchTarget::Fleet => {
                // A missing cluster is already reported through the `cluster` property
                if ctx.lookup(&cluster_id).is_err() {
                    return Vec::new();
                }
                match ctx.lookup(&fleet_flag) {
                    Ok(Some(Value::Bool(true))) => Vec::new(),
                    Ok(_) => vec![format!(
                        "cluster '{}' has no fleet capacity; add capacity before scheduling fleet-backed tasks",
                        cluster_id.resource
                    )],
                    Err(_) => vec![format!(
                        "'{}' is not a cluster that can provide fleet capacity",
                        cluster_id.resource
                    )],
                }
            }
            LaunchTarget::Managed => {
                let mut errors = Vec::new();
                if ctx.property("placementConstraints").is_some() {
                    errors.push(
                        "placement constraints are not supported on managed launch targets"
                            .to_string(),
                    );
                }
                if ctx.property("placementStrategies").is_some() {
                    errors.push(
                        "placement strategies are not supported on managed launch targets"
                            .to_string(),
                    );
                }
                errors
            }
        })?;

        Ok(Self {
            node,
            launch,
            placement,
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn launch_target(&self) -> LaunchTarget {
        self.launch
    }

    pub fn placement(&self) -> &PlacementAssembler {
        &self.placement
    }
}
