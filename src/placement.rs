//! Task placement: ordered constraint and strategy lists
//!
//! The assembler accumulates entries across any number of calls made during
//! declaration and exposes both lists only as deferred snapshots. Empty lists
//! resolve to absent. Entries are never deduplicated; order is priority order.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::deferred::DeferredValue;
use crate::error::{Result, StackError};

/// Built-in attribute used when spreading without explicit fields
pub const INSTANCE_ID_FIELD: &str = "instanceId";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementConstraint {
    /// Only hosts matching the expression
    MemberOf { expression: String },
    /// Each task on a different host
    DistinctInstance,
}

impl PlacementConstraint {
    pub fn to_value(&self) -> Value {
        match self {
            PlacementConstraint::MemberOf { expression } => {
                json!({"type": "memberOf", "expression": expression})
            }
            PlacementConstraint::DistinctInstance => json!({"type": "distinctInstance"}),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinPackResource {
    Cpu,
    Memory,
}

impl BinPackResource {
    pub fn as_str(self) -> &'static str {
        match self {
            BinPackResource::Cpu => "cpu",
            BinPackResource::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementStrategy {
    Spread { field: String },
    BinPack { resource: BinPackResource },
    Random,
}

impl PlacementStrategy {
    pub fn to_value(&self) -> Value {
        match self {
            PlacementStrategy::Spread { field } => json!({"type": "spread", "field": field}),
            PlacementStrategy::BinPack { resource } => {
                json!({"type": "binpack", "field": resource.as_str()})
            }
            PlacementStrategy::Random => json!({"type": "random"}),
        }
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    constraints: Vec<PlacementConstraint>,
    strategies: Vec<PlacementStrategy>,
    /// Set once a snapshot has been taken; later appends would be lost
    sealed: bool,
}

impl Accumulator {
    fn ensure_open(&self) -> Result<()> {
        if self.sealed {
            Err(StackError::AlreadySynthesized)
        } else {
            Ok(())
        }
    }
}

/// Builder for one scheduling construct's placement configuration
#[derive(Debug, Clone, Default)]
pub struct PlacementAssembler {
    state: Arc<Mutex<Accumulator>>,
}

impl PlacementAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks must satisfy every `memberOf` expression
    pub fn add_member_of_constraint(&self, expression: impl Into<String>) -> Result<&Self> {
        self.add_member_of_constraints([expression])
    }

    /// Append one `memberOf` constraint per expression, in order
    pub fn add_member_of_constraints<I, S>(&self, expressions: I) -> Result<&Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let expressions: Vec<String> = expressions.into_iter().map(Into::into).collect();
        if let Some(bad) = expressions.iter().find(|e| e.trim().is_empty()) {
            return Err(StackError::MalformedConstraint {
                details: format!("memberOf expression {:?} is empty", bad),
            });
        }

        let mut acc = self.state.lock();
        acc.ensure_open()?;
        acc.constraints.extend(
            expressions
                .into_iter()
                .map(|expression| PlacementConstraint::MemberOf { expression }),
        );
        Ok(self)
    }

    pub fn add_distinct_instance_constraint(&self) -> Result<&Self> {
        let mut acc = self.state.lock();
        acc.ensure_open()?;
        acc.constraints.push(PlacementConstraint::DistinctInstance);
        Ok(self)
    }

    /// One `spread` entry per field; no fields spreads across instances
    pub fn add_spread_strategy<I, S>(&self, fields: I) -> Result<&Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        if fields.is_empty() {
            fields.push(INSTANCE_ID_FIELD.to_string());
        }
        if fields.iter().any(|f| f.trim().is_empty()) {
            return Err(StackError::MalformedConstraint {
                details: "spread field name is empty".to_string(),
            });
        }

        let mut acc = self.state.lock();
        acc.ensure_open()?;
        acc.strategies
            .extend(fields.into_iter().map(|field| PlacementStrategy::Spread { field }));
        Ok(self)
    }

    pub fn add_bin_pack_strategy(&self, resource: BinPackResource) -> Result<&Self> {
        let mut acc = self.state.lock();
        acc.ensure_open()?;
        acc.strategies.push(PlacementStrategy::BinPack { resource });
        Ok(self)
    }

    pub fn add_random_strategy(&self) -> Result<&Self> {
        let mut acc = self.state.lock();
        acc.ensure_open()?;
        acc.strategies.push(PlacementStrategy::Random);
        Ok(self)
    }

    /// Deferred snapshot of the constraint list (absent when empty)
    pub fn constraints(&self) -> DeferredValue {
        let state = Arc::clone(&self.state);
        DeferredValue::lazy(move || {
            let mut acc = state.lock();
            acc.sealed = true;
            snapshot(&acc.constraints, PlacementConstraint::to_value)
        })
    }

    /// Deferred snapshot of the strategy list (absent when empty)
    pub fn strategies(&self) -> DeferredValue {
        let state = Arc::clone(&self.state);
        DeferredValue::lazy(move || {
            let mut acc = state.lock();
            acc.sealed = true;
            snapshot(&acc.strategies, PlacementStrategy::to_value)
        })
    }

    pub fn constraint_count(&self) -> usize {
        self.state.lock().constraints.len()
    }

    pub fn strategy_count(&self) -> usize {
        self.state.lock().strategies.len()
    }
}

fn snapshot<T>(items: &[T], to_value: fn(&T) -> Value) -> DeferredValue {
    if items.is_empty() {
        DeferredValue::absent()
    } else {
        DeferredValue::concrete(Value::Array(items.iter().map(to_value).collect()))
    }
}
