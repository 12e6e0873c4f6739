//! Deferred values and their resolution
//!
//! A [`DeferredValue`] is a value that is either known now or will be known
//! once the whole tree has been declared. Clones share a single cell, so a value
//! registered as an output and also used as a property is computed once.
//!
//! Resolution flattens chains: a lazy resolver may hand back another deferred
//! value, a reference is followed through the registry, and lists/maps are
//! resolved element-wise. Each cell carries an in-progress marker owned by the
//! resolving thread; meeting a cell that the same thread still has in progress
//! means the value depends on itself. A cell in progress on another thread is
//! waited for, unless that thread is itself waiting on this one.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use tracing::warn;

use crate::registry::ReferenceRegistry;
use crate::report::ResolveError;

/// Default bound on nested resolution frames
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Highest accepted depth bound; resolution recurses on the native stack
pub const MAX_DEPTH_LIMIT: usize = 512;

/// Label for a cycle member that was not reached through an output token
const UNNAMED: &str = "<deferred>";

static NEXT_CELL: AtomicU64 = AtomicU64::new(1);

/// Blocked thread -> thread owning the cell it waits for
static WAITING_ON: Lazy<Mutex<FxHashMap<ThreadId, ThreadId>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

/// Symbolic pointer to a resource output: resource path + output key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefToken {
    pub resource: String,
    pub key: String,
}

impl RefToken {
    pub fn new(resource: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            key: key.into(),
        }
    }

    /// Parse `Path/To/Resource.key`; the last `.` separates the key
    pub fn parse(raw: &str) -> Option<Self> {
        let (resource, key) = raw.rsplit_once('.')?;
        if resource.is_empty() || key.is_empty() {
            return None;
        }
        Some(Self::new(resource, key))
    }
}

impl fmt::Display for RefToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.key)
    }
}

type Resolver = Box<dyn FnOnce() -> DeferredValue + Send>;

enum Source {
    Concrete(Value),
    Absent,
    Lazy(Resolver),
    /// What a lazy resolver returned
    Chain(DeferredValue),
    Reference(RefToken),
    List(Vec<DeferredValue>),
    Map(Vec<(String, DeferredValue)>),
}

enum CellState {
    Pending(Source),
    InProgress { owner: ThreadId },
    Resolved(Option<Value>),
    Failed(ResolveError),
}

struct Cell {
    id: u64,
    state: Mutex<CellState>,
    settled: Condvar,
}

/// A property value that may not be known until synthesis
///
/// Resolves to `Some(value)` or to `None` ("absent": the property is omitted,
/// which is different from an empty list or map).
#[derive(Clone)]
pub struct DeferredValue {
    cell: Arc<Cell>,
}

impl DeferredValue {
    fn from_source(source: Source) -> Self {
        Self {
            cell: Arc::new(Cell {
                id: NEXT_CELL.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(CellState::Pending(source)),
                settled: Condvar::new(),
            }),
        }
    }

    pub fn concrete(value: impl Into<Value>) -> Self {
        Self::from_source(Source::Concrete(value.into()))
    }

    pub fn absent() -> Self {
        Self::from_source(Source::Absent)
    }

    /// Call `resolver` at synthesis time; it runs at most once
    pub fn lazy<F>(resolver: F) -> Self
    where
        F: FnOnce() -> DeferredValue + Send + 'static,
    {
        Self::from_source(Source::Lazy(Box::new(resolver)))
    }

    /// The output `key` of the resource at path `resource`
    pub fn reference(resource: impl Into<String>, key: impl Into<String>) -> Self {
        Self::from_token(RefToken::new(resource, key))
    }

    pub fn from_token(token: RefToken) -> Self {
        Self::from_source(Source::Reference(token))
    }

    /// Ordered list; absent elements are dropped
    pub fn list(items: impl IntoIterator<Item = DeferredValue>) -> Self {
        Self::from_source(Source::List(items.into_iter().collect()))
    }

    /// Keyed mapping in insertion order; absent entries are dropped
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, DeferredValue)>) -> Self {
        Self::from_source(Source::Map(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Whether the value has already been resolved (successfully or not)
    pub fn is_resolved(&self) -> bool {
        matches!(
            *self.cell.state.lock(),
            CellState::Resolved(_) | CellState::Failed(_)
        )
    }

    /// Resolve without a tree; references fail as unknown
    pub fn resolve(&self) -> Result<Option<Value>, ResolveError> {
        let registry = ReferenceRegistry::new();
        self.resolve_in(&registry)
    }

    /// Resolve against a registry
    pub fn resolve_in(&self, registry: &ReferenceRegistry) -> Result<Option<Value>, ResolveError> {
        let mut resolution = Resolution::new(registry, DEFAULT_MAX_DEPTH);
        resolution.resolve(self)
    }

    fn resolve_framed(
        &self,
        resolution: &mut Resolution<'_>,
        via: Option<&RefToken>,
    ) -> Result<Option<Value>, ResolveError> {
        let me = thread::current().id();
        let source = {
            let mut state = self.cell.state.lock();
            loop {
                match std::mem::replace(&mut *state, CellState::InProgress { owner: me }) {
                    CellState::Pending(source) => break source,
                    CellState::Resolved(value) => {
                        *state = CellState::Resolved(value.clone());
                        return Ok(value);
                    }
                    CellState::Failed(err) => {
                        *state = CellState::Failed(err.clone());
                        return Err(err);
                    }
                    CellState::InProgress { owner } => {
                        *state = CellState::InProgress { owner };
                        if owner == me || !start_waiting(me, owner) {
                            drop(state);
                            return Err(resolution.cycle_through(self.cell.id, via));
                        }
                        self.cell.settled.wait(&mut state);
                        WAITING_ON.lock().remove(&me);
                    }
                }
            }
        };

        // The frame that hits the bound leaves its source untouched for shallower consumers
        if resolution.frames.len() >= resolution.max_depth {
            self.settle(CellState::Pending(source));
            return Err(ResolveError::DepthExceeded {
                max_depth: resolution.max_depth,
            });
        }

        let mut source = source;
        resolution.frames.push(Frame {
            cell: self.cell.id,
            via: via.cloned(),
        });
        let outcome = resolution.evaluate(&mut source);
        resolution.frames.pop();

        self.settle(match &outcome {
            Err(ResolveError::DepthExceeded { .. }) => CellState::Pending(source),
            Ok(value) => CellState::Resolved(value.clone()),
            Err(err) => CellState::Failed(err.clone()),
        });
        outcome
    }

    fn settle(&self, state: CellState) {
        *self.cell.state.lock() = state;
        self.cell.settled.notify_all();
    }
}

/// Record that `me` waits for `owner`; false if `owner` already waits on `me`
fn start_waiting(me: ThreadId, owner: ThreadId) -> bool {
    let mut waiting = WAITING_ON.lock();
    let mut current = owner;
    while let Some(&next) = waiting.get(&current) {
        if next == me {
            return false;
        }
        current = next;
    }
    waiting.insert(me, owner);
    true
}

impl fmt::Debug for DeferredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.cell.state.lock();
        let label = match &*state {
            CellState::Pending(Source::Concrete(v)) => format!("Concrete({})", v),
            CellState::Pending(Source::Absent) => "Absent".to_string(),
            CellState::Pending(Source::Lazy(_)) => "Lazy".to_string(),
            CellState::Pending(Source::Chain(next)) => format!("Chain(#{})", next.cell.id),
            CellState::Pending(Source::Reference(t)) => format!("Reference({})", t),
            CellState::Pending(Source::List(items)) => format!("List(len={})", items.len()),
            CellState::Pending(Source::Map(entries)) => format!("Map(len={})", entries.len()),
            CellState::InProgress { .. } => "InProgress".to_string(),
            CellState::Resolved(Some(v)) => format!("Resolved({})", v),
            CellState::Resolved(None) => "Resolved(absent)".to_string(),
            CellState::Failed(e) => format!("Failed({})", e),
        };
        write!(f, "DeferredValue#{}<{}>", self.cell.id, label)
    }
}

impl From<Value> for DeferredValue {
    fn from(value: Value) -> Self {
        Self::concrete(value)
    }
}

impl From<&str> for DeferredValue {
    fn from(value: &str) -> Self {
        Self::concrete(value)
    }
}

impl From<String> for DeferredValue {
    fn from(value: String) -> Self {
        Self::concrete(value)
    }
}

impl From<bool> for DeferredValue {
    fn from(value: bool) -> Self {
        Self::concrete(value)
    }
}

impl From<i64> for DeferredValue {
    fn from(value: i64) -> Self {
        Self::concrete(value)
    }
}

impl From<u64> for DeferredValue {
    fn from(value: u64) -> Self {
        Self::concrete(value)
    }
}

impl From<RefToken> for DeferredValue {
    fn from(token: RefToken) -> Self {
        Self::from_token(token)
    }
}

struct Frame {
    cell: u64,
    via: Option<RefToken>,
}

/// One resolution pass over a registry
///
/// Tracks the stack of values currently being resolved so that a value met
/// again while still in progress is reported as a cycle.
pub struct Resolution<'r> {
    registry: &'r ReferenceRegistry,
    frames: Vec<Frame>,
    max_depth: usize,
}

impl<'r> Resolution<'r> {
    /// `max_depth` is clamped to `1..=MAX_DEPTH_LIMIT`
    pub fn new(registry: &'r ReferenceRegistry, max_depth: usize) -> Self {
        Self {
            registry,
            frames: Vec::new(),
            max_depth: max_depth.clamp(1, MAX_DEPTH_LIMIT),
        }
    }

    pub fn resolve(&mut self, value: &DeferredValue) -> Result<Option<Value>, ResolveError> {
        value.resolve_framed(self, None)
    }

    /// Resolve a registered output by token
    pub fn resolve_token(&mut self, token: &RefToken) -> Result<Option<Value>, ResolveError> {
        let target = self.registry.lookup(token)?.clone();
        target.resolve_framed(self, Some(token))
    }

    fn evaluate(&mut self, source: &mut Source) -> Result<Option<Value>, ResolveError> {
        match source {
            Source::Concrete(value) => Ok(Some(value.clone())),
            Source::Absent => Ok(None),
            Source::Lazy(_) => {
                if let Source::Lazy(resolver) = std::mem::replace(source, Source::Absent) {
                    *source = Source::Chain(resolver());
                }
                self.evaluate(source)
            }
            Source::Chain(next) => next.resolve_framed(self, None),
            Source::Reference(token) => self.resolve_token(token),
            Source::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items.iter() {
                    if let Some(value) = item.resolve_framed(self, None)? {
                        out.push(value);
                    }
                }
                Ok(Some(Value::Array(out)))
            }
            Source::Map(entries) => {
                let mut out = Map::with_capacity(entries.len());
                for (key, item) in entries.iter() {
                    if let Some(value) = item.resolve_framed(self, None)? {
                        out.insert(key.clone(), value);
                    }
                }
                Ok(Some(Value::Object(out)))
            }
        }
    }

    /// Build the cycle error for `cell`, met again while in progress
    ///
    /// The chain starts and ends with the repeated member.
    fn cycle_through(&self, cell: u64, via: Option<&RefToken>) -> ResolveError {
        let label = |token: Option<&RefToken>| {
            token.map_or_else(|| UNNAMED.to_string(), ToString::to_string)
        };

        let mut chain = Vec::new();
        let (repeated, rest) = match self.frames.iter().position(|f| f.cell == cell) {
            Some(start) => {
                let repeated = via.or(self.frames[start].via.as_ref());
                chain.push(label(repeated));
                (repeated, &self.frames[start + 1..])
            }
            // In progress on a thread that waits on this one
            None => (via, &self.frames[..]),
        };
        chain.extend(
            rest.iter()
                .filter_map(|f| f.via.as_ref().map(ToString::to_string)),
        );
        chain.push(label(repeated));

        warn!(cycle = %chain.join(" -> "), "value-dependency cycle detected");
        ResolveError::CyclicReference { chain }
    }
}
