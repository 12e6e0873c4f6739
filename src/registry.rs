//! Reference registry: (resource, output key) → deferred value
//!
//! Write-once during declaration, read-only during synthesis. Uses FxHashMap
//! for faster hashing on small string keys.

use rustc_hash::FxHashMap;

use crate::deferred::{DeferredValue, RefToken};
use crate::error::StackError;
use crate::report::ResolveError;

#[derive(Debug, Default)]
pub struct ReferenceRegistry {
    entries: FxHashMap<RefToken, DeferredValue>,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an output; re-registering the same key is a declaration bug
    pub fn register(&mut self, token: RefToken, value: DeferredValue) -> Result<(), StackError> {
        if self.entries.contains_key(&token) {
            return Err(StackError::DuplicateReference {
                resource: token.resource,
                key: token.key,
            });
        }
        self.entries.insert(token, value);
        Ok(())
    }

    /// Look up a registered output (not necessarily resolved yet)
    pub fn lookup(&self, token: &RefToken) -> Result<&DeferredValue, ResolveError> {
        self.entries
            .get(token)
            .ok_or_else(|| ResolveError::UnknownReference {
                resource: token.resource.clone(),
                key: token.key.clone(),
            })
    }

    #[inline]
    pub fn contains(&self, token: &RefToken) -> bool {
        self.entries.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registered tokens, sorted
    pub fn tokens(&self) -> Vec<&RefToken> {
        let mut tokens: Vec<&RefToken> = self.entries.keys().collect();
        tokens.sort();
        tokens
    }

    /// Output keys exposed by one resource, sorted
    pub fn outputs_of(&self, resource: &str) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .entries
            .keys()
            .filter(|t| t.resource == resource)
            .map(|t| t.key.as_str())
            .collect();
        keys.sort_unstable();
        keys
    }
}
