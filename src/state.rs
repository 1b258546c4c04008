//! Key/value state used to checkpoint iterators.
//!
//! Iterators write their position through a [`StateWriter`] and rebuild it from
//! a [`StateReader`]. Keys are namespaced by the iterator prefix with
//! [`full_name`], so nested iterators never collide. [`MemoryState`] is the
//! in-memory implementation of both sides; the
//! [`checkpoint`](crate::checkpoint) module persists it to disk.

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key under which `name` is stored for the iterator at `prefix`.
#[must_use]
pub fn full_name(prefix: &str, name: &str) -> String {
    format!("{prefix}:{name}")
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StateValue {
    Int(i64),
    Str(String),
}

impl StateValue {
    /// # Errors
    ///
    /// Returns an error if the value is not an integer.
    pub fn as_int(&self) -> Result<i64> {
        match self {
            Self::Int(v) => Ok(*v),
            other => bail!("expected an integer state value, found {other:?}"),
        }
    }
}

pub trait StateWriter {
    /// # Errors
    ///
    /// Returns an error if the underlying store rejects the write.
    fn write_scalar(&mut self, key: &str, value: StateValue) -> Result<()>;
}

pub trait StateReader {
    fn contains(&self, key: &str) -> bool;

    /// # Errors
    ///
    /// Returns an error if `key` is missing.
    fn read_scalar(&self, key: &str) -> Result<StateValue>;
}

/// Ordered in-memory key/value store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryState {
    entries: BTreeMap<String, StateValue>,
}

impl MemoryState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl StateWriter for MemoryState {
    fn write_scalar(&mut self, key: &str, value: StateValue) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

impl StateReader for MemoryState {
    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn read_scalar(&self, key: &str) -> Result<StateValue> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("checkpoint has no entry for key {key:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_state_round_trips_values() {
        let mut state = MemoryState::new();
        state
            .write_scalar(&full_name("Iterator::Range", "next"), StateValue::Int(4))
            .unwrap();
        assert!(state.contains("Iterator::Range:next"));
        assert_eq!(state.read_scalar("Iterator::Range:next").unwrap().as_int().unwrap(), 4);
        assert!(state.read_scalar("missing").is_err());
        assert!(StateValue::Str(String::new()).as_int().is_err());
    }
}
