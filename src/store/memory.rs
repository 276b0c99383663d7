//! In-process set store
//!
//! Mirrors the observable behaviour of the `ipset` backend closely enough
//! to drive the controller without privileges: member sets only accept IP
//! addresses, a capacity limit yields [`StoreError::SetFull`], and add/remove
//! are idempotent.

use super::{SetKind, SetStore, StoreError};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
struct MemorySet {
    kind: SetKind,
    members: BTreeSet<String>,
}

/// Set store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemorySetStore {
    sets: DashMap<String, MemorySet>,
    capacity: Option<usize>,
    creates: AtomicUsize,
}

impl MemorySetStore {
    /// Store with unbounded member sets
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose member sets hold at most `capacity` IPs each
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Whether `value` is a member of `set`
    pub fn contains(&self, set: &str, value: &str) -> bool {
        self.sets
            .get(set)
            .is_some_and(|s| s.members.contains(value))
    }

    /// Sorted members of `set` (empty if the set does not exist)
    pub fn members(&self, set: &str) -> Vec<String> {
        self.sets
            .get(set)
            .map(|s| s.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Sorted names of all existing sets
    pub fn set_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sets.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of `create` calls that actually created a set
    pub fn sets_created(&self) -> usize {
        self.creates.load(Ordering::Relaxed)
    }

    fn missing(op: &'static str, set: &str) -> StoreError {
        StoreError::Command {
            op,
            set: set.to_string(),
            stderr: "The set with the given name does not exist".to_string(),
        }
    }
}

#[async_trait]
impl SetStore for MemorySetStore {
    async fn exists(&self, set: &str) -> Result<bool, StoreError> {
        Ok(self.sets.contains_key(set))
    }

    async fn create(&self, set: &str, kind: SetKind) -> Result<(), StoreError> {
        match self.sets.entry(set.to_string()) {
            Entry::Occupied(existing) if existing.get().kind == kind => Ok(()),
            Entry::Occupied(_) => Err(StoreError::Command {
                op: "create",
                set: set.to_string(),
                stderr: "Set cannot be created: set with the same name already exists".to_string(),
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(MemorySet {
                    kind,
                    members: BTreeSet::new(),
                });
                self.creates.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    async fn destroy(&self, set: &str) -> Result<(), StoreError> {
        self.sets
            .remove(set)
            .map(|_| ())
            .ok_or_else(|| Self::missing("destroy", set))
    }

    async fn flush(&self, set: &str) -> Result<(), StoreError> {
        let mut entry = self.sets.get_mut(set).ok_or_else(|| Self::missing("flush", set))?;
        entry.members.clear();
        Ok(())
    }

    async fn add_member(&self, set: &str, value: &str) -> Result<(), StoreError> {
        match self.sets.get(set).map(|s| s.kind) {
            None => return Err(Self::missing("add", set)),
            Some(SetKind::Member) if value.parse::<IpAddr>().is_err() => {
                return Err(StoreError::Command {
                    op: "add",
                    set: set.to_string(),
                    stderr: format!("Syntax error: cannot parse {value}: resolving to IP address failed"),
                });
            }
            Some(SetKind::Umbrella) if !self.sets.contains_key(value) => {
                return Err(StoreError::Command {
                    op: "add",
                    set: set.to_string(),
                    stderr: "Set to be added/deleted/tested as element does not exist".to_string(),
                });
            }
            Some(_) => {}
        }

        // Re-acquire mutably; the read guard above must be released first.
        let mut entry = self.sets.get_mut(set).ok_or_else(|| Self::missing("add", set))?;
        if entry.members.contains(value) {
            return Ok(());
        }
        if let (SetKind::Member, Some(capacity)) = (entry.kind, self.capacity) {
            if entry.members.len() >= capacity {
                return Err(StoreError::SetFull {
                    set: set.to_string(),
                });
            }
        }
        entry.members.insert(value.to_string());
        Ok(())
    }

    async fn remove_member(&self, set: &str, value: &str) -> Result<(), StoreError> {
        let mut entry = self.sets.get_mut(set).ok_or_else(|| Self::missing("del", set))?;
        entry.members.remove(value);
        Ok(())
    }
}
