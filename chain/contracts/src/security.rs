//! Shared security primitives for contract modules
//!
//! Provides the role checks consulted at the top of every privileged
//! operation and the per-resource reentrancy guard used by fund transfers.

use procurement_types::ids::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::hash::Hash;

use crate::errors::ProcurementError;

/// Reentrancy guard keyed by resource.
///
/// A fund-moving operation acquires the key of the resource it pays out
/// before making any outward call and releases it on completion. A nested
/// attempt on the same key fails; other keys stay available.
#[derive(Debug, Clone)]
pub struct ReentrancyGuard<K> {
    locked: HashSet<K>,
}

impl<K: Eq + Hash + Clone> ReentrancyGuard<K> {
    /// Create a guard with nothing locked.
    pub fn new() -> Self {
        Self {
            locked: HashSet::new(),
        }
    }

    /// Acquire `key`. Returns `false` if it is already held (reentrancy attempt).
    pub fn acquire(&mut self, key: &K) -> bool {
        self.locked.insert(key.clone())
    }

    /// Release `key`.
    pub fn release(&mut self, key: &K) {
        self.locked.remove(key);
    }

    pub fn is_locked(&self, key: &K) -> bool {
        self.locked.contains(key)
    }

    /// Number of keys currently held.
    pub fn held(&self) -> usize {
        self.locked.len()
    }
}

impl<K: Eq + Hash + Clone> Default for ReentrancyGuard<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner identity plus the auditor set.
///
/// The owner is an auditor from initialization. Auditors can only be
/// added, never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    owner: Address,
    auditors: BTreeSet<Address>,
}

impl AccessControl {
    /// Create access control with `owner` as the sole auditor.
    pub fn new(owner: Address) -> Self {
        let mut auditors = BTreeSet::new();
        auditors.insert(owner);
        Self { owner, auditors }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn is_owner(&self, caller: &Address) -> bool {
        self.owner == *caller
    }

    pub fn is_auditor(&self, caller: &Address) -> bool {
        self.auditors.contains(caller)
    }

    pub fn auditors(&self) -> impl Iterator<Item = &Address> {
        self.auditors.iter()
    }

    /// Add `auditor`. Owner-only. Returns whether the set grew; adding an
    /// existing auditor is a successful no-op.
    pub fn add_auditor(
        &mut self,
        caller: &Address,
        auditor: Address,
    ) -> Result<bool, ProcurementError> {
        self.require_owner(caller)?;
        Ok(self.auditors.insert(auditor))
    }

    pub fn require_owner(&self, caller: &Address) -> Result<(), ProcurementError> {
        if !self.is_owner(caller) {
            return Err(ProcurementError::NotOwner { caller: *caller });
        }
        Ok(())
    }

    pub fn require_auditor(&self, caller: &Address) -> Result<(), ProcurementError> {
        if !self.is_auditor(caller) {
            return Err(ProcurementError::NotAuditor { caller: *caller });
        }
        Ok(())
    }
}
