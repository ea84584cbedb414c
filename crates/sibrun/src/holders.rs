//! # Connection Holders
//!
//! The set of tokens keeping one target's connection alive, plus alias edges
//! that let one holder's removal cascade to others.
//!
//! ## Invariants
//! - Aliases are one-way: adding or removing `key` adds or removes every
//!   `value` aliased to it, transitively. A `value` never touches its `key`.
//! - Cascades visit each holder once, so alias cycles terminate.
//! - Removing a holder forgets every edge from or to it, so per-call aliases
//!   do not outlive their call.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::ids::Holder;

#[derive(Debug, Default)]
pub(crate) struct HolderSet {
    members: HashSet<Holder>,
    aliases: HashMap<Holder, HashSet<Holder>>,
}

impl HolderSet {
    /// Adds `holder` and everything aliased to it. Returns what was new.
    pub fn insert(&mut self, holder: Holder) -> Vec<Holder> {
        let mut added = Vec::new();
        for next in self.closure(holder) {
            if self.members.insert(next) {
                added.push(next);
            }
        }
        added
    }

    pub fn add_alias(&mut self, key: Holder, value: Holder) {
        self.aliases.entry(key).or_default().insert(value);
    }

    /// Removes `holder` and everything aliased to it, along with their alias
    /// edges. Returns what was removed.
    pub fn remove(&mut self, holder: Holder) -> Vec<Holder> {
        let closure = self.closure(holder);
        let mut removed = Vec::new();
        for next in &closure {
            if self.members.remove(next) {
                removed.push(*next);
            }
        }
        self.forget_edges(&closure);
        removed
    }

    fn forget_edges(&mut self, gone: &[Holder]) {
        if self.aliases.is_empty() {
            return;
        }
        let gone: HashSet<Holder> = gone.iter().copied().collect();
        self.aliases.retain(|key, values| {
            values.retain(|value| !gone.contains(value));
            !gone.contains(key) && !values.is_empty()
        });
    }

    /// `holder` followed by every holder reachable through alias edges.
    fn closure(&self, holder: Holder) -> Vec<Holder> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![holder];
        while let Some(next) = stack.pop() {
            if !visited.insert(next) {
                continue;
            }
            order.push(next);
            if let Some(values) = self.aliases.get(&next) {
                stack.extend(values.iter().copied());
            }
        }
        order
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }
}
