//! # Result Merger
//!
//! Collects one result per key from a fan-out and fires a listener once every
//! key has reported, either a value or its absence.
//!
//! ## Invariants
//! - The first report for a key wins; later ones are ignored.
//! - The listener fires exactly once, after the lock is released, with an
//!   owned map nobody else can mutate.
//! - Reports arriving after completion are dropped.

use std::collections::HashMap;
use std::collections::HashSet;
use std::hash::Hash;

use parking_lot::Mutex;

type Listener<K, V> = Box<dyn FnOnce(HashMap<K, V>) + Send>;

pub struct ResultMerger<K, V> {
    state: Mutex<MergeState<K, V>>,
}

struct MergeState<K, V> {
    expected: usize,
    values: HashMap<K, V>,
    missing: HashSet<K>,
    listener: Option<Listener<K, V>>,
}

impl<K, V> ResultMerger<K, V>
where
    K: Eq + Hash,
{
    /// Waits for `expected` distinct keys. With zero expected the listener fires
    /// immediately with an empty map.
    pub fn new(expected: usize, listener: impl FnOnce(HashMap<K, V>) + Send + 'static) -> Self {
        let listener: Option<Listener<K, V>> = if expected == 0 {
            listener(HashMap::new());
            None
        } else {
            Some(Box::new(listener))
        };
        Self {
            state: Mutex::new(MergeState {
                expected,
                values: HashMap::new(),
                missing: HashSet::new(),
                listener,
            }),
        }
    }

    pub fn report(&self, key: K, value: V) {
        let fire = {
            let mut state = self.state.lock();
            if state.listener.is_none() || state.has(&key) {
                return;
            }
            state.values.insert(key, value);
            state.take_if_complete()
        };
        if let Some((listener, values)) = fire {
            listener(values);
        }
    }

    /// Records that `key` produced no result.
    pub fn report_missing(&self, key: K) {
        let fire = {
            let mut state = self.state.lock();
            if state.listener.is_none() || state.has(&key) {
                return;
            }
            state.missing.insert(key);
            state.take_if_complete()
        };
        if let Some((listener, values)) = fire {
            listener(values);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().listener.is_none()
    }
}

impl<K: Eq + Hash, V> MergeState<K, V> {
    fn has(&self, key: &K) -> bool {
        self.values.contains_key(key) || self.missing.contains(key)
    }

    fn take_if_complete(&mut self) -> Option<(Listener<K, V>, HashMap<K, V>)> {
        if self.values.len() + self.missing.len() < self.expected {
            return None;
        }
        let listener = self.listener.take()?;
        self.missing.clear();
        Some((listener, std::mem::take(&mut self.values)))
    }
}
