//! Per-key flow cache with explicit retain/release.
//!
//! Views that ask for the same key share one flow (and so one live
//! subscription). Each request returns a [`CacheLease`]; when the last lease
//! for a key is dropped the entry is evicted, and the next request builds a
//! fresh flow.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::ops::Deref;
use std::rc::{Rc, Weak};

use crate::flow::Flow;

struct Entry<T> {
    flow: Flow<T>,
    leases: usize,
}

type Entries<K, T> = RefCell<HashMap<K, Entry<T>>>;

pub struct FlowCache<K, T> {
    entries: Rc<Entries<K, T>>,
}

impl<K, T> Clone for FlowCache<K, T> {
    fn clone(&self) -> Self {
        FlowCache {
            entries: self.entries.clone(),
        }
    }
}

impl<K, T> Default for FlowCache<K, T> {
    fn default() -> Self {
        FlowCache {
            entries: Rc::new(RefCell::new(HashMap::new())),
        }
    }
}

impl<K, T> FlowCache<K, T>
where
    K: Eq + Hash + Clone + 'static,
    T: Clone + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Retains the flow for `key`, building it with `make` if absent.
    pub fn retain_or_insert_with(&self, key: &K, make: impl FnOnce() -> Flow<T>) -> CacheLease<K, T> {
        let existing = {
            let mut entries = self.entries.borrow_mut();
            entries.get_mut(key).map(|entry| {
                entry.leases += 1;
                entry.flow.clone()
            })
        };
        // `make` runs without the borrow held; it may touch this cache.
        let flow = match existing {
            Some(flow) => flow,
            None => {
                let flow = make();
                self.entries.borrow_mut().insert(
                    key.clone(),
                    Entry {
                        flow: flow.clone(),
                        leases: 1,
                    },
                );
                flow
            }
        };
        CacheLease {
            key: key.clone(),
            flow,
            entries: Rc::downgrade(&self.entries),
        }
    }

    /// Retains an existing entry.
    pub fn retain(&self, key: &K) -> Option<CacheLease<K, T>> {
        let mut entries = self.entries.borrow_mut();
        let entry = entries.get_mut(key)?;
        entry.leases += 1;
        Some(CacheLease {
            key: key.clone(),
            flow: entry.flow.clone(),
            entries: Rc::downgrade(&self.entries),
        })
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

/// A retained cache entry. Derefs to the cached [`Flow`].
pub struct CacheLease<K: Eq + Hash, T> {
    key: K,
    flow: Flow<T>,
    entries: Weak<Entries<K, T>>,
}

impl<K: Eq + Hash, T> CacheLease<K, T> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash, T> Deref for CacheLease<K, T> {
    type Target = Flow<T>;

    fn deref(&self) -> &Flow<T> {
        &self.flow
    }
}

impl<K: Eq + Hash, T> Drop for CacheLease<K, T> {
    fn drop(&mut self) {
        let Some(entries) = self.entries.upgrade() else {
            return;
        };
        let evicted = {
            let mut map = entries.borrow_mut();
            let release = match map.get_mut(&self.key) {
                Some(entry) => {
                    entry.leases -= 1;
                    entry.leases == 0
                }
                None => false,
            };
            if release {
                map.remove(&self.key)
            } else {
                None
            }
        };
        // Drop the flow after releasing the borrow; node teardown may re-enter.
        drop(evicted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use std::cell::Cell;

    #[test]
    fn shares_one_flow_per_key() {
        let ctx = Context::new();
        let cache: FlowCache<String, i32> = FlowCache::new();
        let built = Rc::new(Cell::new(0));

        let make = |built: Rc<Cell<i32>>| {
            let ctx = ctx.clone();
            move || {
                built.set(built.get() + 1);
                ctx.create_state_flow(1).flow()
            }
        };

        let a = cache.retain_or_insert_with(&"k".to_string(), make(built.clone()));
        let b = cache.retain_or_insert_with(&"k".to_string(), make(built.clone()));
        assert_eq!(built.get(), 1);
        assert_eq!(a.get(), b.get());
        assert_eq!(cache.len(), 1);

        drop(a);
        assert!(cache.contains(&"k".to_string()));
        drop(b);
        assert!(cache.is_empty());

        let _c = cache.retain_or_insert_with(&"k".to_string(), make(built.clone()));
        assert_eq!(built.get(), 2);
    }

    #[test]
    fn eviction_releases_the_node() {
        let ctx = Context::new();
        let cache: FlowCache<u32, i32> = FlowCache::new();
        let before = ctx.node_count();
        let lease = cache.retain_or_insert_with(&1, || ctx.create_state_flow(0).flow());
        assert_eq!(ctx.node_count(), before + 1);
        assert!(cache.retain(&2).is_none());
        drop(lease);
        assert_eq!(ctx.node_count(), before);
    }
}
