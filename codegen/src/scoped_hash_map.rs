//! `ScopedHashMap`
//!
//! A hash map with a notion of scopes that can be entered and exited;
//! entries inserted inside a scope disappear when the scope is exited.
//! Value numbering uses one scope per dominator-tree level. Shadowing, one
//! scope redefining a key of an outer scope, is not supported.

use core::hash::Hash;
use rustc_hash::FxHashMap;

struct Val<K, V> {
    value: V,
    next_key: Option<K>,
    depth: usize,
}

/// A wrapper around an `FxHashMap` which adds the concept of scopes.
pub struct ScopedHashMap<K, V> {
    map: FxHashMap<K, Val<K, V>>,
    last_insert: Option<K>,
    current_depth: usize,
}

impl<K, V> ScopedHashMap<K, V>
where
    K: PartialEq + Eq + Hash + Clone,
{
    /// An empty map.
    pub fn new() -> Self {
        Self {
            map: FxHashMap::default(),
            last_insert: None,
            current_depth: 0,
        }
    }

    /// Look `key` up in any live scope.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key).map(|v| &v.value)
    }

    /// Insert `key` in the current scope. The key must not be present.
    pub fn insert(&mut self, key: K, value: V) {
        let depth = self.current_depth;
        let next_key = self.last_insert.replace(key.clone());
        let old = self.map.insert(
            key,
            Val {
                value,
                next_key,
                depth,
            },
        );
        debug_assert!(old.is_none(), "shadowing is not supported");
    }

    /// Enter a new scope.
    pub fn increment_depth(&mut self) {
        self.current_depth += 1;
    }

    /// Exit the current scope, removing everything inserted in it.
    pub fn decrement_depth(&mut self) {
        debug_assert!(self.current_depth > 0);
        while let Some(key) = self.last_insert.clone() {
            let entry = self.map.get(&key).expect("insertion chain is consistent");
            if entry.depth != self.current_depth {
                break;
            }
            let entry = self.map.remove(&key).unwrap();
            self.last_insert = entry.next_key;
        }
        self.current_depth -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_hide_their_entries() {
        let mut map: ScopedHashMap<&str, u32> = ScopedHashMap::new();
        map.insert("outer", 0);
        map.increment_depth();
        map.insert("a", 1);
        map.insert("b", 2);
        assert_eq!(map.get(&"a"), Some(&1));
        assert_eq!(map.get(&"outer"), Some(&0));
        map.decrement_depth();
        assert_eq!(map.get(&"a"), None);
        assert_eq!(map.get(&"b"), None);
        assert_eq!(map.get(&"outer"), Some(&0));
    }

    #[test]
    fn nested_scopes_unwind_in_order() {
        let mut map: ScopedHashMap<u32, u32> = ScopedHashMap::new();
        map.increment_depth();
        map.insert(1, 1);
        map.increment_depth();
        map.insert(2, 2);
        map.decrement_depth();
        assert_eq!(map.get(&2), None);
        assert_eq!(map.get(&1), Some(&1));
        map.decrement_depth();
        assert_eq!(map.get(&1), None);
    }
}
