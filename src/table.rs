// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Open-addressed hash table keyed by interned string refs.
//!
//! Not present in the teacher, whose heap maps are association lists of
//! interned keywords (`value::heap::HeapMap`). This is a from-scratch
//! implementation of the open-addressing/tombstone/linear-probing design,
//! since the spec's load-factor and `findString` invariants are tested
//! directly and an association list can't satisfy them.


use crate::object::ObjRef;
use crate::value::Value;

const LOAD_FACTOR_MAX: f64 = 0.75;
const INITIAL_CAPACITY: usize = 8;

#[derive(Debug, Clone)]
struct Entry {
    /// `None` means either empty or tombstone; distinguished by `value`.
    key: Option<ObjRef>,
    hash: u32,
    /// Tombstone is represented as `key: None, value: Value::Bool(true)`;
    /// empty is `key: None, value: Value::Nil`, matching spec.md §4.3.
    value: Value,
}

impl Entry {
    fn empty() -> Self {
        Self {
            key: None,
            hash: 0,
            value: Value::nil(),
        }
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && self.value.as_bool() == Some(true)
    }

    fn is_empty(&self) -> bool {
        self.key.is_none() && !self.is_tombstone()
    }
}

/// An open-addressed table from interned string keys to values.
#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: Vec<Entry>,
    /// Live entries plus tombstones, used for the load-factor check.
    count: usize,
}

impl Table {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            count: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.key.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Find the slot a key (identified by hash, compared by `ObjRef`
    /// identity) would occupy: the first empty slot, reusing the first
    /// tombstone seen along the probe sequence.
    fn find_entry(entries: &[Entry], key: ObjRef, hash: u32) -> usize {
        let capacity = entries.len();
        let mut index = (hash as usize) & (capacity - 1);
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            if entry.key.is_none() {
                if entry.is_tombstone() {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                } else {
                    return tombstone.unwrap_or(index);
                }
            } else if entry.key == Some(key) {
                return index;
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn grow(&mut self, new_capacity: usize) {
        let mut new_entries = vec![Entry::empty(); new_capacity];
        let mut live = 0;
        for entry in self.entries.drain(..) {
            let Some(key) = entry.key else { continue };
            let index = Self::find_entry(&new_entries, key, entry.hash);
            new_entries[index] = Entry {
                key: Some(key),
                hash: entry.hash,
                value: entry.value,
            };
            live += 1;
        }
        self.entries = new_entries;
        self.count = live;
    }

    /// Insert or overwrite `key`. Returns `true` if this created a new
    /// entry (as opposed to overwriting an existing one).
    pub fn set(&mut self, key: ObjRef, hash: u32, value: Value) -> bool {
        if self.entries.is_empty() {
            self.grow(INITIAL_CAPACITY);
        } else if (self.count + 1) as f64 > self.capacity() as f64 * LOAD_FACTOR_MAX {
            self.grow(self.capacity() * 2);
        }
        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_none();
        if is_new && !entry.is_tombstone() {
            self.count += 1;
        }
        *entry = Entry {
            key: Some(key),
            hash,
            value,
        };
        is_new
    }

    #[must_use]
    pub fn get(&self, key: ObjRef, hash: u32) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &self.entries[index];
        (entry.key == Some(key)).then(|| entry.value.clone())
    }

    #[must_use]
    pub fn contains(&self, key: ObjRef, hash: u32) -> bool {
        self.get(key, hash).is_some()
    }

    /// Delete `key`, leaving a tombstone in its place so later probes past
    /// it still find entries that were inserted after a collision.
    pub fn delete(&mut self, key: ObjRef, hash: u32) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        if entry.key != Some(key) {
            return false;
        }
        entry.key = None;
        entry.value = Value::bool(true);
        true
    }

    /// Copy every live entry from `other` into `self`, overwriting on
    /// collision. Used for class-inheritance method-table copying.
    pub fn copy_from(&mut self, other: &Table) {
        for entry in &other.entries {
            if let Some(key) = entry.key {
                self.set(key, entry.hash, entry.value.clone());
            }
        }
    }

    /// Probe the table for a key whose hash matches and whose content
    /// (resolved through `matches`) equals the sought bytes. Backs
    /// [`crate::memory::Heap`]'s string interning: the caller doesn't yet
    /// have an `ObjRef` for a string it might not need to allocate, so it
    /// probes by hash and confirms identity via byte comparison instead.
    pub fn find_string(&self, hash: u32, matches: impl Fn(ObjRef) -> bool) -> Option<ObjRef> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.capacity();
        let mut index = (hash as usize) & (capacity - 1);
        loop {
            let entry = &self.entries[index];
            if entry.is_empty() {
                return None;
            }
            if let Some(key) = entry.key {
                if entry.hash == hash && matches(key) {
                    return Some(key);
                }
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    /// Iterate live (key, value) pairs. Used by the collector to mark
    /// every key and value reachable from a globals/permanent-globals/
    /// method/field table.
    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, &Value)> {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, &e.value)))
    }

    /// Remove every entry whose key is not in `keep`. Used for the
    /// string-pool sweep: entries whose key object didn't survive marking
    /// are erased before the general sweep frees them.
    pub fn retain_keys(&mut self, mut keep: impl FnMut(ObjRef) -> bool) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                if !keep(key) {
                    entry.key = None;
                    entry.value = Value::bool(true);
                }
            }
        }
    }
}
