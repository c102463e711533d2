// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the heap arena and collector.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::object::{ObjData, ObjList};

fn string(s: &str) -> ObjData {
    ObjData::String(ObjString::new(s.to_string()))
}

#[test]
fn alloc_returns_distinct_refs() {
    let mut heap = Heap::new();
    let a = heap.alloc(string("a"));
    let b = heap.alloc(string("b"));
    assert_ne!(a, b);
}

#[test]
fn intern_string_reuses_identical_content() {
    let mut heap = Heap::new();
    let mut strings = Table::new();
    let a = heap.intern_string(&mut strings, "hello");
    let b = heap.intern_string(&mut strings, "hello");
    assert_eq!(a, b);
}

#[test]
fn intern_string_distinguishes_different_content() {
    let mut heap = Heap::new();
    let mut strings = Table::new();
    let a = heap.intern_string(&mut strings, "hello");
    let b = heap.intern_string(&mut strings, "world");
    assert_ne!(a, b);
}

#[test]
fn find_interned_does_not_allocate() {
    let mut heap = Heap::new();
    let mut strings = Table::new();
    assert!(heap.find_interned(&strings, "absent").is_none());
    heap.intern_string(&mut strings, "present");
    assert!(heap.find_interned(&strings, "present").is_some());
}

#[test]
fn mark_is_idempotent() {
    let mut heap = Heap::new();
    let r = heap.alloc(string("a"));
    let mut gray = Vec::new();
    heap.mark(r, &mut gray);
    heap.mark(r, &mut gray);
    assert_eq!(gray.len(), 1, "marking an already-marked object should not re-enqueue it");
}

#[test]
fn sweep_frees_unmarked_objects_and_reuses_their_slot() {
    let mut heap = Heap::new();
    let garbage = heap.alloc(string("garbage"));
    // nothing marked: sweep should free `garbage` and return its slot
    heap.sweep();
    let reused = heap.alloc(string("new"));
    assert_eq!(garbage, reused, "freed slots should be reused by the next allocation");
}

#[test]
fn sweep_preserves_marked_objects_and_clears_mark_bit() {
    let mut heap = Heap::new();
    let keep = heap.alloc(string("keep"));
    let mut gray = Vec::new();
    heap.mark(keep, &mut gray);
    heap.sweep();
    assert!(!heap.get(keep).header.marked);
}

#[test]
fn sweep_strings_drops_unmarked_keys_before_general_sweep() {
    let mut heap = Heap::new();
    let mut strings = Table::new();
    heap.intern_string(&mut strings, "doomed");
    heap.sweep_strings(&mut strings);
    assert!(heap.find_interned(&strings, "doomed").is_none());
}

#[test]
fn trace_marks_list_elements() {
    let mut heap = Heap::new();
    let element = heap.alloc(string("inside"));
    let list = heap.alloc(ObjData::List(ObjList {
        items: vec![Value::obj(element)],
    }));
    let mut gray = Vec::new();
    heap.trace(list, &mut gray);
    assert!(gray.contains(&element));
}

#[test]
fn update_next_gc_resets_should_collect() {
    let mut heap = Heap::new();
    heap.alloc(string("x"));
    heap.update_next_gc();
    assert!(!heap.should_collect(), "right after recomputing next_gc there is nothing new to collect");
}
