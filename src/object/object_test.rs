// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the heap object model.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;

#[test]
fn fnv1a_hash_is_deterministic() {
    assert_eq!(fnv1a_hash(b"hello"), fnv1a_hash(b"hello"));
}

#[test]
fn fnv1a_hash_distinguishes_different_bytes() {
    assert_ne!(fnv1a_hash(b"hello"), fnv1a_hash(b"world"));
}

#[test]
fn obj_string_new_precomputes_its_hash() {
    let s = ObjString::new("hello".to_string());
    assert_eq!(s.hash, fnv1a_hash(b"hello"));
}

#[test]
fn obj_ref_equality_is_by_slot_not_value() {
    let a = ObjRef(3);
    let b = ObjRef(3);
    let c = ObjRef(4);
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn type_name_covers_every_variant() {
    let class = ObjClass::new(ObjRef(0));
    let instance = ObjInstance::new(ObjRef(0));
    assert_eq!(ObjData::String(ObjString::new("x".into())).type_name(), "string");
    assert_eq!(ObjData::List(ObjList::default()).type_name(), "list");
    assert_eq!(ObjData::Dict(ObjDict::default()).type_name(), "dict");
    assert_eq!(ObjData::Class(class).type_name(), "class");
    assert_eq!(ObjData::Instance(instance).type_name(), "instance");
}

#[test]
fn function_new_has_no_name_for_the_synthetic_script() {
    let f = ObjFunction::new(None);
    assert!(f.name.is_none());
    assert_eq!(f.arity, 0);
    assert!(f.chunk.is_empty());
}

#[test]
fn class_new_starts_with_an_empty_method_table() {
    let class = ObjClass::new(ObjRef(1));
    assert!(class.methods.is_empty());
}

#[test]
fn instance_new_starts_with_an_empty_field_table() {
    let instance = ObjInstance::new(ObjRef(1));
    assert!(instance.fields.is_empty());
}
