// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the built-in native functions.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::object::ObjList;

#[test]
fn clock_returns_a_non_negative_number() {
    let mut heap = Heap::new();
    let mut strings = Table::new();
    let result = clock(&mut heap, &mut strings, &[]).expect("clock never fails");
    assert!(result.as_number().expect("clock returns a number") > 0.0);
}

#[test]
fn type_of_names_every_runtime_type() {
    let mut heap = Heap::new();
    let mut strings = Table::new();

    let nil_name = type_of(&mut heap, &mut strings, &[Value::nil()]).unwrap();
    assert_eq!(heap_string(&heap, nil_name), "nil");

    let number_name = type_of(&mut heap, &mut strings, &[Value::number(1.0)]).unwrap();
    assert_eq!(heap_string(&heap, number_name), "number");

    let list_ref = heap.alloc(ObjData::List(ObjList::default()));
    let list_name = type_of(&mut heap, &mut strings, &[Value::obj(list_ref)]).unwrap();
    assert_eq!(heap_string(&heap, list_name), "list");
}

#[test]
fn type_of_interns_its_result() {
    let mut heap = Heap::new();
    let mut strings = Table::new();
    let a = type_of(&mut heap, &mut strings, &[Value::nil()]).unwrap();
    let b = type_of(&mut heap, &mut strings, &[Value::nil()]).unwrap();
    assert_eq!(a, b, "repeated type_of calls should share the interned name");
}

#[test]
fn push_appends_and_returns_the_list() {
    let mut heap = Heap::new();
    let mut strings = Table::new();
    let list_ref = heap.alloc(ObjData::List(ObjList::default()));
    let list_val = Value::obj(list_ref);
    let result = push(&mut heap, &mut strings, &[list_val, Value::number(1.0)]).unwrap();
    assert_eq!(result, list_val);
    match &heap.get(list_ref).data {
        ObjData::List(list) => assert_eq!(list.items, vec![Value::number(1.0)]),
        _ => panic!("expected a list"),
    }
}

#[test]
fn push_on_a_non_list_is_an_error() {
    let mut heap = Heap::new();
    let mut strings = Table::new();
    assert!(push(&mut heap, &mut strings, &[Value::nil(), Value::number(1.0)]).is_err());
}

#[test]
fn pop_removes_the_last_element() {
    let mut heap = Heap::new();
    let mut strings = Table::new();
    let list_ref = heap.alloc(ObjData::List(ObjList {
        items: vec![Value::number(1.0), Value::number(2.0)],
    }));
    let popped = pop(&mut heap, &mut strings, &[Value::obj(list_ref)]).unwrap();
    assert_eq!(popped, Value::number(2.0));
}

#[test]
fn pop_on_an_empty_list_is_an_error() {
    let mut heap = Heap::new();
    let mut strings = Table::new();
    let list_ref = heap.alloc(ObjData::List(ObjList::default()));
    assert!(pop(&mut heap, &mut strings, &[Value::obj(list_ref)]).is_err());
}

#[test]
fn len_counts_list_elements_and_string_chars() {
    let mut heap = Heap::new();
    let mut strings = Table::new();
    let list_ref = heap.alloc(ObjData::List(ObjList {
        items: vec![Value::nil(), Value::nil(), Value::nil()],
    }));
    let list_len = len(&mut heap, &mut strings, &[Value::obj(list_ref)]).unwrap();
    assert_eq!(list_len, Value::number(3.0));

    let string_ref = heap.intern_string(&mut strings, "hello");
    let string_len = len(&mut heap, &mut strings, &[Value::obj(string_ref)]).unwrap();
    assert_eq!(string_len, Value::number(5.0));
}

#[test]
fn len_on_a_number_is_an_error() {
    let mut heap = Heap::new();
    let mut strings = Table::new();
    assert!(len(&mut heap, &mut strings, &[Value::number(1.0)]).is_err());
}

fn heap_string(heap: &Heap, value: Value) -> String {
    let r = value.as_obj().expect("type_of returns an object");
    match &heap.get(r).data {
        ObjData::String(s) => s.chars.clone(),
        _ => panic!("expected a string"),
    }
}
