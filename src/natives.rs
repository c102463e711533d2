// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! A small set of native functions, registered into a fresh [`crate::vm::Vm`]
//! via [`crate::vm::Vm::define_native`].
//!
//! Grounded on the teacher's `Value::NativeFn(id)` dispatch
//! (`vm::call_value` matching out to `intrinsics::call_intrinsic`) and its
//! `intrinsics/` module, generalized from a fixed by-id table to a
//! name-keyed registry. Deliberately non-exhaustive: a full standard
//! library is an external collaborator's job (see `lib.rs`'s module docs).

use std::time::{SystemTime, UNIX_EPOCH};

use crate::memory::Heap;
use crate::object::ObjData;
use crate::table::Table;
use crate::value::Value;
use crate::vm::Vm;

/// Install every native function this module provides into `vm`.
pub fn install(vm: &mut Vm) {
    vm.define_native("clock", 0, clock);
    vm.define_native("type_of", 1, type_of);
    vm.define_native("push", 2, push);
    vm.define_native("pop", 1, pop);
    vm.define_native("len", 1, len);
}

/// Seconds since the Unix epoch, as a float.
fn clock(_heap: &mut Heap, _strings: &mut Table, _args: &[Value]) -> Result<Value, String> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| "system clock is before the Unix epoch".to_string())?;
    Ok(Value::number(elapsed.as_secs_f64()))
}

/// The runtime type name of a value (`"nil"`, `"bool"`, `"number"`,
/// `"string"`, `"list"`, `"dict"`, `"function"`, `"class"`, `"instance"`).
fn type_of(heap: &mut Heap, strings: &mut Table, args: &[Value]) -> Result<Value, String> {
    let value = args[0];
    let name = match value.as_obj() {
        Some(r) => match &heap.get(r).data {
            ObjData::String(_) => "string",
            ObjData::List(_) => "list",
            ObjData::Dict(_) => "dict",
            ObjData::Function(_) | ObjData::Closure(_) | ObjData::Native(_) | ObjData::BoundMethod(_) => "function",
            ObjData::Upvalue(_) => "upvalue",
            ObjData::Class(_) => "class",
            ObjData::Instance(_) => "instance",
        },
        None => value.type_name(),
    };
    Ok(Value::obj(heap.intern_string(strings, name)))
}

/// Append `value` to `list`, returning the list itself.
fn push(heap: &mut Heap, _strings: &mut Table, args: &[Value]) -> Result<Value, String> {
    let list_val = args[0];
    let value = args[1];
    let Some(r) = list_val.as_obj() else {
        return Err("push expects a list as its first argument.".to_string());
    };
    match &mut heap.get_mut(r).data {
        ObjData::List(list) => {
            list.items.push(value);
            Ok(list_val)
        }
        _ => Err("push expects a list as its first argument.".to_string()),
    }
}

/// Remove and return the last element of `list`.
fn pop(heap: &mut Heap, _strings: &mut Table, args: &[Value]) -> Result<Value, String> {
    let list_val = args[0];
    let Some(r) = list_val.as_obj() else {
        return Err("pop expects a list as its argument.".to_string());
    };
    match &mut heap.get_mut(r).data {
        ObjData::List(list) => list.items.pop().ok_or_else(|| "pop from an empty list.".to_string()),
        _ => Err("pop expects a list as its argument.".to_string()),
    }
}

/// The element count of a list, or the rune count of a string.
fn len(heap: &mut Heap, _strings: &mut Table, args: &[Value]) -> Result<Value, String> {
    let value = args[0];
    let Some(r) = value.as_obj() else {
        return Err("len expects a list or string.".to_string());
    };
    match &heap.get(r).data {
        ObjData::List(list) => Ok(Value::number(list.items.len() as f64)),
        ObjData::String(s) => Ok(Value::number(s.chars.chars().count() as f64)),
        _ => Err("len expects a list or string.".to_string()),
    }
}

#[cfg(test)]
mod natives_test;
