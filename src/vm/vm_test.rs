// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the VM's dispatch loop, calling convention, and error paths.
//! Globals are inspected directly (rather than via `print`, which writes to
//! stdout) by interning the same name into the VM's own string pool and
//! probing `vm.globals` — legitimate here since this module is a child of
//! `vm` and shares its private state.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;

fn global(vm: &mut Vm, name: &str) -> Option<Value> {
    let name_ref = vm.heap.intern_string(&mut vm.strings, name);
    let hash = vm.string_hash(name_ref);
    vm.globals.get(name_ref, hash)
}

fn run(source: &str) -> Vm {
    let mut vm = Vm::new();
    let result = vm.interpret(source);
    assert_eq!(result, InterpretResult::Ok, "expected {source:?} to run cleanly");
    vm
}

#[test]
fn arithmetic_and_global_assignment() {
    let mut vm = run("var x = 1 + 2 * 3;");
    assert_eq!(global(&mut vm, "x"), Some(Value::number(7.0)));
}

#[test]
fn string_concatenation() {
    let mut vm = run(r#"var s = "foo" + "bar";"#);
    let v = global(&mut vm, "s").expect("s is defined");
    let r = v.as_obj().expect("s is a string object");
    match &vm.heap.get(r).data {
        ObjData::String(s) => assert_eq!(s.chars, "foobar"),
        _ => panic!("expected a string"),
    }
}

#[test]
fn adding_number_to_string_is_a_type_mismatch() {
    let mut vm = Vm::new();
    let result = vm.interpret(r#"1 + "a";"#);
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn function_call_returns_a_value_to_the_global() {
    let mut vm = run("fun add(a, b) { return a + b; } var r = add(2, 3);");
    assert_eq!(global(&mut vm, "r"), Some(Value::number(5.0)));
}

#[test]
fn closures_capture_enclosing_locals_by_reference() {
    let mut vm = run(
        "
        fun make_counter() {
            var count = 0;
            fun inc() {
                count = count + 1;
                return count;
            }
            return inc;
        }
        var counter = make_counter();
        var a = counter();
        var b = counter();
        ",
    );
    assert_eq!(global(&mut vm, "a"), Some(Value::number(1.0)));
    assert_eq!(global(&mut vm, "b"), Some(Value::number(2.0)));
}

#[test]
fn class_instantiation_and_method_call() {
    let mut vm = run(
        "
        class Counter {
            init() { this.n = 0; }
            bump() { this.n = this.n + 1; return this.n; }
        }
        var c = Counter();
        var first = c.bump();
        var second = c.bump();
        ",
    );
    assert_eq!(global(&mut vm, "first"), Some(Value::number(1.0)));
    assert_eq!(global(&mut vm, "second"), Some(Value::number(2.0)));
}

#[test]
fn inherited_methods_are_callable_on_the_subclass() {
    let mut vm = run(
        "
        class Animal {
            speak() { return 1; }
        }
        class Dog < Animal {}
        var d = Dog();
        var r = d.speak();
        ",
    );
    assert_eq!(global(&mut vm, "r"), Some(Value::number(1.0)));
}

#[test]
fn super_call_reaches_the_parent_method() {
    let mut vm = run(
        "
        class Animal {
            speak() { return 1; }
        }
        class Dog < Animal {
            speak() { return super.speak() + 1; }
        }
        var r = Dog().speak();
        ",
    );
    assert_eq!(global(&mut vm, "r"), Some(Value::number(2.0)));
}

#[test]
fn list_literal_index_get_and_set() {
    let mut vm = run(
        "
        var xs = [1, 2, 3];
        xs[1] = 9;
        var got = xs[1];
        ",
    );
    assert_eq!(global(&mut vm, "got"), Some(Value::number(9.0)));
}

#[test]
fn list_index_out_of_range_is_a_runtime_error() {
    let mut vm = Vm::new();
    let result = vm.interpret("var xs = [1]; xs[5];");
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn dict_literal_and_field_lookup() {
    let mut vm = run(
        r#"
        var d = {"a": 1, "b": 2};
        var got = d["b"];
        "#,
    );
    assert_eq!(global(&mut vm, "got"), Some(Value::number(2.0)));
}

#[test]
fn calling_a_non_callable_is_a_runtime_error() {
    let mut vm = Vm::new();
    let result = vm.interpret("var x = 1; x();");
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn calling_with_wrong_arity_is_a_runtime_error() {
    let mut vm = Vm::new();
    let result = vm.interpret("fun f(a) { return a; } f();");
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn undefined_global_read_is_a_runtime_error() {
    let mut vm = Vm::new();
    let result = vm.interpret("print undefined_name;");
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn reassigning_a_permanent_global_is_a_runtime_error() {
    let mut vm = Vm::new();
    let result = vm.interpret("perm x = 1; x = 2;");
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn runtime_error_resets_the_stack_and_frames() {
    let mut vm = Vm::new();
    let result = vm.interpret("var x = 1; x();");
    assert_eq!(result, InterpretResult::RuntimeError);
    assert!(vm.stack.is_empty());
    assert!(vm.frames.is_empty());
    assert!(vm.open_upvalues.is_none());
}

#[test]
fn a_runtime_error_does_not_poison_later_interpret_calls() {
    let mut vm = Vm::new();
    assert_eq!(vm.interpret("x();"), InterpretResult::RuntimeError);
    assert_eq!(vm.interpret("var y = 1 + 1;"), InterpretResult::Ok);
    assert_eq!(global(&mut vm, "y"), Some(Value::number(2.0)));
}

#[test]
fn while_loop_with_break_and_continue() {
    let mut vm = run(
        "
        var sum = 0;
        var i = 0;
        while (true) {
            i = i + 1;
            if (i > 5) { break; }
            if (i == 3) { continue; }
            sum = sum + i;
        }
        ",
    );
    // 1 + 2 + 4 + 5 = 12 (3 is skipped by continue)
    assert_eq!(global(&mut vm, "sum"), Some(Value::number(12.0)));
}

#[test]
fn deeply_recursive_calls_overflow_the_frame_stack() {
    let mut vm = Vm::new();
    let result = vm.interpret("fun rec(n) { return rec(n + 1); } rec(0);");
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn native_function_is_callable_after_define_native() {
    let mut vm = Vm::new();
    fn double(_heap: &mut crate::memory::Heap, _strings: &mut Table, args: &[Value]) -> Result<Value, String> {
        Ok(Value::number(args[0].as_number().unwrap() * 2.0))
    }
    vm.define_native("double", 1, double);
    let result = vm.interpret("var r = double(21);");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(global(&mut vm, "r"), Some(Value::number(42.0)));
}
