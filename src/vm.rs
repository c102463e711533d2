// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Call-frame/value-stack dispatch loop.
//!
//! Grounded on the teacher's `vm::Vm::run` (`loop { fetch; decode; match
//! opcode { ... } }`, a `RuntimeError` enum with per-variant doc comments,
//! `execute_call` dispatching on the callee's `Value` variant, `build_closure`
//! reading `(is_local, index)` capture descriptors), generalized from the
//! teacher's register machine (`Process::x_regs`, `call_stack: [CallFrame; N]`)
//! to a stack machine: the fixed-size call-frame array idiom is kept, the
//! register file becomes a value stack indexed by `CallFrame::slot_base`.

#[cfg(test)]
mod vm_test;

use std::collections::HashSet;
use std::fmt;

use crate::chunk::{Chunk, OpCode};
use crate::compiler;
use crate::memory::Heap;
use crate::object::{
    NativeFn, ObjBoundMethod, ObjClass, ObjClosure, ObjData, ObjInstance, ObjList, ObjRef, ObjUpvalue,
    UpvalueState,
};
use crate::table::Table;
use crate::value::Value;

const MAX_FRAMES: usize = 64;
const STACK_MAX: usize = MAX_FRAMES * 256;

/// Why `Vm::run` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

/// A runtime fault, reported with a backtrace and a reset of both VM stacks
/// (spec.md §7); never unwinds as a Rust panic.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    TypeMismatch(String),
    UndefinedGlobal(String),
    UndefinedProperty(String),
    Arity { expected: u8, got: u8 },
    NotCallable,
    NotInstance,
    IndexOutOfRange(String),
    BadIndexType(&'static str),
    PermanentReassignment(String),
    StackOverflow,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::TypeMismatch(m) => write!(f, "{m}"),
            RuntimeError::UndefinedGlobal(name) => write!(f, "Undefined variable '{name}'."),
            RuntimeError::UndefinedProperty(name) => write!(f, "Undefined property '{name}'."),
            RuntimeError::Arity { expected, got } => {
                write!(f, "Expected {expected} arguments but got {got}.")
            }
            RuntimeError::NotCallable => write!(f, "Can only call functions and classes."),
            RuntimeError::NotInstance => write!(f, "Only instances have properties."),
            RuntimeError::IndexOutOfRange(m) => write!(f, "{m}"),
            RuntimeError::BadIndexType(m) => write!(f, "{m}"),
            RuntimeError::PermanentReassignment(name) => {
                write!(f, "Cannot reassign permanent variable '{name}'.")
            }
            RuntimeError::StackOverflow => write!(f, "Stack overflow."),
        }
    }
}

impl std::error::Error for RuntimeError {}

enum ControlFlow {
    Continue,
    Return,
}

struct CallFrame {
    closure: ObjRef,
    ip: usize,
    slot_base: usize,
}

/// The Fer virtual machine: one VM instance owns the heap, both global
/// tables, the string intern pool, and the open-upvalue list; everything
/// else (compiler, scanner) is transient per `interpret` call.
pub struct Vm {
    frames: Vec<CallFrame>,
    /// Pre-sized once and never reallocated mid-execution; open upvalues
    /// reference stack positions by index (not address), so — unlike the
    /// teacher's fixed `x_regs` array — growth past capacity would still be
    /// safe, but spec.md §9's "stable-address stack" concern is moot here by
    /// construction rather than worked around.
    stack: Vec<Value>,
    globals: Table,
    permanent_globals: HashSet<ObjRef>,
    strings: Table,
    heap: Heap,
    open_upvalues: Option<ObjRef>,
    init_string: ObjRef,
    gray: Vec<ObjRef>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    #[must_use]
    pub fn new() -> Self {
        let mut heap = Heap::new();
        heap.log_allocations = cfg!(feature = "gc-log");
        let mut strings = Table::new();
        let init_string = heap.intern_string(&mut strings, "init");
        Self {
            frames: Vec::with_capacity(MAX_FRAMES),
            stack: Vec::with_capacity(STACK_MAX),
            globals: Table::new(),
            permanent_globals: HashSet::new(),
            strings,
            heap,
            open_upvalues: None,
            init_string,
            gray: Vec::new(),
        }
    }

    /// Register a host callable under `name` in the global namespace (spec.md
    /// §6's `define_native`).
    pub fn define_native(&mut self, name: &str, arity: u8, function: NativeFn) {
        let name_ref = self.heap.intern_string(&mut self.strings, name);
        let native_ref = self.heap.alloc(ObjData::Native(crate::object::ObjNative {
            name: name.to_string(),
            arity,
            function,
        }));
        let hash = self.string_hash(name_ref);
        self.globals.set(name_ref, hash, Value::obj(native_ref));
    }

    /// Compile and run `source`. This is the `interpret` entry point from
    /// spec.md §6.
    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let function_ref = match compiler::compile(source, &mut self.heap, &mut self.strings) {
            Ok(f) => f,
            Err(_) => return InterpretResult::CompileError,
        };
        let closure_ref = self.heap.alloc(ObjData::Closure(ObjClosure {
            function: function_ref,
            upvalues: Vec::new(),
        }));
        self.stack.push(Value::obj(closure_ref));
        if let Err(err) = self.call(closure_ref, 0) {
            return self.runtime_error(&err);
        }
        self.run()
    }

    // --- stack helpers --------------------------------------------------

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow indicates a compiler bug")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn frame_ip(&self) -> usize {
        self.frames.last().expect("dispatch loop always has an active frame").ip
    }

    fn frame_slot_base(&self) -> usize {
        self.frames.last().expect("dispatch loop always has an active frame").slot_base
    }

    fn closure_function(&self, closure_ref: ObjRef) -> ObjRef {
        match &self.heap.get(closure_ref).data {
            ObjData::Closure(c) => c.function,
            _ => unreachable!("CallFrame::closure always names a closure"),
        }
    }

    fn chunk_ref(&self, function_ref: ObjRef) -> &Chunk {
        match &self.heap.get(function_ref).data {
            ObjData::Function(f) => &f.chunk,
            _ => unreachable!("closure_function always returns a function"),
        }
    }

    fn string_hash(&self, r: ObjRef) -> u32 {
        match &self.heap.get(r).data {
            ObjData::String(s) => s.hash,
            _ => unreachable!("caller guarantees a string ref"),
        }
    }

    fn string_content(&self, r: ObjRef) -> String {
        match &self.heap.get(r).data {
            ObjData::String(s) => s.chars.clone(),
            _ => unreachable!("caller guarantees a string ref"),
        }
    }

    fn read_byte(&mut self) -> u8 {
        let idx = self.frames.len() - 1;
        let closure_ref = self.frames[idx].closure;
        let ip = self.frames[idx].ip;
        self.frames[idx].ip += 1;
        let function_ref = self.closure_function(closure_ref);
        self.chunk_ref(function_ref).code[ip]
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_byte();
        let frame_idx = self.frames.len() - 1;
        let closure_ref = self.frames[frame_idx].closure;
        let function_ref = self.closure_function(closure_ref);
        self.chunk_ref(function_ref).constants[idx as usize]
    }

    // --- calling ----------------------------------------------------------

    fn call(&mut self, closure_ref: ObjRef, argc: u8) -> Result<(), RuntimeError> {
        let function_ref = self.closure_function(closure_ref);
        let arity = match &self.heap.get(function_ref).data {
            ObjData::Function(f) => f.arity,
            _ => unreachable!("closure_function always returns a function"),
        };
        if argc != arity {
            return Err(RuntimeError::Arity { expected: arity, got: argc });
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err(RuntimeError::StackOverflow);
        }
        let slot_base = self.stack.len() - argc as usize - 1;
        self.frames.push(CallFrame { closure: closure_ref, ip: 0, slot_base });
        Ok(())
    }

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), RuntimeError> {
        enum Callee {
            Closure,
            Native(NativeFn, u8),
            Class,
            Bound(Value, ObjRef),
        }
        let Some(r) = callee.as_obj() else { return Err(RuntimeError::NotCallable) };
        let kind = match &self.heap.get(r).data {
            ObjData::Closure(_) => Callee::Closure,
            ObjData::Native(n) => Callee::Native(n.function, n.arity),
            ObjData::Class(_) => Callee::Class,
            ObjData::BoundMethod(b) => Callee::Bound(b.receiver, b.method),
            _ => return Err(RuntimeError::NotCallable),
        };
        match kind {
            Callee::Closure => self.call(r, argc),
            Callee::Native(function, arity) => {
                if argc != arity {
                    return Err(RuntimeError::Arity { expected: arity, got: argc });
                }
                let start = self.stack.len() - argc as usize;
                let args: Vec<Value> = self.stack[start..].to_vec();
                match function(&mut self.heap, &mut self.strings, &args) {
                    Ok(result) => {
                        self.stack.truncate(start - 1);
                        self.push(result);
                        Ok(())
                    }
                    Err(message) => Err(RuntimeError::TypeMismatch(message)),
                }
            }
            Callee::Class => {
                let instance_ref = self.heap.alloc(ObjData::Instance(ObjInstance::new(r)));
                let start = self.stack.len() - argc as usize - 1;
                self.stack[start] = Value::obj(instance_ref);
                let init_hash = self.string_hash(self.init_string);
                let init = match &self.heap.get(r).data {
                    ObjData::Class(c) => c.methods.get(self.init_string, init_hash),
                    _ => unreachable!("Callee::Class matched a class"),
                };
                if let Some(init_val) = init {
                    let method_ref = init_val.as_obj().expect("methods store closures");
                    return self.call(method_ref, argc);
                }
                if argc != 0 {
                    return Err(RuntimeError::Arity { expected: 0, got: argc });
                }
                Ok(())
            }
            Callee::Bound(receiver, method) => {
                let start = self.stack.len() - argc as usize - 1;
                self.stack[start] = receiver;
                self.call(method, argc)
            }
        }
    }

    fn bind_method(&mut self, class_ref: ObjRef, name_ref: ObjRef, receiver: Value) -> Result<(), RuntimeError> {
        let hash = self.string_hash(name_ref);
        let method = match &self.heap.get(class_ref).data {
            ObjData::Class(c) => c.methods.get(name_ref, hash),
            _ => unreachable!("caller guarantees a class ref"),
        };
        let Some(method_val) = method else {
            return Err(RuntimeError::UndefinedProperty(self.string_content(name_ref)));
        };
        let method_ref = method_val.as_obj().expect("methods store closures");
        let bound_ref = self.heap.alloc(ObjData::BoundMethod(ObjBoundMethod { receiver, method: method_ref }));
        self.push(Value::obj(bound_ref));
        Ok(())
    }

    fn invoke_from_class(&mut self, class_ref: ObjRef, name_ref: ObjRef, argc: u8) -> Result<(), RuntimeError> {
        let hash = self.string_hash(name_ref);
        let method = match &self.heap.get(class_ref).data {
            ObjData::Class(c) => c.methods.get(name_ref, hash),
            _ => unreachable!("caller guarantees a class ref"),
        };
        let Some(method_val) = method else {
            return Err(RuntimeError::UndefinedProperty(self.string_content(name_ref)));
        };
        let method_ref = method_val.as_obj().expect("methods store closures");
        self.call(method_ref, argc)
    }

    // --- upvalues -----------------------------------------------------

    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut current = self.open_upvalues;
        let mut prev: Option<ObjRef> = None;
        while let Some(r) = current {
            let (state_slot, next) = match &self.heap.get(r).data {
                ObjData::Upvalue(u) => {
                    let s = match u.state {
                        UpvalueState::Open(s) => s,
                        UpvalueState::Closed(_) => break,
                    };
                    (s, u.next)
                }
                _ => unreachable!("open_upvalues list only links upvalues"),
            };
            if state_slot == slot {
                return r;
            }
            if state_slot < slot {
                break;
            }
            prev = Some(r);
            current = next;
        }
        let new_upvalue = self.heap.alloc(ObjData::Upvalue(ObjUpvalue { state: UpvalueState::Open(slot), next: current }));
        match prev {
            Some(p) => match &mut self.heap.get_mut(p).data {
                ObjData::Upvalue(u) => u.next = Some(new_upvalue),
                _ => unreachable!("prev was walked from open_upvalues"),
            },
            None => self.open_upvalues = Some(new_upvalue),
        }
        new_upvalue
    }

    fn close_upvalues(&mut self, from_slot: usize) {
        while let Some(r) = self.open_upvalues {
            let slot = match &self.heap.get(r).data {
                ObjData::Upvalue(u) => match u.state {
                    UpvalueState::Open(s) => s,
                    UpvalueState::Closed(_) => break,
                },
                _ => unreachable!("open_upvalues list only links upvalues"),
            };
            if slot < from_slot {
                break;
            }
            let value = self.stack[slot];
            let next = match &mut self.heap.get_mut(r).data {
                ObjData::Upvalue(u) => {
                    u.state = UpvalueState::Closed(value);
                    u.next
                }
                _ => unreachable!("open_upvalues list only links upvalues"),
            };
            self.open_upvalues = next;
        }
    }

    fn read_upvalue(&self, r: ObjRef) -> Value {
        match &self.heap.get(r).data {
            ObjData::Upvalue(u) => match u.state {
                UpvalueState::Open(slot) => self.stack[slot],
                UpvalueState::Closed(v) => v,
            },
            _ => unreachable!("GET_UPVALUE operand always names an upvalue"),
        }
    }

    fn write_upvalue(&mut self, r: ObjRef, value: Value) {
        match &mut self.heap.get_mut(r).data {
            ObjData::Upvalue(u) => match u.state {
                UpvalueState::Open(slot) => self.stack[slot] = value,
                UpvalueState::Closed(_) => u.state = UpvalueState::Closed(value),
            },
            _ => unreachable!("SET_UPVALUE operand always names an upvalue"),
        }
    }

    // --- the dispatch loop ----------------------------------------------

    fn run(&mut self) -> InterpretResult {
        loop {
            #[cfg(feature = "trace")]
            self.trace_instruction();

            let byte = self.read_byte();
            let Some(op) = OpCode::from_byte(byte) else {
                return self.runtime_error(&RuntimeError::TypeMismatch(format!("corrupted bytecode: opcode {byte}")));
            };

            match self.execute(op) {
                Ok(ControlFlow::Continue) => {}
                Ok(ControlFlow::Return) => return InterpretResult::Ok,
                Err(err) => return self.runtime_error(&err),
            }

            if self.heap.should_collect() {
                self.collect_garbage();
            }
        }
    }

    #[cfg_attr(not(feature = "trace"), allow(dead_code))]
    #[cfg(feature = "trace")]
    fn trace_instruction(&self) {
        print!("          ");
        for value in &self.stack {
            print!("[ {value} ]");
        }
        println!();
        let frame = self.frames.last().expect("dispatch loop always has an active frame");
        let function_ref = self.closure_function(frame.closure);
        let chunk = self.chunk_ref(function_ref);
        crate::disassemble::instruction(chunk, frame.ip, &self.heap);
    }

    fn execute(&mut self, op: OpCode) -> Result<ControlFlow, RuntimeError> {
        match op {
            OpCode::Constant => {
                let v = self.read_constant();
                self.push(v);
            }
            OpCode::Nil => self.push(Value::nil()),
            OpCode::True => self.push(Value::bool(true)),
            OpCode::False => self.push(Value::bool(false)),
            OpCode::Pop => {
                self.pop();
            }
            OpCode::GetLocal => {
                let slot = self.read_byte();
                let base = self.frame_slot_base();
                self.push(self.stack[base + slot as usize]);
            }
            OpCode::SetLocal => {
                let slot = self.read_byte();
                let base = self.frame_slot_base();
                self.stack[base + slot as usize] = self.peek(0);
            }
            OpCode::GetGlobal => self.op_get_global()?,
            OpCode::SetGlobal => self.op_set_global()?,
            OpCode::DefineGlobal => self.op_define_global(false),
            OpCode::DefineGlobalPerm => self.op_define_global(true),
            OpCode::GetUpvalue => {
                let slot = self.read_byte();
                let closure_ref = self.frames.last().expect("active frame").closure;
                let upvalue_ref = match &self.heap.get(closure_ref).data {
                    ObjData::Closure(c) => c.upvalues[slot as usize],
                    _ => unreachable!("CallFrame::closure always names a closure"),
                };
                self.push(self.read_upvalue(upvalue_ref));
            }
            OpCode::SetUpvalue => {
                let slot = self.read_byte();
                let closure_ref = self.frames.last().expect("active frame").closure;
                let upvalue_ref = match &self.heap.get(closure_ref).data {
                    ObjData::Closure(c) => c.upvalues[slot as usize],
                    _ => unreachable!("CallFrame::closure always names a closure"),
                };
                let v = self.peek(0);
                self.write_upvalue(upvalue_ref, v);
            }
            OpCode::GetProperty => self.op_get_property()?,
            OpCode::SetProperty => self.op_set_property()?,
            OpCode::GetSuper => self.op_get_super()?,
            OpCode::GetItem => self.op_get_item()?,
            OpCode::SetItem => self.op_set_item()?,
            OpCode::Equal => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::bool(a == b));
            }
            OpCode::Greater => self.binary_compare(|a, b| a > b)?,
            OpCode::Less => self.binary_compare(|a, b| a < b)?,
            OpCode::Add => self.op_add()?,
            OpCode::Subtract => self.binary_numeric(|a, b| a - b)?,
            OpCode::Multiply => self.binary_numeric(|a, b| a * b)?,
            OpCode::Divide => self.binary_numeric(|a, b| a / b)?,
            OpCode::Not => {
                let v = self.pop();
                self.push(Value::bool(!v.is_truthy()));
            }
            OpCode::Negate => {
                let v = self.pop();
                let Some(n) = v.as_number() else {
                    return Err(RuntimeError::TypeMismatch("Operand must be a number.".to_string()));
                };
                self.push(Value::number(-n));
            }
            OpCode::Print => {
                let v = self.pop();
                println!("{v}");
            }
            OpCode::Jump => {
                let offset = self.read_u16();
                self.frames.last_mut().expect("active frame").ip += offset as usize;
            }
            OpCode::JumpIfFalse => {
                let offset = self.read_u16();
                if !self.peek(0).is_truthy() {
                    self.frames.last_mut().expect("active frame").ip += offset as usize;
                }
            }
            OpCode::Loop => {
                let offset = self.read_u16();
                self.frames.last_mut().expect("active frame").ip -= offset as usize;
            }
            OpCode::Call => {
                let argc = self.read_byte();
                let callee = self.peek(argc as usize);
                self.call_value(callee, argc)?;
            }
            OpCode::Invoke => self.op_invoke()?,
            OpCode::SuperInvoke => self.op_super_invoke()?,
            OpCode::Closure => self.op_closure(),
            OpCode::CloseUpvalue => {
                let top = self.stack.len() - 1;
                self.close_upvalues(top);
                self.pop();
            }
            OpCode::List => self.op_list(),
            OpCode::Dictionary => self.op_dictionary()?,
            OpCode::Class => {
                let name_const = self.read_constant();
                let name_ref = name_const.as_obj().expect("CLASS operand is a string constant");
                let class_ref = self.heap.alloc(ObjData::Class(ObjClass::new(name_ref)));
                self.push(Value::obj(class_ref));
            }
            OpCode::Inherit => self.op_inherit()?,
            OpCode::Method => self.op_method(),
            OpCode::Return => return self.op_return(),
        }
        Ok(ControlFlow::Continue)
    }

    fn op_return(&mut self) -> Result<ControlFlow, RuntimeError> {
        let result = self.pop();
        let frame = self.frames.pop().expect("at least the top-level frame is active");
        self.close_upvalues(frame.slot_base);
        if self.frames.is_empty() {
            self.stack.pop();
            return Ok(ControlFlow::Return);
        }
        self.stack.truncate(frame.slot_base);
        self.push(result);
        Ok(ControlFlow::Continue)
    }

    fn binary_numeric(&mut self, f: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        let (Some(x), Some(y)) = (a.as_number(), b.as_number()) else {
            return Err(RuntimeError::TypeMismatch("Operands must be numbers.".to_string()));
        };
        self.push(Value::number(f(x, y)));
        Ok(())
    }

    fn binary_compare(&mut self, f: impl Fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        let (Some(x), Some(y)) = (a.as_number(), b.as_number()) else {
            return Err(RuntimeError::TypeMismatch("Operands must be numbers.".to_string()));
        };
        self.push(Value::bool(f(x, y)));
        Ok(())
    }

    fn op_add(&mut self) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
            self.push(Value::number(x + y));
            return Ok(());
        }
        if let (Some(ra), Some(rb)) = (a.as_obj(), b.as_obj()) {
            let strings = match (&self.heap.get(ra).data, &self.heap.get(rb).data) {
                (ObjData::String(s1), ObjData::String(s2)) => Some((s1.chars.clone(), s2.chars.clone())),
                _ => None,
            };
            if let Some((sa, sb)) = strings {
                let concatenated = format!("{sa}{sb}");
                let r = self.heap.intern_string(&mut self.strings, &concatenated);
                self.push(Value::obj(r));
                return Ok(());
            }
        }
        Err(RuntimeError::TypeMismatch("Operands must be two numbers or two strings.".to_string()))
    }

    fn op_get_global(&mut self) -> Result<(), RuntimeError> {
        let name_const = self.read_constant();
        let name_ref = name_const.as_obj().expect("GET_GLOBAL operand is a string constant");
        let hash = self.string_hash(name_ref);
        match self.globals.get(name_ref, hash) {
            Some(v) => {
                self.push(v);
                Ok(())
            }
            None => Err(RuntimeError::UndefinedGlobal(self.string_content(name_ref))),
        }
    }

    fn op_set_global(&mut self) -> Result<(), RuntimeError> {
        let name_const = self.read_constant();
        let name_ref = name_const.as_obj().expect("SET_GLOBAL operand is a string constant");
        if self.permanent_globals.contains(&name_ref) {
            return Err(RuntimeError::PermanentReassignment(self.string_content(name_ref)));
        }
        let hash = self.string_hash(name_ref);
        if !self.globals.contains(name_ref, hash) {
            return Err(RuntimeError::UndefinedGlobal(self.string_content(name_ref)));
        }
        let v = self.peek(0);
        self.globals.set(name_ref, hash, v);
        Ok(())
    }

    fn op_define_global(&mut self, permanent: bool) {
        let name_const = self.read_constant();
        let name_ref = name_const.as_obj().expect("DEFINE_GLOBAL operand is a string constant");
        let hash = self.string_hash(name_ref);
        let v = self.pop();
        self.globals.set(name_ref, hash, v);
        if permanent {
            self.permanent_globals.insert(name_ref);
        }
    }

    fn op_get_property(&mut self) -> Result<(), RuntimeError> {
        let name_const = self.read_constant();
        let name_ref = name_const.as_obj().expect("GET_PROPERTY operand is a string constant");
        let receiver = self.pop();
        let Some(inst_ref) = receiver.as_obj() else {
            return Err(RuntimeError::NotInstance);
        };
        let (field, class_ref) = match &self.heap.get(inst_ref).data {
            ObjData::Instance(inst) => {
                let hash = self.string_hash(name_ref);
                (inst.fields.get(name_ref, hash), inst.class)
            }
            _ => return Err(RuntimeError::NotInstance),
        };
        if let Some(v) = field {
            self.push(v);
            return Ok(());
        }
        self.bind_method(class_ref, name_ref, receiver)
    }

    fn op_set_property(&mut self) -> Result<(), RuntimeError> {
        let name_const = self.read_constant();
        let name_ref = name_const.as_obj().expect("SET_PROPERTY operand is a string constant");
        let value = self.pop();
        let receiver = self.pop();
        let Some(inst_ref) = receiver.as_obj() else {
            return Err(RuntimeError::NotInstance);
        };
        let hash = self.string_hash(name_ref);
        match &mut self.heap.get_mut(inst_ref).data {
            ObjData::Instance(inst) => {
                inst.fields.set(name_ref, hash, value);
            }
            _ => return Err(RuntimeError::NotInstance),
        }
        self.push(value);
        Ok(())
    }

    fn op_get_super(&mut self) -> Result<(), RuntimeError> {
        let name_const = self.read_constant();
        let name_ref = name_const.as_obj().expect("GET_SUPER operand is a string constant");
        let superclass = self.pop();
        let receiver = self.pop();
        let class_ref = superclass.as_obj().expect("compiler guarantees super resolves to a class");
        self.bind_method(class_ref, name_ref, receiver)
    }

    fn op_invoke(&mut self) -> Result<(), RuntimeError> {
        let name_const = self.read_constant();
        let name_ref = name_const.as_obj().expect("INVOKE operand is a string constant");
        let argc = self.read_byte();
        let receiver = self.peek(argc as usize);
        let Some(inst_ref) = receiver.as_obj() else {
            return Err(RuntimeError::NotInstance);
        };
        let (field, class_ref) = match &self.heap.get(inst_ref).data {
            ObjData::Instance(inst) => {
                let hash = self.string_hash(name_ref);
                (inst.fields.get(name_ref, hash), inst.class)
            }
            _ => return Err(RuntimeError::NotInstance),
        };
        if let Some(v) = field {
            let start = self.stack.len() - argc as usize - 1;
            self.stack[start] = v;
            return self.call_value(v, argc);
        }
        self.invoke_from_class(class_ref, name_ref, argc)
    }

    fn op_super_invoke(&mut self) -> Result<(), RuntimeError> {
        let name_const = self.read_constant();
        let name_ref = name_const.as_obj().expect("SUPER_INVOKE operand is a string constant");
        let argc = self.read_byte();
        let superclass = self.pop();
        let class_ref = superclass.as_obj().expect("compiler guarantees super resolves to a class");
        self.invoke_from_class(class_ref, name_ref, argc)
    }

    fn op_closure(&mut self) {
        let function_val = self.read_constant();
        let function_ref = function_val.as_obj().expect("CLOSURE operand is a function constant");
        let upvalue_count = match &self.heap.get(function_ref).data {
            ObjData::Function(f) => f.upvalue_count,
            _ => unreachable!("CLOSURE operand always names a function"),
        };
        let mut upvalues = Vec::with_capacity(upvalue_count);
        for _ in 0..upvalue_count {
            let is_local = self.read_byte() != 0;
            let index = self.read_byte();
            if is_local {
                let base = self.frame_slot_base();
                upvalues.push(self.capture_upvalue(base + index as usize));
            } else {
                let closure_ref = self.frames.last().expect("active frame").closure;
                let parent = match &self.heap.get(closure_ref).data {
                    ObjData::Closure(c) => c.upvalues[index as usize],
                    _ => unreachable!("CallFrame::closure always names a closure"),
                };
                upvalues.push(parent);
            }
        }
        let closure_ref = self.heap.alloc(ObjData::Closure(ObjClosure { function: function_ref, upvalues }));
        self.push(Value::obj(closure_ref));
    }

    fn op_list(&mut self) {
        let count = self.read_byte();
        let start = self.stack.len() - count as usize;
        let items = self.stack.split_off(start);
        let list_ref = self.heap.alloc(ObjData::List(ObjList { items }));
        self.push(Value::obj(list_ref));
    }

    fn op_dictionary(&mut self) -> Result<(), RuntimeError> {
        let count = self.read_byte();
        let start = self.stack.len() - count as usize * 2;
        let pairs = self.stack.split_off(start);
        let mut table = Table::new();
        for pair in pairs.chunks(2) {
            let key = pair[0];
            let value = pair[1];
            let Some(key_ref) = key.as_obj() else {
                return Err(RuntimeError::TypeMismatch("Dictionary keys must be strings.".to_string()));
            };
            let hash = match &self.heap.get(key_ref).data {
                ObjData::String(s) => s.hash,
                _ => return Err(RuntimeError::TypeMismatch("Dictionary keys must be strings.".to_string())),
            };
            table.set(key_ref, hash, value);
        }
        let dict_ref = self.heap.alloc(ObjData::Dict(crate::object::ObjDict { table }));
        self.push(Value::obj(dict_ref));
        Ok(())
    }

    fn op_get_item(&mut self) -> Result<(), RuntimeError> {
        let index = self.pop();
        let target = self.pop();
        let Some(r) = target.as_obj() else {
            return Err(RuntimeError::TypeMismatch("Only lists and dictionaries can be indexed.".to_string()));
        };
        let result = match &self.heap.get(r).data {
            ObjData::List(list) => {
                let Some(i) = index.as_number() else {
                    return Err(RuntimeError::BadIndexType("List index must be a number."));
                };
                let idx = i as i64;
                if idx < 0 || idx as usize >= list.items.len() {
                    return Err(RuntimeError::IndexOutOfRange(format!("List index {idx} out of range.")));
                }
                list.items[idx as usize]
            }
            ObjData::Dict(dict) => {
                let Some(key_ref) = index.as_obj() else {
                    return Err(RuntimeError::BadIndexType("Dict key must be a string."));
                };
                let hash = match &self.heap.get(key_ref).data {
                    ObjData::String(s) => s.hash,
                    _ => return Err(RuntimeError::BadIndexType("Dict key must be a string.")),
                };
                dict.table.get(key_ref, hash).unwrap_or(Value::nil())
            }
            _ => return Err(RuntimeError::TypeMismatch("Only lists and dictionaries can be indexed.".to_string())),
        };
        self.push(result);
        Ok(())
    }

    fn op_set_item(&mut self) -> Result<(), RuntimeError> {
        let value = self.pop();
        let index = self.pop();
        let target = self.pop();
        let Some(r) = target.as_obj() else {
            return Err(RuntimeError::TypeMismatch("Only lists and dictionaries can be indexed.".to_string()));
        };
        let is_dict = matches!(&self.heap.get(r).data, ObjData::Dict(_));
        if is_dict {
            let Some(key_ref) = index.as_obj() else {
                return Err(RuntimeError::BadIndexType("Dict key must be a string."));
            };
            let hash = match &self.heap.get(key_ref).data {
                ObjData::String(s) => s.hash,
                _ => return Err(RuntimeError::BadIndexType("Dict key must be a string.")),
            };
            match &mut self.heap.get_mut(r).data {
                ObjData::Dict(dict) => {
                    dict.table.set(key_ref, hash, value);
                }
                _ => unreachable!("is_dict checked above"),
            }
            self.push(value);
            return Ok(());
        }
        match &mut self.heap.get_mut(r).data {
            ObjData::List(list) => {
                let Some(i) = index.as_number() else {
                    return Err(RuntimeError::BadIndexType("List index must be a number."));
                };
                let idx = i as i64;
                if idx < 0 || idx as usize >= list.items.len() {
                    return Err(RuntimeError::IndexOutOfRange(format!("List index {idx} out of range.")));
                }
                list.items[idx as usize] = value;
            }
            _ => return Err(RuntimeError::TypeMismatch("Only lists and dictionaries can be indexed.".to_string())),
        }
        self.push(value);
        Ok(())
    }

    fn op_inherit(&mut self) -> Result<(), RuntimeError> {
        let superclass = self.peek(1);
        let subclass = self.peek(0);
        let Some(super_ref) = superclass.as_obj() else {
            return Err(RuntimeError::TypeMismatch("Superclass must be a class.".to_string()));
        };
        if !matches!(&self.heap.get(super_ref).data, ObjData::Class(_)) {
            return Err(RuntimeError::TypeMismatch("Superclass must be a class.".to_string()));
        }
        let sub_ref = subclass.as_obj().expect("compiler guarantees class on stack");
        let super_methods = match &self.heap.get(super_ref).data {
            ObjData::Class(c) => c.methods.clone(),
            _ => unreachable!("checked above"),
        };
        match &mut self.heap.get_mut(sub_ref).data {
            ObjData::Class(c) => c.methods.copy_from(&super_methods),
            _ => unreachable!("compiler guarantees class on stack"),
        }
        self.pop(); // subclass; superclass stays as the `super` local.
        Ok(())
    }

    fn op_method(&mut self) {
        let name_const = self.read_constant();
        let name_ref = name_const.as_obj().expect("METHOD operand is a string constant");
        let hash = self.string_hash(name_ref);
        let method = self.pop();
        let class_val = self.peek(0);
        let class_ref = class_val.as_obj().expect("compiler guarantees class on stack");
        match &mut self.heap.get_mut(class_ref).data {
            ObjData::Class(c) => {
                c.methods.set(name_ref, hash, method);
            }
            _ => unreachable!("compiler guarantees class on stack"),
        }
    }

    // --- errors and GC --------------------------------------------------

    fn runtime_error(&mut self, err: &RuntimeError) -> InterpretResult {
        tracing::error!(%err, "runtime error");
        eprintln!("{err}");
        for frame in self.frames.iter().rev() {
            let function_ref = self.closure_function(frame.closure);
            match &self.heap.get(function_ref).data {
                ObjData::Function(f) => {
                    let line = f.chunk.line_for(frame.ip.saturating_sub(1));
                    match f.name {
                        Some(name_ref) => eprintln!("[line {line}] in {}()", self.string_content(name_ref)),
                        None => eprintln!("[line {line}] in script"),
                    }
                }
                _ => unreachable!("closure_function always returns a function"),
            }
        }
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;
        InterpretResult::RuntimeError
    }

    fn collect_garbage(&mut self) {
        let mut gray = std::mem::take(&mut self.gray);
        gray.clear();

        for value in &self.stack {
            self.heap.mark_value(value, &mut gray);
        }
        for frame in &self.frames {
            self.heap.mark(frame.closure, &mut gray);
        }
        let mut upvalue = self.open_upvalues;
        while let Some(r) = upvalue {
            let next = match &self.heap.get(r).data {
                ObjData::Upvalue(u) => u.next,
                _ => unreachable!("open_upvalues list only links upvalues"),
            };
            self.heap.mark(r, &mut gray);
            upvalue = next;
        }
        for (key, value) in self.globals.iter() {
            self.heap.mark(key, &mut gray);
            self.heap.mark_value(value, &mut gray);
        }
        for &key in &self.permanent_globals {
            self.heap.mark(key, &mut gray);
        }
        self.heap.mark(self.init_string, &mut gray);

        self.heap.trace_all(&mut gray);
        self.heap.sweep_strings(&mut self.strings);
        self.heap.sweep();
        self.heap.update_next_gc();

        self.gray = gray;
    }
}
