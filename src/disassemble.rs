// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! A pure debug printer: given a [`Chunk`] (and a [`Heap`] to resolve object
//! constants through), print one instruction or a whole chunk to stdout.
//!
//! Grounded on the teacher's `compiler::disassemble` helper (same
//! `offset/name/operand` column layout, same "repeat the line number only
//! when it changes" convention). Driven by [`crate::vm::Vm`]'s `trace`
//! feature hook; never called from non-test, non-`trace` code paths.

use crate::chunk::{Chunk, OpCode};
use crate::memory::Heap;
use crate::object::ObjData;
use crate::value::Value;

/// Print every instruction in `chunk`, prefixed by a `== name ==` banner.
pub fn chunk(chunk: &Chunk, name: &str, heap: &Heap) {
    println!("== {name} ==");
    let mut offset = 0;
    while offset < chunk.len() {
        offset = instruction(chunk, offset, heap);
    }
}

/// Print one instruction at `offset`, returning the offset of the next one.
pub fn instruction(chunk: &Chunk, offset: usize, heap: &Heap) -> usize {
    print!("{offset:04} ");
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        print!("   | ");
    } else {
        print!("{:4} ", chunk.lines[offset]);
    }

    let Some(op) = OpCode::from_byte(chunk.code[offset]) else {
        println!("unknown opcode {}", chunk.code[offset]);
        return offset + 1;
    };

    match op {
        OpCode::Constant => constant_instruction("OP_CONSTANT", chunk, offset, heap),
        OpCode::Nil => simple_instruction("OP_NIL", offset),
        OpCode::True => simple_instruction("OP_TRUE", offset),
        OpCode::False => simple_instruction("OP_FALSE", offset),
        OpCode::Pop => simple_instruction("OP_POP", offset),
        OpCode::GetLocal => byte_instruction("OP_GET_LOCAL", chunk, offset),
        OpCode::SetLocal => byte_instruction("OP_SET_LOCAL", chunk, offset),
        OpCode::GetGlobal => constant_instruction("OP_GET_GLOBAL", chunk, offset, heap),
        OpCode::SetGlobal => constant_instruction("OP_SET_GLOBAL", chunk, offset, heap),
        OpCode::DefineGlobal => constant_instruction("OP_DEFINE_GLOBAL", chunk, offset, heap),
        OpCode::DefineGlobalPerm => constant_instruction("OP_DEFINE_GLOBAL_PERM", chunk, offset, heap),
        OpCode::GetUpvalue => byte_instruction("OP_GET_UPVALUE", chunk, offset),
        OpCode::SetUpvalue => byte_instruction("OP_SET_UPVALUE", chunk, offset),
        OpCode::GetProperty => constant_instruction("OP_GET_PROPERTY", chunk, offset, heap),
        OpCode::SetProperty => constant_instruction("OP_SET_PROPERTY", chunk, offset, heap),
        OpCode::GetSuper => constant_instruction("OP_GET_SUPER", chunk, offset, heap),
        OpCode::GetItem => simple_instruction("OP_GET_ITEM", offset),
        OpCode::SetItem => simple_instruction("OP_SET_ITEM", offset),
        OpCode::Equal => simple_instruction("OP_EQUAL", offset),
        OpCode::Greater => simple_instruction("OP_GREATER", offset),
        OpCode::Less => simple_instruction("OP_LESS", offset),
        OpCode::Add => simple_instruction("OP_ADD", offset),
        OpCode::Subtract => simple_instruction("OP_SUBTRACT", offset),
        OpCode::Multiply => simple_instruction("OP_MULTIPLY", offset),
        OpCode::Divide => simple_instruction("OP_DIVIDE", offset),
        OpCode::Not => simple_instruction("OP_NOT", offset),
        OpCode::Negate => simple_instruction("OP_NEGATE", offset),
        OpCode::Print => simple_instruction("OP_PRINT", offset),
        OpCode::Jump => jump_instruction("OP_JUMP", 1, chunk, offset),
        OpCode::JumpIfFalse => jump_instruction("OP_JUMP_IF_FALSE", 1, chunk, offset),
        OpCode::Loop => jump_instruction("OP_LOOP", -1, chunk, offset),
        OpCode::Call => byte_instruction("OP_CALL", chunk, offset),
        OpCode::Invoke => invoke_instruction("OP_INVOKE", chunk, offset, heap),
        OpCode::SuperInvoke => invoke_instruction("OP_SUPER_INVOKE", chunk, offset, heap),
        OpCode::Closure => closure_instruction(chunk, offset, heap),
        OpCode::CloseUpvalue => simple_instruction("OP_CLOSE_UPVALUE", offset),
        OpCode::List => byte_instruction("OP_LIST", chunk, offset),
        OpCode::Dictionary => byte_instruction("OP_DICTIONARY", chunk, offset),
        OpCode::Class => constant_instruction("OP_CLASS", chunk, offset, heap),
        OpCode::Inherit => simple_instruction("OP_INHERIT", offset),
        OpCode::Method => constant_instruction("OP_METHOD", chunk, offset, heap),
        OpCode::Return => simple_instruction("OP_RETURN", offset),
    }
}

fn simple_instruction(name: &str, offset: usize) -> usize {
    println!("{name}");
    offset + 1
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.code[offset + 1];
    println!("{name:-16} {slot:4}");
    offset + 2
}

fn jump_instruction(name: &str, sign: i32, chunk: &Chunk, offset: usize) -> usize {
    let hi = chunk.code[offset + 1];
    let lo = chunk.code[offset + 2];
    let jump = u16::from_be_bytes([hi, lo]) as i32;
    let target = offset as i32 + 3 + sign * jump;
    println!("{name:-16} {offset:4} -> {target}");
    offset + 3
}

fn constant_instruction(name: &str, chunk: &Chunk, offset: usize, heap: &Heap) -> usize {
    let index = chunk.code[offset + 1];
    let value = &chunk.constants[index as usize];
    println!("{name:-16} {index:4} '{}'", display_value(value, heap));
    offset + 2
}

fn invoke_instruction(name: &str, chunk: &Chunk, offset: usize, heap: &Heap) -> usize {
    let index = chunk.code[offset + 1];
    let argc = chunk.code[offset + 2];
    let value = &chunk.constants[index as usize];
    println!("{name:-16} ({argc} args) {index:4} '{}'", display_value(value, heap));
    offset + 3
}

fn closure_instruction(chunk: &Chunk, offset: usize, heap: &Heap) -> usize {
    let mut offset = offset + 1;
    let index = chunk.code[offset];
    offset += 1;
    let value = &chunk.constants[index as usize];
    println!("{:-16} {index:4} '{}'", "OP_CLOSURE", display_value(value, heap));

    let function_ref = value.as_obj().expect("CLOSURE operand is a function constant");
    let upvalue_count = match &heap.get(function_ref).data {
        ObjData::Function(f) => f.upvalue_count,
        _ => 0,
    };
    for _ in 0..upvalue_count {
        let is_local = chunk.code[offset];
        offset += 1;
        let index = chunk.code[offset];
        offset += 1;
        let kind = if is_local != 0 { "local" } else { "upvalue" };
        println!("{offset:04}      |                     {kind} {index}");
    }
    offset
}

fn display_value(value: &Value, heap: &Heap) -> String {
    if let Some(r) = value.as_obj() {
        match &heap.get(r).data {
            ObjData::String(s) => format!("\"{}\"", s.chars),
            ObjData::Function(f) => match f.name {
                Some(name_ref) => format!("<fn {}>", display_value(&Value::obj(name_ref), heap)),
                None => "<script>".to_string(),
            },
            other => format!("<{}>", other.type_name()),
        }
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod disassemble_test;
