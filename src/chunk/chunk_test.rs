// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the bytecode chunk format.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::value::Value;

#[test]
fn write_tracks_parallel_lines() {
    let mut chunk = Chunk::new();
    chunk.write_op(OpCode::Nil, 1);
    chunk.write_op(OpCode::Return, 2);
    assert_eq!(chunk.len(), 2);
    assert_eq!(chunk.line_for(0), 1);
    assert_eq!(chunk.line_for(1), 2);
}

#[test]
fn line_for_past_end_returns_last_line() {
    let mut chunk = Chunk::new();
    chunk.write_op(OpCode::Return, 7);
    assert_eq!(chunk.line_for(100), 7);
}

#[test]
fn line_for_empty_chunk_is_zero() {
    let chunk = Chunk::new();
    assert_eq!(chunk.line_for(0), 0);
}

#[test]
fn add_constant_caps_at_256() {
    let mut chunk = Chunk::new();
    for _ in 0..256 {
        assert!(chunk.add_constant(Value::number(1.0)).is_some());
    }
    assert_eq!(chunk.add_constant(Value::number(1.0)), None);
}

#[test]
fn patch_overwrites_a_byte() {
    let mut chunk = Chunk::new();
    chunk.write(0xFF, 1);
    chunk.patch(0, 0x42);
    assert_eq!(chunk.code[0], 0x42);
}

#[test]
fn opcode_from_byte_roundtrips_every_variant() {
    for byte in 0..=41u8 {
        assert!(OpCode::from_byte(byte).is_some(), "opcode {byte} should decode");
    }
    assert_eq!(OpCode::from_byte(255), None);
}

#[test]
fn is_empty_reflects_code_length() {
    let mut chunk = Chunk::new();
    assert!(chunk.is_empty());
    chunk.write_op(OpCode::Return, 1);
    assert!(!chunk.is_empty());
}
