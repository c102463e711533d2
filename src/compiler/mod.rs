// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Single-pass Pratt parser and code generator.
//!
//! Grounded on the teacher's `compiler::Compiler` (one struct driving a
//! `Chunk` under construction, recursive `compile_*` methods with no
//! intermediate AST), generalized from S-expression compilation to
//! Pratt-style infix parsing directly off the token stream. The parse
//! table ([`get_rule`]) is kept as data, not virtual dispatch, per spec.


use std::fmt;

use crate::chunk::{Chunk, OpCode};
use crate::memory::Heap;
use crate::object::{ObjData, ObjFunction, ObjRef, UpvalueDescriptor};
use crate::scanner::{Scanner, Token, TokenKind};
use crate::table::Table;
use crate::value::Value;

/// Operator-precedence levels, ordered low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Self {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn = fn(&mut Compiler<'_, '_>, bool);

struct ParseRule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
}

const fn rule(prefix: Option<ParseFn>, infix: Option<ParseFn>, precedence: Precedence) -> ParseRule {
    ParseRule { prefix, infix, precedence }
}

/// The Pratt table: a pure function of token kind to `{prefix, infix,
/// precedence}`, kept as flat data rather than dispatch-through-traits.
fn get_rule(kind: TokenKind) -> ParseRule {
    use Precedence::{And, Call, Comparison, Equality, Factor, None as Prec0, Or, Term};
    use TokenKind as T;
    match kind {
        T::LeftParen => rule(Some(grouping), Some(call), Call),
        T::LeftBracket => rule(Some(list_literal), Some(index_get), Call),
        T::LeftBrace => rule(Some(dict_literal), None, Prec0),
        T::Dot => rule(None, Some(dot), Call),
        T::Minus => rule(Some(unary), Some(binary), Term),
        T::Plus => rule(None, Some(binary), Term),
        T::Slash | T::Star => rule(None, Some(binary), Factor),
        T::Bang => rule(Some(unary), None, Prec0),
        T::BangEqual | T::EqualEqual => rule(None, Some(binary), Equality),
        T::Greater | T::GreaterEqual | T::Less | T::LessEqual => rule(None, Some(binary), Comparison),
        T::Identifier => rule(Some(variable), None, Prec0),
        T::String => rule(Some(string_lit), None, Prec0),
        T::Number => rule(Some(number), None, Prec0),
        T::And => rule(None, Some(and_), And),
        T::Or => rule(None, Some(or_), Or),
        T::False | T::True | T::Nil => rule(Some(literal), None, Prec0),
        T::This => rule(Some(this_), None, Prec0),
        T::Super => rule(Some(super_), None, Prec0),
        _ => rule(None, None, Prec0),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Script,
    Function,
    Method,
    Initializer,
}

#[derive(Debug, Clone)]
struct Local {
    name: String,
    /// `-1` marks "declared but not yet initialized" (spec.md §4.4); the
    /// apparent off-by-one typo in the source this is grounded on
    /// (`!= 1`) is treated as the preserved intent `!= -1`, per the design
    /// notes' guidance to keep behavioural intent over a literal constant.
    depth: i32,
    is_captured: bool,
    is_permanent: bool,
}

struct LoopCtx {
    start: usize,
    scope_depth: i32,
    break_jumps: Vec<usize>,
}

struct ClassCtx {
    has_superclass: bool,
}

struct FunctionFrame {
    function: ObjFunction,
    function_type: FunctionType,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueDescriptor>,
    scope_depth: i32,
    loops: Vec<LoopCtx>,
}

impl FunctionFrame {
    fn new(function_type: FunctionType, name: Option<ObjRef>) -> Self {
        let slot0_name = match function_type {
            FunctionType::Method | FunctionType::Initializer => "this".to_string(),
            FunctionType::Script | FunctionType::Function => String::new(),
        };
        let locals = vec![Local {
            name: slot0_name,
            depth: 0,
            is_captured: false,
            is_permanent: false,
        }];
        Self {
            function: ObjFunction::new(name),
            function_type,
            locals,
            upvalues: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
        }
    }
}

/// Compilation failed; diagnostics were already reported via `tracing`
/// during parsing (panic-mode recovery may have reported several).
#[derive(Debug)]
pub struct CompileError;

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "compilation failed")
    }
}

impl std::error::Error for CompileError {}

/// Single-pass compiler: parses and emits bytecode in the same walk, with
/// no intermediate AST.
pub struct Compiler<'src, 'h> {
    scanner: Scanner<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    frames: Vec<FunctionFrame>,
    classes: Vec<ClassCtx>,
    heap: &'h mut Heap,
    strings: &'h mut Table,
}

/// Compile `source` into a top-level function object, or `CompileError` if
/// any syntax/static-semantics violation was reported. Allocates through
/// `heap` and interns identifiers/string literals through `strings`.
///
/// # Errors
/// Returns `CompileError` if scanning or parsing reported any error; no
/// partial chunk is returned in that case.
pub fn compile(source: &str, heap: &mut Heap, strings: &mut Table) -> Result<ObjRef, CompileError> {
    let eof = Token { kind: TokenKind::Eof, lexeme: "", line: 1 };
    let mut compiler = Compiler {
        scanner: Scanner::new(source),
        previous: eof,
        current: eof,
        had_error: false,
        panic_mode: false,
        frames: vec![FunctionFrame::new(FunctionType::Script, None)],
        classes: Vec::new(),
        heap,
        strings,
    };
    compiler.advance();
    while !compiler.match_token(TokenKind::Eof) {
        compiler.declaration();
    }
    let (function_ref, _) = compiler.end_frame();
    if compiler.had_error {
        Err(CompileError)
    } else {
        Ok(function_ref)
    }
}

impl<'src, 'h> Compiler<'src, 'h> {
    fn frame_idx(&self) -> usize {
        self.frames.len() - 1
    }

    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.frames.last_mut().expect("at least one frame").function.chunk
    }

    // --- token stream -----------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            self.error_at_current(self.current.lexeme);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current.line, message);
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous.line, message);
    }

    fn error_at(&mut self, line: u32, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        tracing::error!(line, message, "compile error");
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::Perm
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    // --- emission -----------------------------------------------------

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk().write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_op_byte(&mut self, op: OpCode, byte: u8) {
        self.emit_op(op);
        self.emit_byte(byte);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk().len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.current_chunk().len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        let bytes = (jump as u16).to_be_bytes();
        self.current_chunk().patch(offset, bytes[0]);
        self.current_chunk().patch(offset + 1, bytes[1]);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.current_chunk().len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        let bytes = (offset as u16).to_be_bytes();
        self.emit_byte(bytes[0]);
        self.emit_byte(bytes[1]);
    }

    fn emit_return(&mut self) {
        if self.frames[self.frame_idx()].function_type == FunctionType::Initializer {
            self.emit_op_byte(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.current_chunk().add_constant(value) {
            Some(idx) => idx,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_op_byte(OpCode::Constant, idx);
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let r = self.heap.intern_string(self.strings, name);
        self.make_constant(Value::obj(r))
    }

    // --- scope / locals -------------------------------------------------

    fn begin_scope(&mut self) {
        self.frames[self.frame_idx()].scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let idx = self.frame_idx();
        self.frames[idx].scope_depth -= 1;
        let depth = self.frames[idx].scope_depth;
        loop {
            let Some(local) = self.frames[idx].locals.last() else { break };
            if local.depth <= depth {
                break;
            }
            let is_captured = local.is_captured;
            self.frames[idx].locals.pop();
            if is_captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
        }
    }

    /// Emit pops/closes for every local declared deeper than `depth`,
    /// without removing them from the compiler's bookkeeping — used by
    /// `break`/`continue`, which jump out of a scope that its own
    /// `end_scope` will still run through normally afterward.
    fn discard_locals_above(&mut self, depth: i32) {
        let idx = self.frame_idx();
        let captures: Vec<bool> = self.frames[idx]
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth > depth)
            .map(|l| l.is_captured)
            .collect();
        for is_captured in captures {
            if is_captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
        }
    }

    fn add_local(&mut self, name: String, is_permanent: bool) {
        let idx = self.frame_idx();
        if self.frames[idx].locals.len() >= 256 {
            self.error("Too many local variables in function.");
            return;
        }
        self.frames[idx].locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
            is_permanent,
        });
    }

    fn declare_variable(&mut self, is_permanent: bool) {
        let idx = self.frame_idx();
        if self.frames[idx].scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme.to_string();
        let scope_depth = self.frames[idx].scope_depth;
        let mut duplicate = false;
        for local in self.frames[idx].locals.iter().rev() {
            if local.depth != -1 && local.depth < scope_depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
            return;
        }
        self.add_local(name, is_permanent);
    }

    fn mark_initialized(&mut self) {
        let idx = self.frame_idx();
        if self.frames[idx].scope_depth == 0 {
            return;
        }
        let depth = self.frames[idx].scope_depth;
        if let Some(local) = self.frames[idx].locals.last_mut() {
            local.depth = depth;
        }
    }

    fn parse_variable(&mut self, error_message: &str, is_permanent: bool) -> u8 {
        self.consume(TokenKind::Identifier, error_message);
        self.declare_variable(is_permanent);
        if self.frames[self.frame_idx()].scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme.to_string();
        self.identifier_constant(&name)
    }

    fn define_variable(&mut self, global_idx: u8, is_permanent: bool) {
        if self.frames[self.frame_idx()].scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        let op = if is_permanent { OpCode::DefineGlobalPerm } else { OpCode::DefineGlobal };
        self.emit_op_byte(op, global_idx);
    }

    fn resolve_local(&mut self, frame: usize, name: &str) -> Option<u8> {
        let found = self.frames[frame]
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, l)| l.name == name)
            .map(|(i, l)| (i as u8, l.depth));
        match found {
            Some((_, -1)) => {
                self.error("Can't read local variable in its own initializer.");
                None
            }
            Some((idx, _)) => Some(idx),
            None => None,
        }
    }

    fn add_upvalue(&mut self, frame: usize, index: u8, is_local: bool) -> u8 {
        let upvalues = &mut self.frames[frame].upvalues;
        for (i, existing) in upvalues.iter().enumerate() {
            if existing.index == index && existing.is_local == is_local {
                return i as u8;
            }
        }
        if upvalues.len() >= 256 {
            self.error("Too many closure variables in function.");
            return 0;
        }
        upvalues.push(UpvalueDescriptor { is_local, index });
        (upvalues.len() - 1) as u8
    }

    fn resolve_upvalue(&mut self, frame: usize, name: &str) -> Option<u8> {
        if frame == 0 {
            return None;
        }
        if let Some(local) = self.resolve_local(frame - 1, name) {
            self.frames[frame - 1].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(frame, local, true));
        }
        if let Some(upvalue) = self.resolve_upvalue(frame - 1, name) {
            return Some(self.add_upvalue(frame, upvalue, false));
        }
        None
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) {
        let frame = self.frame_idx();
        if let Some(slot) = self.resolve_local(frame, name) {
            let is_permanent = self.frames[frame].locals[slot as usize].is_permanent;
            if can_assign && self.match_token(TokenKind::Equal) {
                if is_permanent {
                    self.error("Cannot assign to permanent variable.");
                }
                self.expression();
                self.emit_op_byte(OpCode::SetLocal, slot);
            } else {
                self.emit_op_byte(OpCode::GetLocal, slot);
            }
        } else if let Some(slot) = self.resolve_upvalue(frame, name) {
            if can_assign && self.match_token(TokenKind::Equal) {
                self.expression();
                self.emit_op_byte(OpCode::SetUpvalue, slot);
            } else {
                self.emit_op_byte(OpCode::GetUpvalue, slot);
            }
        } else {
            let const_idx = self.identifier_constant(name);
            if can_assign && self.match_token(TokenKind::Equal) {
                self.expression();
                self.emit_op_byte(OpCode::SetGlobal, const_idx);
            } else {
                self.emit_op_byte(OpCode::GetGlobal, const_idx);
            }
        }
    }

    // --- frames -----------------------------------------------------------

    fn begin_frame(&mut self, function_type: FunctionType, name: Option<ObjRef>) {
        self.frames.push(FunctionFrame::new(function_type, name));
    }

    fn end_frame(&mut self) -> (ObjRef, Vec<UpvalueDescriptor>) {
        self.emit_return();
        let frame = self.frames.pop().expect("frame pushed by begin_frame");
        let mut function = frame.function;
        function.upvalue_count = frame.upvalues.len();
        let r = self.heap.alloc(ObjData::Function(function));
        (r, frame.upvalues)
    }

    // --- declarations -----------------------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration(false);
        } else if self.match_token(TokenKind::Perm) {
            self.var_declaration(true);
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self, is_permanent: bool) {
        let global_idx = self.parse_variable("Expect variable name.", is_permanent);
        if is_permanent {
            self.consume(TokenKind::Equal, "Expect '=' after permanent variable name.");
            self.expression();
        } else if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global_idx, is_permanent);
    }

    fn fun_declaration(&mut self) {
        let global_idx = self.parse_variable("Expect function name.", false);
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global_idx, false);
    }

    fn function(&mut self, function_type: FunctionType) {
        let name = self.previous.lexeme.to_string();
        let name_ref = self.heap.intern_string(self.strings, &name);
        self.begin_frame(function_type, Some(name_ref));
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let idx = self.frame_idx();
                if self.frames[idx].function.arity == 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.frames[idx].function.arity += 1;
                }
                let param_const = self.parse_variable("Expect parameter name.", false);
                self.define_variable(param_const, false);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();
        let (function_ref, upvalues) = self.end_frame();
        let const_idx = self.make_constant(Value::obj(function_ref));
        self.emit_op_byte(OpCode::Closure, const_idx);
        for upvalue in upvalues {
            self.emit_byte(u8::from(upvalue.is_local));
            self.emit_byte(upvalue.index);
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous.lexeme.to_string();
        self.declare_variable(false);
        let name_const = self.identifier_constant(&class_name);
        self.emit_op_byte(OpCode::Class, name_const);
        self.define_variable(name_const, false);
        self.classes.push(ClassCtx { has_superclass: false });

        let mut has_superclass = false;
        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            let superclass_name = self.previous.lexeme.to_string();
            if superclass_name == class_name {
                self.error("A class can't inherit from itself.");
            }
            self.named_variable(&superclass_name, false);
            self.begin_scope();
            self.add_local("super".to_string(), false);
            self.define_variable(0, false);
            self.named_variable(&class_name, false);
            self.emit_op(OpCode::Inherit);
            has_superclass = true;
            self.classes.last_mut().expect("just pushed").has_superclass = true;
        }

        self.named_variable(&class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        if has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.previous.lexeme.to_string();
        let name_const = self.identifier_constant(&name);
        let function_type = if name == "init" { FunctionType::Initializer } else { FunctionType::Method };
        self.function(function_type);
        self.emit_op_byte(OpCode::Method, name_const);
    }

    // --- statements ---------------------------------------------------

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::Break) {
            self.break_statement();
        } else if self.match_token(TokenKind::Continue) {
            self.continue_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn return_statement(&mut self) {
        let function_type = self.frames[self.frame_idx()].function_type;
        if function_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if function_type == FunctionType::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().len();
        let scope_depth = self.frames[self.frame_idx()].scope_depth;
        self.frames[self.frame_idx()].loops.push(LoopCtx {
            start: loop_start,
            scope_depth,
            break_jumps: Vec::new(),
        });

        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);

        let loop_ctx = self.frames[self.frame_idx()].loops.pop().expect("just pushed");
        for jump in loop_ctx.break_jumps {
            self.patch_jump(jump);
        }
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration(false);
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().len();
        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.check(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");
            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        } else {
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");
        }

        let scope_depth = self.frames[self.frame_idx()].scope_depth;
        self.frames[self.frame_idx()].loops.push(LoopCtx {
            start: loop_start,
            scope_depth,
            break_jumps: Vec::new(),
        });
        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        let loop_ctx = self.frames[self.frame_idx()].loops.pop().expect("just pushed");
        for jump in loop_ctx.break_jumps {
            self.patch_jump(jump);
        }
        self.end_scope();
    }

    fn break_statement(&mut self) {
        self.consume(TokenKind::Semicolon, "Expect ';' after 'break'.");
        let idx = self.frame_idx();
        let Some(loop_ctx) = self.frames[idx].loops.last() else {
            self.error("Can't use 'break' outside of a loop.");
            return;
        };
        let scope_depth = loop_ctx.scope_depth;
        self.discard_locals_above(scope_depth);
        let jump = self.emit_jump(OpCode::Jump);
        self.frames[idx].loops.last_mut().expect("checked above").break_jumps.push(jump);
    }

    fn continue_statement(&mut self) {
        self.consume(TokenKind::Semicolon, "Expect ';' after 'continue'.");
        let idx = self.frame_idx();
        let Some(loop_ctx) = self.frames[idx].loops.last() else {
            self.error("Can't use 'continue' outside of a loop.");
            return;
        };
        let (scope_depth, start) = (loop_ctx.scope_depth, loop_ctx.start);
        self.discard_locals_above(scope_depth);
        self.emit_loop(start);
    }

    // --- expressions --------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix_rule) = get_rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix_rule(self, can_assign);

        while precedence <= get_rule(self.current.kind).precedence {
            self.advance();
            let infix_rule = get_rule(self.previous.kind).infix.expect("infix rule present by table construction");
            infix_rule(self, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u16 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count.min(255) as u8
    }
}

// --- parse functions (the Pratt table's prefix/infix parselets) -------

fn grouping(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    c.expression();
    c.consume(TokenKind::RightParen, "Expect ')' after expression.");
}

fn number(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    let value: f64 = c.previous.lexeme.parse().unwrap_or(0.0);
    c.emit_constant(Value::number(value));
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(ch);
        }
    }
    out
}

fn string_lit(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    let lexeme = c.previous.lexeme;
    let raw = &lexeme[1..lexeme.len() - 1];
    let content = unescape(raw);
    let r = c.heap.intern_string(c.strings, &content);
    c.emit_constant(Value::obj(r));
}

fn literal(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    match c.previous.kind {
        TokenKind::False => c.emit_op(OpCode::False),
        TokenKind::True => c.emit_op(OpCode::True),
        TokenKind::Nil => c.emit_op(OpCode::Nil),
        _ => unreachable!("literal() only installed for false/true/nil"),
    }
}

fn unary(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    let op_kind = c.previous.kind;
    c.parse_precedence(Precedence::Unary);
    match op_kind {
        TokenKind::Minus => c.emit_op(OpCode::Negate),
        TokenKind::Bang => c.emit_op(OpCode::Not),
        _ => unreachable!("unary() only installed for -/!"),
    }
}

fn binary(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    let op_kind = c.previous.kind;
    let rule = get_rule(op_kind);
    c.parse_precedence(rule.precedence.next());
    match op_kind {
        TokenKind::Plus => c.emit_op(OpCode::Add),
        TokenKind::Minus => c.emit_op(OpCode::Subtract),
        TokenKind::Star => c.emit_op(OpCode::Multiply),
        TokenKind::Slash => c.emit_op(OpCode::Divide),
        TokenKind::EqualEqual => c.emit_op(OpCode::Equal),
        TokenKind::BangEqual => {
            c.emit_op(OpCode::Equal);
            c.emit_op(OpCode::Not);
        }
        TokenKind::Greater => c.emit_op(OpCode::Greater),
        TokenKind::GreaterEqual => {
            c.emit_op(OpCode::Less);
            c.emit_op(OpCode::Not);
        }
        TokenKind::Less => c.emit_op(OpCode::Less),
        TokenKind::LessEqual => {
            c.emit_op(OpCode::Greater);
            c.emit_op(OpCode::Not);
        }
        _ => unreachable!("binary() only installed for arithmetic/comparison operators"),
    }
}

fn and_(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    let end_jump = c.emit_jump(OpCode::JumpIfFalse);
    c.emit_op(OpCode::Pop);
    c.parse_precedence(Precedence::And);
    c.patch_jump(end_jump);
}

fn or_(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    let else_jump = c.emit_jump(OpCode::JumpIfFalse);
    let end_jump = c.emit_jump(OpCode::Jump);
    c.patch_jump(else_jump);
    c.emit_op(OpCode::Pop);
    c.parse_precedence(Precedence::Or);
    c.patch_jump(end_jump);
}

fn call(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    let argc = c.argument_list();
    c.emit_op_byte(OpCode::Call, argc);
}

fn index_get(c: &mut Compiler<'_, '_>, can_assign: bool) {
    c.expression();
    c.consume(TokenKind::RightBracket, "Expect ']' after index.");
    if can_assign && c.match_token(TokenKind::Equal) {
        c.expression();
        c.emit_op(OpCode::SetItem);
    } else {
        c.emit_op(OpCode::GetItem);
    }
}

fn list_literal(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    let mut count: u16 = 0;
    if !c.check(TokenKind::RightBracket) {
        loop {
            c.expression();
            if count == 255 {
                c.error("Can't have more than 255 list elements.");
            }
            count += 1;
            if !c.match_token(TokenKind::Comma) {
                break;
            }
        }
    }
    c.consume(TokenKind::RightBracket, "Expect ']' after list elements.");
    c.emit_op_byte(OpCode::List, count.min(255) as u8);
}

fn dict_literal(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    let mut count: u16 = 0;
    if !c.check(TokenKind::RightBrace) {
        loop {
            c.expression();
            c.consume(TokenKind::Colon, "Expect ':' after dictionary key.");
            c.expression();
            if count == 255 {
                c.error("Can't have more than 255 dictionary entries.");
            }
            count += 1;
            if !c.match_token(TokenKind::Comma) {
                break;
            }
        }
    }
    c.consume(TokenKind::RightBrace, "Expect '}' after dictionary entries.");
    c.emit_op_byte(OpCode::Dictionary, count.min(255) as u8);
}

fn dot(c: &mut Compiler<'_, '_>, can_assign: bool) {
    c.consume(TokenKind::Identifier, "Expect property name after '.'.");
    let name = c.previous.lexeme.to_string();
    let name_const = c.identifier_constant(&name);
    if can_assign && c.match_token(TokenKind::Equal) {
        c.expression();
        c.emit_op_byte(OpCode::SetProperty, name_const);
    } else if c.match_token(TokenKind::LeftParen) {
        let argc = c.argument_list();
        c.emit_op_byte(OpCode::Invoke, name_const);
        c.emit_byte(argc);
    } else {
        c.emit_op_byte(OpCode::GetProperty, name_const);
    }
}

fn variable(c: &mut Compiler<'_, '_>, can_assign: bool) {
    let name = c.previous.lexeme.to_string();
    c.named_variable(&name, can_assign);
}

fn this_(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    if c.classes.is_empty() {
        c.error("Can't use 'this' outside of a class.");
    }
    c.named_variable("this", false);
}

fn super_(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    if c.classes.is_empty() {
        c.error("Can't use 'super' outside of a class.");
    } else if !c.classes.last().expect("checked above").has_superclass {
        c.error("Can't use 'super' in a class with no superclass.");
    }
    c.consume(TokenKind::Dot, "Expect '.' after 'super'.");
    c.consume(TokenKind::Identifier, "Expect superclass method name.");
    let name = c.previous.lexeme.to_string();
    let name_const = c.identifier_constant(&name);

    c.named_variable("this", false);
    if c.match_token(TokenKind::LeftParen) {
        let argc = c.argument_list();
        c.named_variable("super", false);
        c.emit_op_byte(OpCode::SuperInvoke, name_const);
        c.emit_byte(argc);
    } else {
        c.named_variable("super", false);
        c.emit_op_byte(OpCode::GetSuper, name_const);
    }
}
