// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Minimal driver: run a `.fer` file, or read-eval-print from stdin when no
//! file is given.
//!
//! Grounded on the teacher's `repl::run` loop shape (prompt, read a line,
//! compile, execute, print an error and keep going rather than exiting) and
//! on clox's `main` (argv dispatch between "run a file" and "run a REPL",
//! mapping VM outcomes to `sysexits.h`-style process exit codes).

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use fer::{InterpretResult, Vm, exit_code, natives};

/// Fer: a small dynamically-typed scripting language.
#[derive(Parser)]
#[command(name = "fer", version, about)]
struct Args {
    /// Script to run. Omit to start an interactive REPL.
    script: Option<std::path::PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let mut vm = Vm::new();
    natives::install(&mut vm);

    match args.script {
        Some(path) => run_file(&mut vm, &path),
        None => run_repl(&mut vm),
    }
}

fn run_file(vm: &mut Vm, path: &std::path::Path) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("Could not read file \"{}\": {err}", path.display());
            return ExitCode::from(exit_code::IO_ERROR as u8);
        }
    };
    match vm.interpret(&source) {
        InterpretResult::Ok => ExitCode::from(exit_code::OK as u8),
        InterpretResult::CompileError => ExitCode::from(exit_code::COMPILE_ERROR as u8),
        InterpretResult::RuntimeError => ExitCode::from(exit_code::RUNTIME_ERROR as u8),
    }
}

/// Read-eval-print loop over stdin. Never exits on a compile or runtime
/// error; only EOF (Ctrl-D) ends it, mirroring the teacher's "print the
/// error, reset, keep looping" REPL behavior.
fn run_repl(vm: &mut Vm) -> ExitCode {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("fer> ");
        if io::stdout().flush().is_err() {
            return ExitCode::from(exit_code::IO_ERROR as u8);
        }
        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) => {
                println!();
                return ExitCode::from(exit_code::OK as u8);
            }
            Ok(_) => {
                if line.trim().is_empty() {
                    continue;
                }
                vm.interpret(&line);
            }
            Err(err) => {
                eprintln!("Error reading stdin: {err}");
                return ExitCode::from(exit_code::IO_ERROR as u8);
            }
        }
    }
}
