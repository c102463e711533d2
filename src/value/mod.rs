// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The `Value` representation.
//!
//! Two layouts implement the same public surface: a tagged `enum` (default)
//! and a NaN-boxed 64-bit word (`nanbox` feature). Compiler and VM code is
//! written against this module only and does not know which layout is
//! active.

#[cfg(not(feature = "nanbox"))]
mod tagged;
#[cfg(feature = "nanbox")]
mod nanbox;

#[cfg(not(feature = "nanbox"))]
pub use tagged::Value;
#[cfg(feature = "nanbox")]
pub use nanbox::Value;


/// Human-readable type name used by `typeof` and error messages. Matches
/// spec.md's "documented type strings".
#[must_use]
pub fn type_name(value: &Value) -> &'static str {
    value.type_name()
}

/// `%g`-style shortest round-trip number formatting (spec.md §6): integral
/// values print without a trailing `.0`, everything else prints its
/// shortest decimal representation. Shared by both `Value` layouts.
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}
