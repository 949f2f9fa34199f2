// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The policy subsystem: a small policy language, its compiler, and the
//! single-threaded VM that executes compiled policies against routes.
//!
//! Six components, dependency order leaves first: [`value`] (the runtime
//! value model), [`varmap`]/[`varrw`] (the variable catalog and the VM/route
//! bridge), [`ast`]/[`lexer`]/[`parser`]/[`printer`] (the source language),
//! [`checker`]/[`dependency`] (semantic checking and dependency tracking),
//! [`code`]/[`codegen`]/[`filter`] (the instruction set, compiler, and
//! versioned filter images), [`vm`] (the executor), and [`configuration`]
//! (the mutating delta surface that drives incremental recompile & link).

#![allow(clippy::all)]
#![allow(clippy::pedantic)]
#![allow(clippy::similar_names)]

pub mod ast;
pub mod checker;
pub mod code;
pub mod codegen;
pub mod configuration;
pub mod dependency;
pub mod dispatch;
pub mod errors;
pub mod filter;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod statement;
pub mod value;
pub mod varmap;
pub mod varrw;
pub mod vm;

#[cfg(any(test, feature = "testing"))]
pub mod test_support;

// re-exports: the small public surface a config driver / protocol adapter
// actually needs, mirroring `routing`'s `pub use errors::RouterError; pub
// use router::{Router, ...}` convention.
pub use configuration::{Configuration, FilterSink};
pub use errors::PolicyError;
pub use value::Value;
pub use varmap::{Access, VarMap};
pub use varrw::VarRw;
pub use vm::Verdict;
