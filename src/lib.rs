//! # HQL
//!
//! A Lisp-like surface syntax that compiles to JavaScript. This crate is
//! the compiler core: a linear pipeline from source text to executable
//! JavaScript with source maps.
//!
//! ```text
//! reader -> macro expander -> validator -> lowering -> optimizer
//!        -> code generator -> module linker
//! ```
//!
//! The macro expander is the only stage that re-enters the pipeline: it
//! evaluates HQL fragments at compile time through the macro-time
//! interpreter in [`interp`]. The linker is the entry point; it compiles
//! imported HQL modules recursively and writes a self-contained module
//! graph to the cache directory.
//!
//! ## Example
//!
//! ```no_run
//! use hql::{Compiler, TranspileOptions};
//!
//! let mut compiler = Compiler::new();
//! let out = compiler
//!     .transpile("(fn add [a b] (+ a b)) (add 1 2)", &TranspileOptions::default())
//!     .unwrap();
//! assert!(out.code.contains("function add"));
//! ```

pub mod codegen;
pub mod compiler;
pub mod errors;
pub mod interp;
pub mod ir;
pub mod linker;
pub mod lower;
pub mod macros;
pub mod optimize;
pub mod syntax;
pub mod validate;

pub use compiler::{Compiler, JsAdapter, RunOptions, TranspileOptions, TranspileOutput};
pub use errors::{ErrorCategory, ErrorKind, HqlError, SourceContext};

/// The types nearly every stage touches.
pub mod prelude {
    pub use crate::codegen::{Mapping, SourceMap};
    pub use crate::errors::{
        meta_span, to_source_span, ErrorKind, ErrorReporting, HqlError, ReportContext,
        SourceContext,
    };
    pub use crate::interp::{ScopeArena, ScopeId, Value};
    pub use crate::ir::{IrKind, IrNode};
    pub use crate::macros::{ExpandOptions, MacroClosure};
    pub use crate::syntax::{Lit, Meta, Sexp, SexpKind};
}
