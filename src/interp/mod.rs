//! # HQL Macro-time Interpreter
//!
//! A tiny tree-walking evaluator used exclusively from the macro expander.
//! It understands a fixed set of special forms (`quote`, `quasiquote`,
//! `if`, `cond`, `let`, `var`, named `fn`, function application) plus the
//! arithmetic and comparison natives, enough to evaluate macro bodies and
//! macro-time arguments - never user programs.
//!
//! Values cross the syntax boundary through the conversion pair in
//! [`value`]; scopes live in the arena in [`env`], owned by the compiler
//! driver so macro closures can hold plain scope indices.

mod env;
mod eval;
mod value;

pub use env::{Scope, ScopeArena, ScopeId};
pub use eval::{
    apply, eval, eval_body, install_natives, parse_params, EvalContext, MAX_CALL_DEPTH,
};
pub use value::{sexp_to_value, value_to_sexp, Closure, NativeFn, Value, MAX_REALIZED_SEQUENCE};
