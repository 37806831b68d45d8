//! # HQL Macro Expansion System
//!
//! Purely syntactic transformation of the program before validation and
//! lowering. Macros are rewrite rules evaluated at compile time by the
//! macro-time interpreter; expansion runs to a fixed point per top-level
//! form, bounded by an iteration limit.
//!
//! Hygiene has two tools: explicit `(gensym "prefix")`, and auto-gensym
//! (`name#`) inside quasiquote templates. Both draw from the process-wide
//! counter in [`gensym`].

pub mod expander;
pub mod gensym;
pub mod quasiquote;
pub mod types;

pub use expander::{expand_program, expand_program_once, retarget_meta};
pub use gensym::{next_gensym, reset_gensym};
pub use types::{
    ExpandOptions, MacroClosure, MacroExpansion, DEFAULT_ITERATION_LIMIT,
    DEFAULT_MAX_EXPANSION_DEPTH, INTERP_SPECIAL_FORMS,
};
