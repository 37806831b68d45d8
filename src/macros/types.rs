//! Core data structures for the macro system.

use serde::{Deserialize, Serialize};

use crate::interp::ScopeId;
use crate::syntax::Sexp;

/// Iteration bound for the fixed-point expansion loop. Hitting it issues
/// a warning and returns the current form as-is.
pub const DEFAULT_ITERATION_LIMIT: usize = 100;

/// Recursion bound for a single expansion.
pub const DEFAULT_MAX_EXPANSION_DEPTH: usize = 100;

/// The special forms the macro-time interpreter understands. Arguments
/// headed by one of these are evaluated at macro time under the hybrid
/// argument policy.
pub const INTERP_SPECIAL_FORMS: &[&str] =
    &["quote", "quasiquote", "if", "cond", "let", "var", "fn"];

/// A user-defined macro: `(macro name [params...] body...)`.
///
/// The closure keeps the index of its defining scope, not a pointer; the
/// driver's arena outlives the registry, so the index stays valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroClosure {
    pub name: String,
    pub params: Vec<String>,
    pub rest: Option<String>,
    pub body: Vec<Sexp>,
    #[serde(skip, default = "default_scope")]
    pub env: ScopeId,
}

fn default_scope() -> ScopeId {
    ScopeId(0)
}

impl MacroClosure {
    /// Human-readable arity for diagnostics.
    pub fn expected_arity(&self) -> String {
        if self.rest.is_some() {
            format!("at least {}", self.params.len())
        } else {
            self.params.len().to_string()
        }
    }

    pub fn accepts(&self, arg_count: usize) -> bool {
        if self.rest.is_some() {
            arg_count >= self.params.len()
        } else {
            arg_count == self.params.len()
        }
    }
}

/// Options for one expansion run.
#[derive(Debug, Clone)]
pub struct ExpandOptions {
    pub iteration_limit: usize,
    pub max_depth: usize,
    pub current_file: Option<String>,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        ExpandOptions {
            iteration_limit: DEFAULT_ITERATION_LIMIT,
            max_depth: DEFAULT_MAX_EXPANSION_DEPTH,
            current_file: None,
        }
    }
}

/// The result of expanding a program: rewritten forms plus any non-fatal
/// diagnostics (iteration-limit warnings).
#[derive(Debug)]
pub struct MacroExpansion {
    pub forms: Vec<Sexp>,
    pub warnings: Vec<crate::errors::HqlError>,
}
