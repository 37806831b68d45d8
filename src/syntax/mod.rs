//! Syntax module for the HQL language
//!
//! This module provides the core S-expression types for representing HQL
//! forms with source position tracking, plus the reader that produces them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod reader;

pub use reader::read;

// Well-known list heads produced by the reader. Vectors and map literals
// desugar at read time; templates desugar during lowering.
pub const SYM_VECTOR: &str = "vector";
pub const SYM_HASH_MAP: &str = "__hql_hash_map";
pub const SYM_TEMPLATE: &str = "__hql_template";
pub const SYM_SPREAD: &str = "...";

/// Source position of a node: 1-based lines, 0-based UTF-16 columns.
///
/// The byte offsets exist for diagnostic rendering (miette spans);
/// generated nodes have no offsets and no file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Meta {
    pub file: Option<Arc<str>>,
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub offset: Option<usize>,
    pub end_offset: Option<usize>,
}

impl Meta {
    /// True when this meta should be retargeted to a call site located at
    /// `site`: no file, a different file, or an earlier line in the same
    /// file. Keeps macro-expansion diagnostics pointed at user code.
    pub fn should_retarget_to(&self, site: &Meta) -> bool {
        match (&self.file, &site.file) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => a != b || self.line < site.line,
        }
    }
}

/// A literal value embedded in source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Lit {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl Lit {
    pub fn type_name(&self) -> &'static str {
        match self {
            Lit::Number(_) => "number",
            Lit::Str(_) => "string",
            Lit::Bool(_) => "boolean",
            Lit::Null => "null",
        }
    }
}

/// The three S-expression shapes. Symbols compare by name; list order is
/// significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SexpKind {
    Symbol(String),
    Literal(Lit),
    List(Vec<Sexp>),
}

/// Canonical S-expression node with shared ownership.
///
/// The `Arc` makes clones cheap during macro expansion and doubles as the
/// fixed-point test: an expansion pass that returns the same allocation
/// has made no rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sexp {
    pub kind: Arc<SexpKind>,
    pub meta: Option<Meta>,
}

impl Sexp {
    pub fn symbol(name: impl Into<String>, meta: Option<Meta>) -> Self {
        Sexp {
            kind: Arc::new(SexpKind::Symbol(name.into())),
            meta,
        }
    }

    pub fn literal(lit: Lit, meta: Option<Meta>) -> Self {
        Sexp {
            kind: Arc::new(SexpKind::Literal(lit)),
            meta,
        }
    }

    pub fn number(n: f64, meta: Option<Meta>) -> Self {
        Self::literal(Lit::Number(n), meta)
    }

    pub fn string(s: impl Into<String>, meta: Option<Meta>) -> Self {
        Self::literal(Lit::Str(s.into()), meta)
    }

    pub fn boolean(b: bool, meta: Option<Meta>) -> Self {
        Self::literal(Lit::Bool(b), meta)
    }

    pub fn null(meta: Option<Meta>) -> Self {
        Self::literal(Lit::Null, meta)
    }

    pub fn list(items: Vec<Sexp>, meta: Option<Meta>) -> Self {
        Sexp {
            kind: Arc::new(SexpKind::List(items)),
            meta,
        }
    }

    /// Builds `(head item...)` with the head synthesized at `meta`.
    pub fn call(head: &str, mut items: Vec<Sexp>, meta: Option<Meta>) -> Self {
        let mut children = Vec::with_capacity(items.len() + 1);
        children.push(Sexp::symbol(head, meta.clone()));
        children.append(&mut items);
        Sexp::list(children, meta)
    }

    /// Returns the same node with a replacement meta; the underlying kind
    /// allocation is shared.
    pub fn with_meta(&self, meta: Option<Meta>) -> Self {
        Sexp {
            kind: Arc::clone(&self.kind),
            meta,
        }
    }

    /// True when both nodes share the same allocation (the expander's
    /// no-change test).
    pub fn same_node(a: &Sexp, b: &Sexp) -> bool {
        Arc::ptr_eq(&a.kind, &b.kind)
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match &*self.kind {
            SexpKind::Symbol(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Sexp]> {
        match &*self.kind {
            SexpKind::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Lit> {
        match &*self.kind {
            SexpKind::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &*self.kind {
            SexpKind::Literal(Lit::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match &*self.kind {
            SexpKind::Literal(Lit::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// The head symbol of a list form, if any.
    pub fn head_symbol(&self) -> Option<&str> {
        self.as_list()?.first()?.as_symbol()
    }

    /// True for a list whose head is the given symbol.
    pub fn is_call_to(&self, name: &str) -> bool {
        self.head_symbol() == Some(name)
    }

    /// Returns the type name of this node as a string (for diagnostics).
    pub fn type_name(&self) -> &'static str {
        match &*self.kind {
            SexpKind::Symbol(_) => "symbol",
            SexpKind::Literal(lit) => lit.type_name(),
            SexpKind::List(_) => "list",
        }
    }

    /// Pretty-prints the form, restoring reader sugar where it exists.
    pub fn pretty(&self) -> String {
        match &*self.kind {
            SexpKind::Symbol(s) => s.clone(),
            SexpKind::Literal(Lit::Number(n)) => format_number(*n),
            SexpKind::Literal(Lit::Str(s)) => format!("{:?}", s),
            SexpKind::Literal(Lit::Bool(b)) => b.to_string(),
            SexpKind::Literal(Lit::Null) => "null".to_string(),
            SexpKind::List(items) => Self::pretty_list(items),
        }
    }

    fn pretty_list(items: &[Sexp]) -> String {
        if let [head, arg] = items {
            if let Some(sugar) = match head.as_symbol() {
                Some("quote") => Some("'"),
                Some("quasiquote") => Some("`"),
                Some("unquote") => Some("~"),
                Some("unquote-splicing") => Some("~@"),
                _ => None,
            } {
                return format!("{}{}", sugar, arg.pretty());
            }
        }
        match items.first().and_then(Sexp::as_symbol) {
            Some(SYM_VECTOR) => {
                let inner = items[1..]
                    .iter()
                    .map(Sexp::pretty)
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("[{}]", inner)
            }
            Some(SYM_HASH_MAP) => {
                let inner = items[1..]
                    .iter()
                    .map(Sexp::pretty)
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("{{{}}}", inner)
            }
            _ => {
                let inner = items.iter().map(Sexp::pretty).collect::<Vec<_>>().join(" ");
                format!("({})", inner)
            }
        }
    }
}

impl std::fmt::Display for Sexp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pretty())
    }
}

/// Formats a number the way emitted JavaScript prints it: integral values
/// without a trailing `.0`.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_restores_reader_sugar() {
        let inner = Sexp::symbol("x", None);
        let quoted = Sexp::call("quote", vec![inner], None);
        assert_eq!(quoted.pretty(), "'x");

        let v = Sexp::call(
            SYM_VECTOR,
            vec![Sexp::number(1.0, None), Sexp::number(2.0, None)],
            None,
        );
        assert_eq!(v.pretty(), "[1 2]");
    }

    #[test]
    fn same_node_tracks_shared_allocation() {
        let a = Sexp::symbol("x", None);
        let b = a.clone();
        let c = Sexp::symbol("x", None);
        assert!(Sexp::same_node(&a, &b));
        assert!(!Sexp::same_node(&a, &c));
    }

    #[test]
    fn retarget_rule_matches_call_site_policy() {
        let site = Meta {
            file: Some(Arc::from("main.hql")),
            line: 10,
            ..Meta::default()
        };
        let no_file = Meta::default();
        let other_file = Meta {
            file: Some(Arc::from("macros.hql")),
            line: 2,
            ..Meta::default()
        };
        let earlier_same_file = Meta {
            file: Some(Arc::from("main.hql")),
            line: 3,
            ..Meta::default()
        };
        let later_same_file = Meta {
            file: Some(Arc::from("main.hql")),
            line: 12,
            ..Meta::default()
        };
        assert!(no_file.should_retarget_to(&site));
        assert!(other_file.should_retarget_to(&site));
        assert!(earlier_same_file.should_retarget_to(&site));
        assert!(!later_same_file.should_retarget_to(&site));
    }
}
