//! Macro-time values and the syntax/value conversion pair.

use std::sync::Arc;

use im::HashMap;

use crate::interp::ScopeId;
use crate::syntax::{format_number, Lit, Sexp, SexpKind};

/// Lazy sequences are realized to at most this many elements before they
/// cross the conversion boundary.
pub const MAX_REALIZED_SEQUENCE: usize = 10_000;

/// A native macro-time function. Errors are plain messages; the evaluator
/// attaches spans and macro-context attribution.
pub type NativeFn = fn(&[Value]) -> Result<Value, String>;

/// A user function defined at macro time. The body is kept as syntax and
/// evaluated on call in a child of the definition scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub rest: Option<String>,
    pub body: Vec<Sexp>,
    pub env: ScopeId,
}

/// The macro-time value domain.
///
/// `Symbol` and `List` double as quoted syntax: a macro body that returns
/// them is returning the code it expands to. `Range` is the one lazy
/// sequence; it realizes on conversion, capped.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Number(f64),
    Str(String),
    Bool(bool),
    Symbol(String),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    Range {
        start: f64,
        end: f64,
        step: f64,
    },
    Closure(Arc<Closure>),
    Native(&'static str, NativeFn),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "null",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Symbol(_) => "symbol",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Range { .. } => "range",
            Value::Closure(_) => "function",
            Value::Native(..) => "function",
        }
    }

    /// HQL truthiness: only `false` and `null` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false) | Value::Nil)
    }

    /// Realizes a lazy range into a list, capped at `limit` elements.
    pub fn realize(self, limit: usize) -> Value {
        match self {
            Value::Range { start, end, step } => {
                let mut items = Vec::new();
                let mut i = start;
                while (step > 0.0 && i < end) || (step < 0.0 && i > end) {
                    if items.len() >= limit {
                        break;
                    }
                    items.push(Value::Number(i));
                    i += step;
                }
                Value::List(items)
            }
            other => other,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "null"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::List(items) => {
                let inner = items
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                write!(f, "({})", inner)
            }
            Value::Map(map) => {
                let inner = map
                    .iter()
                    .map(|(k, v)| format!("{} {}", k, v))
                    .collect::<Vec<_>>()
                    .join(" ");
                write!(f, "{{{}}}", inner)
            }
            Value::Range { start, end, step } => {
                write!(f, "(range {} {} {})", start, end, step)
            }
            Value::Closure(c) => match &c.name {
                Some(name) => write!(f, "#<fn {}>", name),
                None => write!(f, "#<fn>"),
            },
            Value::Native(name, _) => write!(f, "#<native {}>", name),
        }
    }
}

// ============================================================================
// CONVERSION PAIR
// ============================================================================

/// Converts syntax to a value under quote semantics: symbols stay symbols,
/// lists stay lists, literals unwrap.
pub fn sexp_to_value(sexp: &Sexp) -> Value {
    match &*sexp.kind {
        SexpKind::Symbol(name) => Value::Symbol(name.clone()),
        SexpKind::Literal(Lit::Number(n)) => Value::Number(*n),
        SexpKind::Literal(Lit::Str(s)) => Value::Str(s.clone()),
        SexpKind::Literal(Lit::Bool(b)) => Value::Bool(*b),
        SexpKind::Literal(Lit::Null) => Value::Nil,
        SexpKind::List(items) => Value::List(items.iter().map(sexp_to_value).collect()),
    }
}

/// Converts a value back to syntax. Generated nodes carry no meta; the
/// expander retargets them to the call site afterwards. Lazy ranges
/// realize (capped) before conversion. Functions have no syntax; they
/// convert to their name or null so diagnostics stay printable.
pub fn value_to_sexp(value: Value) -> Sexp {
    match value.realize(MAX_REALIZED_SEQUENCE) {
        Value::Nil => Sexp::null(None),
        Value::Number(n) => Sexp::number(n, None),
        Value::Str(s) => Sexp::string(s, None),
        Value::Bool(b) => Sexp::boolean(b, None),
        Value::Symbol(s) => Sexp::symbol(s, None),
        Value::List(items) => Sexp::list(items.into_iter().map(value_to_sexp).collect(), None),
        Value::Map(map) => {
            let mut entries = Vec::with_capacity(map.len() * 2);
            for (k, v) in map {
                entries.push(Sexp::string(k, None));
                entries.push(value_to_sexp(v));
            }
            Sexp::call(crate::syntax::SYM_HASH_MAP, entries, None)
        }
        Value::Range { .. } => unreachable!("ranges realize before conversion"),
        Value::Closure(c) => match &c.name {
            Some(name) => Sexp::symbol(name.clone(), None),
            None => Sexp::null(None),
        },
        Value::Native(name, _) => Sexp::symbol(name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_round_trips_plain_data() {
        let src = Sexp::list(
            vec![
                Sexp::symbol("+", None),
                Sexp::number(1.0, None),
                Sexp::string("x", None),
            ],
            None,
        );
        let back = value_to_sexp(sexp_to_value(&src));
        assert_eq!(back.pretty(), src.pretty());
    }

    #[test]
    fn range_realizes_capped() {
        let v = Value::Range {
            start: 0.0,
            end: 1e9,
            step: 1.0,
        };
        match v.realize(10) {
            Value::List(items) => assert_eq!(items.len(), 10),
            other => panic!("expected list, got {}", other.type_name()),
        }
    }

    #[test]
    fn only_false_and_null_are_falsy() {
        assert!(Value::Number(0.0).is_truthy());
        assert!(Value::Str(String::new()).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Nil.is_truthy());
    }
}
