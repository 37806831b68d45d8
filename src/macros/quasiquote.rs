//! Quasiquote templates.
//!
//! Quasiquote is data in the S-expression tree; this module gives it
//! meaning when the interpreter evaluates a template. The nesting depth is
//! a plain integer threaded explicitly: `unquote`/`unquote-splicing`
//! evaluate at depth 0 and are preserved as data above it, nested
//! `quasiquote` increments, `unquote` decrements.
//!
//! Auto-gensym: within one template scope, every symbol written `name#`
//! rewrites to the same fresh symbol; each nested quasiquote gets its own
//! fresh mapping.

use std::collections::HashMap;

use crate::errors::{ErrorKind, HqlError};
use crate::interp::{eval, value_to_sexp, EvalContext, ScopeId, Value, MAX_REALIZED_SEQUENCE};
use crate::macros::gensym::next_gensym;
use crate::syntax::{Sexp, SexpKind, SYM_VECTOR};

/// Evaluates one quasiquote template to the syntax it denotes.
pub fn eval_quasiquote(
    template: &Sexp,
    scope: ScopeId,
    depth: usize,
    ctx: &mut EvalContext,
) -> Result<Sexp, HqlError> {
    let mut gensyms = HashMap::new();
    match walk(template, 0, scope, depth, ctx, &mut gensyms)? {
        Walked::One(sexp) => Ok(sexp),
        Walked::Splice(_) => Err(ctx.error(
            ErrorKind::SpliceNotAList {
                actual: "splice at template top level".into(),
            },
            template.meta.as_ref(),
        )),
    }
}

/// A walked template node: a single form, or elements to splice into the
/// surrounding list.
enum Walked {
    One(Sexp),
    Splice(Vec<Sexp>),
}

fn walk(
    node: &Sexp,
    qq_depth: usize,
    scope: ScopeId,
    depth: usize,
    ctx: &mut EvalContext,
    gensyms: &mut HashMap<String, String>,
) -> Result<Walked, HqlError> {
    match &*node.kind {
        SexpKind::Symbol(name) if qq_depth == 0 && name.len() > 1 && name.ends_with('#') => {
            let fresh = gensyms
                .entry(name.clone())
                .or_insert_with(|| next_gensym(&name[..name.len() - 1]))
                .clone();
            Ok(Walked::One(Sexp::symbol(fresh, node.meta.clone())))
        }
        SexpKind::List(items) => walk_list(node, items, qq_depth, scope, depth, ctx, gensyms),
        _ => Ok(Walked::One(node.clone())),
    }
}

fn walk_list(
    node: &Sexp,
    items: &[Sexp],
    qq_depth: usize,
    scope: ScopeId,
    depth: usize,
    ctx: &mut EvalContext,
    gensyms: &mut HashMap<String, String>,
) -> Result<Walked, HqlError> {
    match (node.head_symbol(), items) {
        (Some("unquote"), [head, arg]) => {
            if qq_depth == 0 {
                let value = eval(arg, scope, depth, ctx)?;
                Ok(Walked::One(value_to_sexp(value)))
            } else {
                // Preserved as data one level down.
                let inner = walk_one(arg, qq_depth - 1, scope, depth, ctx, gensyms)?;
                Ok(Walked::One(Sexp::list(
                    vec![head.clone(), inner],
                    node.meta.clone(),
                )))
            }
        }
        (Some("unquote-splicing"), [head, arg]) => {
            if qq_depth == 0 {
                let value = eval(arg, scope, depth, ctx)?;
                Ok(Walked::Splice(splice_elements(value, node, ctx)?))
            } else {
                let inner = walk_one(arg, qq_depth - 1, scope, depth, ctx, gensyms)?;
                Ok(Walked::One(Sexp::list(
                    vec![head.clone(), inner],
                    node.meta.clone(),
                )))
            }
        }
        (Some("quasiquote"), [head, arg]) => {
            // A nested template: deeper depth, fresh auto-gensym mapping.
            let mut nested_gensyms = HashMap::new();
            let inner = walk_one(arg, qq_depth + 1, scope, depth, ctx, &mut nested_gensyms)?;
            Ok(Walked::One(Sexp::list(
                vec![head.clone(), inner],
                node.meta.clone(),
            )))
        }
        _ => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match walk(item, qq_depth, scope, depth, ctx, gensyms)? {
                    Walked::One(sexp) => out.push(sexp),
                    Walked::Splice(elements) => out.extend(elements),
                }
            }
            Ok(Walked::One(Sexp::list(out, node.meta.clone())))
        }
    }
}

fn walk_one(
    node: &Sexp,
    qq_depth: usize,
    scope: ScopeId,
    depth: usize,
    ctx: &mut EvalContext,
    gensyms: &mut HashMap<String, String>,
) -> Result<Sexp, HqlError> {
    match walk(node, qq_depth, scope, depth, ctx, gensyms)? {
        Walked::One(sexp) => Ok(sexp),
        Walked::Splice(_) => Err(ctx.error(
            ErrorKind::SpliceNotAList {
                actual: "splice outside list context".into(),
            },
            node.meta.as_ref(),
        )),
    }
}

/// A splice value must be a list; a `(vector ...)` form splices its tail.
fn splice_elements(value: Value, node: &Sexp, ctx: &EvalContext) -> Result<Vec<Sexp>, HqlError> {
    match value.realize(MAX_REALIZED_SEQUENCE) {
        Value::List(items) => {
            let mut sexps: Vec<Sexp> = items.into_iter().map(value_to_sexp).collect();
            if sexps.first().and_then(Sexp::as_symbol) == Some(SYM_VECTOR) {
                sexps.remove(0);
            }
            Ok(sexps)
        }
        other => Err(ctx.error(
            ErrorKind::SpliceNotAList {
                actual: other.type_name().into(),
            },
            node.meta.as_ref(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SourceContext;
    use crate::interp::{install_natives, ScopeArena};
    use crate::macros::gensym::reset_gensym;
    use crate::syntax::read;

    fn expand(source: &str) -> Result<Sexp, HqlError> {
        let forms = read(source, "test.hql").expect("read");
        let mut arena = ScopeArena::new();
        install_natives(&mut arena);
        let mut ctx = EvalContext::new(&mut arena, SourceContext::from_file("test.hql", source));
        let template = &forms[0].as_list().expect("quasiquote form")[1];
        eval_quasiquote(template, ScopeArena::GLOBAL, 0, &mut ctx)
    }

    #[test]
    fn unquote_evaluates_at_depth_zero() {
        let result = expand("`(a ~(+ 1 2))").unwrap();
        assert_eq!(result.pretty(), "(a 3)");
    }

    #[test]
    fn splicing_requires_and_flattens_lists() {
        let result = expand("`(a ~@(list 1 2) b)").unwrap();
        assert_eq!(result.pretty(), "(a 1 2 b)");

        let err = expand("`(a ~@1)").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::SpliceNotAList { .. }));
    }

    #[test]
    fn vector_results_splice_their_tail() {
        let result = expand("`(f ~@(quote (vector 1 2 3)))").unwrap();
        assert_eq!(result.pretty(), "(f 1 2 3)");
    }

    #[test]
    fn nested_quasiquote_preserves_inner_unquote() {
        // Depth 1: the inner unquote survives as data.
        let result = expand("`(a `(b ~x))").unwrap();
        assert_eq!(result.pretty(), "(a `(b ~x))");
    }

    #[test]
    fn auto_gensym_is_shared_within_one_template() {
        reset_gensym();
        let result = expand("`(let tmp# (f tmp#))").unwrap();
        let items = result.as_list().unwrap();
        let first = items[1].as_symbol().unwrap();
        let inner = items[2].as_list().unwrap()[1].as_symbol().unwrap();
        assert_eq!(first, inner);
        assert!(first.starts_with("tmp_"));
    }

    #[test]
    fn auto_gensym_differs_between_templates() {
        reset_gensym();
        let a = expand("`(x tmp#)").unwrap();
        let b = expand("`(x tmp#)").unwrap();
        let name_a = a.as_list().unwrap()[1].as_symbol().unwrap().to_string();
        let name_b = b.as_list().unwrap()[1].as_symbol().unwrap().to_string();
        assert_ne!(name_a, name_b);
    }
}
