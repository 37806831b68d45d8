//! Tree-walking evaluator for macro bodies and macro-time arguments.
//!
//! The special-form set is deliberately fixed: `quote`, `quasiquote`,
//! `if`, `cond`, `let`, `var`, `fn`, and application. Everything else is
//! a native or a user closure. Call depth is bounded; exceeding the bound
//! reports an error attributed to the macro currently expanding.

use std::sync::Arc;

use crate::errors::{meta_span, ErrorKind, ErrorReporting, HqlError, ReportContext, SourceContext};
use crate::interp::{sexp_to_value, Closure, ScopeArena, ScopeId, Value};
use crate::macros::gensym::next_gensym;
use crate::macros::quasiquote;
use crate::syntax::{Meta, Sexp, SexpKind, SYM_HASH_MAP, SYM_VECTOR};

/// Default call-depth bound for macro-time evaluation. Recursive
/// code-generating macros hit this before they hit the host stack.
pub const MAX_CALL_DEPTH: usize = 100;

/// Shared state for one evaluation: the scope arena and error context.
pub struct EvalContext<'a> {
    pub arena: &'a mut ScopeArena,
    pub max_depth: usize,
    pub report: ReportContext,
}

impl<'a> EvalContext<'a> {
    pub fn new(arena: &'a mut ScopeArena, source: SourceContext) -> Self {
        EvalContext {
            arena,
            max_depth: MAX_CALL_DEPTH,
            report: ReportContext::new(source, "macro"),
        }
    }

    /// Builds an error, attributing it to the macro currently expanding.
    pub fn error(&self, kind: ErrorKind, meta: Option<&Meta>) -> HqlError {
        let err = self.report.report(kind, meta_span(meta));
        match &self.arena.current_macro_context {
            Some(name) => err.with_help(format!("while expanding macro '{}'", name)),
            None => err,
        }
    }
}

/// Evaluates a sequence of body forms, returning the last value.
pub fn eval_body(
    body: &[Sexp],
    scope: ScopeId,
    depth: usize,
    ctx: &mut EvalContext,
) -> Result<Value, HqlError> {
    let mut last = Value::Nil;
    for form in body {
        last = eval(form, scope, depth, ctx)?;
    }
    Ok(last)
}

/// Evaluates one form.
pub fn eval(
    expr: &Sexp,
    scope: ScopeId,
    depth: usize,
    ctx: &mut EvalContext,
) -> Result<Value, HqlError> {
    match &*expr.kind {
        SexpKind::Literal(_) => Ok(sexp_to_value(expr)),
        SexpKind::Symbol(name) => ctx.arena.lookup(scope, name).ok_or_else(|| {
            ctx.error(
                ErrorKind::UndefinedSymbol {
                    symbol: name.clone(),
                },
                expr.meta.as_ref(),
            )
        }),
        SexpKind::List(items) => eval_list(expr, items, scope, depth, ctx),
    }
}

fn eval_list(
    expr: &Sexp,
    items: &[Sexp],
    scope: ScopeId,
    depth: usize,
    ctx: &mut EvalContext,
) -> Result<Value, HqlError> {
    let Some(head) = items.first() else {
        return Ok(Value::List(vec![]));
    };

    if let Some(name) = head.as_symbol() {
        match name {
            "quote" => return eval_quote(expr, items, ctx),
            "quasiquote" => {
                let template = expect_one_arg(expr, items, "quasiquote", ctx)?;
                let expanded = quasiquote::eval_quasiquote(template, scope, depth, ctx)?;
                return Ok(sexp_to_value(&expanded));
            }
            "unquote" | "unquote-splicing" => {
                return Err(ctx.error(ErrorKind::UnquoteOutsideQuasiquote, expr.meta.as_ref()))
            }
            "if" => return eval_if(expr, items, scope, depth, ctx),
            "cond" => return eval_cond(items, scope, depth, ctx),
            "let" | "var" => return eval_binding(expr, items, scope, depth, ctx),
            "fn" => return eval_fn(expr, items, scope, ctx),
            _ => {}
        }
    }

    // Application: head evaluates to a callable, arguments are strict.
    let callee = eval(head, scope, depth, ctx)?;
    let mut args = Vec::with_capacity(items.len() - 1);
    for item in &items[1..] {
        args.push(eval(item, scope, depth, ctx)?);
    }
    apply(callee, &args, expr, depth, ctx)
}

/// Applies a closure or native to already-evaluated arguments.
pub fn apply(
    callee: Value,
    args: &[Value],
    call: &Sexp,
    depth: usize,
    ctx: &mut EvalContext,
) -> Result<Value, HqlError> {
    if depth + 1 > ctx.max_depth {
        return Err(ctx.error(
            ErrorKind::InterpreterDepth {
                limit: ctx.max_depth,
            },
            call.meta.as_ref(),
        ));
    }
    match callee {
        Value::Native(name, f) => f(args).map_err(|message| {
            ctx.error(
                ErrorKind::TypeMismatch {
                    expected: format!("valid arguments to '{}'", name),
                    actual: message,
                },
                call.meta.as_ref(),
            )
        }),
        Value::Closure(closure) => {
            let call_scope = ctx.arena.push_scope(closure.env);
            bind_params(&closure, args, call_scope, call, ctx)?;
            eval_body(&closure.body, call_scope, depth + 1, ctx)
        }
        other => Err(ctx.error(
            ErrorKind::TypeMismatch {
                expected: "function".into(),
                actual: other.type_name().into(),
            },
            call.meta.as_ref(),
        )),
    }
}

fn bind_params(
    closure: &Closure,
    args: &[Value],
    scope: ScopeId,
    call: &Sexp,
    ctx: &mut EvalContext,
) -> Result<(), HqlError> {
    let required = closure.params.len();
    let arity_ok = if closure.rest.is_some() {
        args.len() >= required
    } else {
        args.len() == required
    };
    if !arity_ok {
        let name = closure.name.as_deref().unwrap_or("fn");
        let expected = if closure.rest.is_some() {
            format!("at least {}", required)
        } else {
            required.to_string()
        };
        return Err(ctx.error(
            ErrorKind::MacroArity {
                macro_name: name.into(),
                expected,
                actual: args.len(),
            },
            call.meta.as_ref(),
        ));
    }
    for (name, value) in closure.params.iter().zip(args) {
        ctx.arena.define(scope, name.as_str(), value.clone());
    }
    if let Some(rest) = &closure.rest {
        ctx.arena
            .define(scope, rest.as_str(), Value::List(args[required..].to_vec()));
    }
    Ok(())
}

// ============================================================================
// SPECIAL FORMS
// ============================================================================

fn expect_one_arg<'e>(
    expr: &Sexp,
    items: &'e [Sexp],
    form: &str,
    ctx: &EvalContext,
) -> Result<&'e Sexp, HqlError> {
    match items {
        [_, arg] => Ok(arg),
        _ => Err(ctx.error(
            ErrorKind::MacroArity {
                macro_name: form.into(),
                expected: "1".into(),
                actual: items.len() - 1,
            },
            expr.meta.as_ref(),
        )),
    }
}

fn eval_quote(expr: &Sexp, items: &[Sexp], ctx: &EvalContext) -> Result<Value, HqlError> {
    let arg = expect_one_arg(expr, items, "quote", ctx)?;
    Ok(sexp_to_value(arg))
}

fn eval_if(
    expr: &Sexp,
    items: &[Sexp],
    scope: ScopeId,
    depth: usize,
    ctx: &mut EvalContext,
) -> Result<Value, HqlError> {
    let (test, then_branch, else_branch) = match items {
        [_, t, a] => (t, a, None),
        [_, t, a, b] => (t, a, Some(b)),
        _ => {
            return Err(ctx.error(
                ErrorKind::MacroArity {
                    macro_name: "if".into(),
                    expected: "2 or 3".into(),
                    actual: items.len() - 1,
                },
                expr.meta.as_ref(),
            ))
        }
    };
    if eval(test, scope, depth, ctx)?.is_truthy() {
        eval(then_branch, scope, depth, ctx)
    } else {
        match else_branch {
            Some(b) => eval(b, scope, depth, ctx),
            None => Ok(Value::Nil),
        }
    }
}

fn eval_cond(
    items: &[Sexp],
    scope: ScopeId,
    depth: usize,
    ctx: &mut EvalContext,
) -> Result<Value, HqlError> {
    for clause in &items[1..] {
        let Some([test, body @ ..]) = clause.as_list() else {
            return Err(ctx.error(
                ErrorKind::TypeMismatch {
                    expected: "cond clause (test expr...)".into(),
                    actual: clause.type_name().into(),
                },
                clause.meta.as_ref(),
            ));
        };
        let taken = match test.as_symbol() {
            Some("else") => true,
            _ => eval(test, scope, depth, ctx)?.is_truthy(),
        };
        if taken {
            return eval_body(body, scope, depth, ctx);
        }
    }
    Ok(Value::Nil)
}

fn eval_binding(
    expr: &Sexp,
    items: &[Sexp],
    scope: ScopeId,
    depth: usize,
    ctx: &mut EvalContext,
) -> Result<Value, HqlError> {
    let [_, target, init] = items else {
        return Err(ctx.error(
            ErrorKind::MacroArity {
                macro_name: "let".into(),
                expected: "2".into(),
                actual: items.len() - 1,
            },
            expr.meta.as_ref(),
        ));
    };
    let Some(name) = target.as_symbol() else {
        return Err(ctx.error(
            ErrorKind::TypeMismatch {
                expected: "symbol".into(),
                actual: target.type_name().into(),
            },
            target.meta.as_ref(),
        ));
    };
    let value = eval(init, scope, depth, ctx)?;
    ctx.arena.define(scope, name, value.clone());
    Ok(value)
}

fn eval_fn(
    expr: &Sexp,
    items: &[Sexp],
    scope: ScopeId,
    ctx: &mut EvalContext,
) -> Result<Value, HqlError> {
    // (fn name [params] body...) defines; (fn [params] body...) is a value.
    let (name, params_node, body) = match items {
        [_, n, p, body @ ..] if n.as_symbol().is_some() => {
            (Some(n.as_symbol().unwrap().to_string()), p, body)
        }
        [_, p, body @ ..] => (None, p, body),
        _ => {
            return Err(ctx.error(
                ErrorKind::MacroArity {
                    macro_name: "fn".into(),
                    expected: "at least 2".into(),
                    actual: items.len() - 1,
                },
                expr.meta.as_ref(),
            ))
        }
    };
    let (params, rest) = parse_params(params_node, ctx)?;
    // A return-type annotation (`:number`) may sit between the parameter
    // vector and the body; it means nothing at macro time.
    let body = match body.first().and_then(Sexp::as_symbol) {
        Some(s) if s.starts_with(':') => &body[1..],
        _ => body,
    };
    let closure = Value::Closure(Arc::new(Closure {
        name: name.clone(),
        params,
        rest,
        body: body.to_vec(),
        env: scope,
    }));
    if let Some(name) = name {
        ctx.arena.define(scope, name, closure.clone());
    }
    Ok(closure)
}

/// Parses a parameter vector `[a b & rest]`. Type annotations (`a:number`)
/// are stripped at macro time; the validator sees them separately.
pub fn parse_params(
    node: &Sexp,
    ctx: &EvalContext,
) -> Result<(Vec<String>, Option<String>), HqlError> {
    let items = match node.as_list() {
        Some(items) if node.is_call_to(SYM_VECTOR) => &items[1..],
        Some(items) => items,
        None => {
            return Err(ctx.error(
                ErrorKind::TypeMismatch {
                    expected: "parameter vector".into(),
                    actual: node.type_name().into(),
                },
                node.meta.as_ref(),
            ))
        }
    };
    let mut params = Vec::new();
    let mut rest = None;
    let mut saw_rest_marker = false;
    for item in items {
        let Some(name) = item.as_symbol() else {
            return Err(ctx.error(
                ErrorKind::TypeMismatch {
                    expected: "parameter symbol".into(),
                    actual: item.type_name().into(),
                },
                item.meta.as_ref(),
            ));
        };
        if name == "&" {
            saw_rest_marker = true;
            continue;
        }
        let bare = name.split(':').next().unwrap_or(name).to_string();
        if saw_rest_marker {
            rest = Some(bare);
            saw_rest_marker = false;
        } else {
            params.push(bare);
        }
    }
    Ok((params, rest))
}

// ============================================================================
// NATIVES
// ============================================================================

/// Seeds a fresh arena's global scope with the macro-time natives.
pub fn install_natives(arena: &mut ScopeArena) {
    let g = ScopeArena::GLOBAL;
    for (name, f) in NATIVES {
        arena.define(g, *name, Value::Native(*name, *f));
    }
}

const NATIVES: &[(&str, crate::interp::NativeFn)] = &[
    ("+", native_add),
    ("-", native_sub),
    ("*", native_mul),
    ("/", native_div),
    ("%", native_rem),
    ("=", native_eq),
    ("!=", native_ne),
    ("<", native_lt),
    ("<=", native_le),
    (">", native_gt),
    (">=", native_ge),
    ("not", native_not),
    ("and", native_and),
    ("or", native_or),
    ("str", native_str),
    ("list", native_list),
    (SYM_VECTOR, native_list),
    (SYM_HASH_MAP, native_hash_map),
    ("concat", native_concat),
    ("nth", native_nth),
    ("count", native_count),
    ("first", native_first),
    ("rest", native_rest),
    ("range", native_range),
    ("gensym", native_gensym),
];

fn numbers(args: &[Value]) -> Result<Vec<f64>, String> {
    args.iter()
        .map(|v| match v {
            Value::Number(n) => Ok(*n),
            other => Err(format!("expected number, got {}", other.type_name())),
        })
        .collect()
}

fn native_add(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(numbers(args)?.iter().sum()))
}

fn native_sub(args: &[Value]) -> Result<Value, String> {
    let ns = numbers(args)?;
    match ns.split_first() {
        None => Err("'-' needs at least one argument".into()),
        Some((first, [])) => Ok(Value::Number(-first)),
        Some((first, rest)) => Ok(Value::Number(rest.iter().fold(*first, |a, b| a - b))),
    }
}

fn native_mul(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(numbers(args)?.iter().product()))
}

fn native_div(args: &[Value]) -> Result<Value, String> {
    let ns = numbers(args)?;
    match ns.split_first() {
        None => Err("'/' needs at least one argument".into()),
        Some((first, rest)) => Ok(Value::Number(rest.iter().fold(*first, |a, b| a / b))),
    }
}

fn native_rem(args: &[Value]) -> Result<Value, String> {
    match numbers(args)?.as_slice() {
        [a, b] => Ok(Value::Number(a % b)),
        other => Err(format!("'%' expects 2 arguments, got {}", other.len())),
    }
}

fn native_eq(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Bool(args.windows(2).all(|w| w[0] == w[1])))
}

fn native_ne(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Bool(args.windows(2).any(|w| w[0] != w[1])))
}

fn compare(args: &[Value], ok: fn(f64, f64) -> bool) -> Result<Value, String> {
    let ns = numbers(args)?;
    Ok(Value::Bool(ns.windows(2).all(|w| ok(w[0], w[1]))))
}

fn native_lt(args: &[Value]) -> Result<Value, String> {
    compare(args, |a, b| a < b)
}

fn native_le(args: &[Value]) -> Result<Value, String> {
    compare(args, |a, b| a <= b)
}

fn native_gt(args: &[Value]) -> Result<Value, String> {
    compare(args, |a, b| a > b)
}

fn native_ge(args: &[Value]) -> Result<Value, String> {
    compare(args, |a, b| a >= b)
}

fn native_not(args: &[Value]) -> Result<Value, String> {
    match args {
        [v] => Ok(Value::Bool(!v.is_truthy())),
        _ => Err(format!("'not' expects 1 argument, got {}", args.len())),
    }
}

fn native_and(args: &[Value]) -> Result<Value, String> {
    Ok(args
        .iter()
        .find(|v| !v.is_truthy())
        .cloned()
        .unwrap_or_else(|| args.last().cloned().unwrap_or(Value::Bool(true))))
}

fn native_or(args: &[Value]) -> Result<Value, String> {
    Ok(args
        .iter()
        .find(|v| v.is_truthy())
        .cloned()
        .unwrap_or_else(|| args.last().cloned().unwrap_or(Value::Bool(false))))
}

fn native_str(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Str(args.iter().map(|v| v.to_string()).collect()))
}

fn native_list(args: &[Value]) -> Result<Value, String> {
    Ok(Value::List(args.to_vec()))
}

fn native_hash_map(args: &[Value]) -> Result<Value, String> {
    if args.len() % 2 != 0 {
        return Err("hash-map needs an even number of arguments".into());
    }
    let mut map = im::HashMap::new();
    for pair in args.chunks(2) {
        let key = match &pair[0] {
            Value::Str(s) => s.clone(),
            Value::Symbol(s) => s.clone(),
            other => return Err(format!("map key must be a string, got {}", other.type_name())),
        };
        map.insert(key, pair[1].clone());
    }
    Ok(Value::Map(map))
}

fn native_concat(args: &[Value]) -> Result<Value, String> {
    let mut out = Vec::new();
    for arg in args {
        match arg.clone().realize(crate::interp::MAX_REALIZED_SEQUENCE) {
            Value::List(items) => out.extend(items),
            other => return Err(format!("expected list, got {}", other.type_name())),
        }
    }
    Ok(Value::List(out))
}

fn as_list(v: &Value) -> Result<Vec<Value>, String> {
    match v.clone().realize(crate::interp::MAX_REALIZED_SEQUENCE) {
        Value::List(items) => Ok(items),
        other => Err(format!("expected list, got {}", other.type_name())),
    }
}

fn native_nth(args: &[Value]) -> Result<Value, String> {
    match args {
        [coll, Value::Number(i)] => {
            let items = as_list(coll)?;
            Ok(items.get(*i as usize).cloned().unwrap_or(Value::Nil))
        }
        _ => Err("'nth' expects a collection and an index".into()),
    }
}

fn native_count(args: &[Value]) -> Result<Value, String> {
    match args {
        [coll] => Ok(Value::Number(as_list(coll)?.len() as f64)),
        _ => Err(format!("'count' expects 1 argument, got {}", args.len())),
    }
}

fn native_first(args: &[Value]) -> Result<Value, String> {
    match args {
        [coll] => Ok(as_list(coll)?.first().cloned().unwrap_or(Value::Nil)),
        _ => Err(format!("'first' expects 1 argument, got {}", args.len())),
    }
}

fn native_rest(args: &[Value]) -> Result<Value, String> {
    match args {
        [coll] => {
            let items = as_list(coll)?;
            Ok(Value::List(items.get(1..).unwrap_or(&[]).to_vec()))
        }
        _ => Err(format!("'rest' expects 1 argument, got {}", args.len())),
    }
}

fn native_range(args: &[Value]) -> Result<Value, String> {
    let ns = numbers(args)?;
    let (start, end, step) = match ns.as_slice() {
        [end] => (0.0, *end, 1.0),
        [start, end] => (*start, *end, 1.0),
        [start, end, step] => (*start, *end, *step),
        _ => return Err("'range' expects 1 to 3 arguments".into()),
    };
    if step == 0.0 {
        return Err("'range' step must be non-zero".into());
    }
    Ok(Value::Range { start, end, step })
}

fn native_gensym(args: &[Value]) -> Result<Value, String> {
    let prefix = match args {
        [] => "gensym",
        [Value::Str(s)] => s.as_str(),
        [other] => return Err(format!("'gensym' prefix must be a string, got {}", other.type_name())),
        _ => return Err("'gensym' expects at most 1 argument".into()),
    };
    Ok(Value::Symbol(next_gensym(prefix)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::read;

    fn eval_source(source: &str) -> Result<Value, HqlError> {
        let forms = read(source, "test.hql").expect("read");
        let mut arena = ScopeArena::new();
        install_natives(&mut arena);
        let mut ctx = EvalContext::new(&mut arena, SourceContext::from_file("test.hql", source));
        eval_body(&forms, ScopeArena::GLOBAL, 0, &mut ctx)
    }

    #[test]
    fn arithmetic_and_comparison() {
        assert_eq!(eval_source("(+ 1 2 3)").unwrap(), Value::Number(6.0));
        assert_eq!(eval_source("(- 10 1 2)").unwrap(), Value::Number(7.0));
        assert_eq!(eval_source("(< 1 2 3)").unwrap(), Value::Bool(true));
        assert_eq!(eval_source("(= 2 2)").unwrap(), Value::Bool(true));
    }

    #[test]
    fn let_defines_and_returns() {
        assert_eq!(eval_source("(let x 5) (+ x 1)").unwrap(), Value::Number(6.0));
    }

    #[test]
    fn named_fn_persists_across_forms() {
        let v = eval_source("(fn double [x] (* x 2)) (double 21)").unwrap();
        assert_eq!(v, Value::Number(42.0));
    }

    #[test]
    fn rest_params_collect_a_list() {
        let v = eval_source("(fn tail [x & xs] xs) (tail 1 2 3)").unwrap();
        assert_eq!(v, Value::List(vec![Value::Number(2.0), Value::Number(3.0)]));
    }

    #[test]
    fn cond_takes_the_first_truthy_clause() {
        let v = eval_source("(cond ((= 1 2) \"no\") (else \"yes\"))").unwrap();
        assert_eq!(v, Value::Str("yes".into()));
    }

    #[test]
    fn call_depth_is_bounded_at_the_documented_limit() {
        // Pins the depth cap so recursive code-generating macros fail
        // predictably rather than by host stack overflow.
        assert_eq!(MAX_CALL_DEPTH, 100);
        let err = eval_source("(fn loop [] (loop)) (loop)").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InterpreterDepth { limit: 100 }));
    }

    #[test]
    fn quote_returns_syntax_as_data() {
        let v = eval_source("'(a 1)").unwrap();
        assert_eq!(
            v,
            Value::List(vec![Value::Symbol("a".into()), Value::Number(1.0)])
        );
    }

    #[test]
    fn gensym_is_monotone() {
        let a = eval_source("(gensym \"t\")").unwrap();
        let b = eval_source("(gensym \"t\")").unwrap();
        assert_ne!(a, b);
    }
}
