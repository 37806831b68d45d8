//! Core expansion engine.
//!
//! Expansion is a fixed point over each top-level form: within one pass,
//! forms expand depth-first so macro calls in argument position are
//! rewritten before the outer macro receives them. The no-change test is
//! reference identity on the node allocation.
//!
//! Arguments to a macro follow the hybrid policy: a list headed by a known
//! operator (defined function, defined macro, interpreter special form, or
//! a `%` primitive) is evaluated at macro time; anything else crosses as
//! S-expression data. This lets computation macros receive values while
//! code-generating macros receive their clauses verbatim.

use crate::errors::{meta_span, ErrorKind, ErrorReporting, HqlError, SourceContext};
use crate::interp::{
    self, eval_body, install_natives, sexp_to_value, value_to_sexp, EvalContext, ScopeArena,
    ScopeId, Value,
};
use crate::macros::types::{ExpandOptions, MacroClosure, MacroExpansion, INTERP_SPECIAL_FORMS};
use crate::syntax::{Meta, Sexp, SexpKind};

/// Expands a whole program. Macro definition forms register and are
/// removed; named function definitions are additionally evaluated into the
/// persistent macro-time environment so later macros can call them.
pub fn expand_program(
    forms: Vec<Sexp>,
    arena: &mut ScopeArena,
    source: SourceContext,
    options: &ExpandOptions,
) -> Result<MacroExpansion, HqlError> {
    if arena.lookup(ScopeArena::GLOBAL, "+").is_none() {
        install_natives(arena);
    }
    arena.current_file = options.current_file.clone();

    let mut expander = Expander {
        ctx: EvalContext::new(arena, source),
        options: options.clone(),
        warnings: Vec::new(),
    };

    let mut out = Vec::new();
    // Left-to-right: a macro definition is visible to every later form.
    for form in forms {
        if let Some(closure) = parse_macro_definition(&form, ScopeArena::GLOBAL, &mut expander)? {
            expander.ctx.arena.define_macro(ScopeArena::GLOBAL, closure);
            continue;
        }
        let expanded = expander.fixed_point(form, ScopeArena::GLOBAL)?;
        seed_named_function(&expanded, &mut expander);
        out.push(expanded);
    }

    Ok(MacroExpansion {
        forms: out,
        warnings: expander.warnings,
    })
}

/// Performs a single outer rewrite per form instead of running to a fixed
/// point; the introspection API (`macroexpand1`) is its only caller.
pub fn expand_program_once(
    forms: Vec<Sexp>,
    arena: &mut ScopeArena,
    source: SourceContext,
    options: &ExpandOptions,
) -> Result<MacroExpansion, HqlError> {
    if arena.lookup(ScopeArena::GLOBAL, "+").is_none() {
        install_natives(arena);
    }
    arena.current_file = options.current_file.clone();

    let mut expander = Expander {
        ctx: EvalContext::new(arena, source),
        options: options.clone(),
        warnings: Vec::new(),
    };

    let mut out = Vec::new();
    for form in forms {
        if let Some(closure) = parse_macro_definition(&form, ScopeArena::GLOBAL, &mut expander)? {
            expander.ctx.arena.define_macro(ScopeArena::GLOBAL, closure);
            continue;
        }
        out.push(expander.expand_form(form, ScopeArena::GLOBAL, 0)?);
    }

    Ok(MacroExpansion {
        forms: out,
        warnings: expander.warnings,
    })
}

struct Expander<'a> {
    ctx: EvalContext<'a>,
    options: ExpandOptions,
    warnings: Vec<HqlError>,
}

impl<'a> Expander<'a> {
    /// Re-expands one form until nothing changes, bounded by the iteration
    /// limit. Hitting the limit records a warning and keeps the current
    /// form, so an infinite macro can never hang the compiler.
    fn fixed_point(&mut self, form: Sexp, scope: ScopeId) -> Result<Sexp, HqlError> {
        let mut current = form;
        for _ in 0..self.options.iteration_limit {
            let next = self.expand_form(current.clone(), scope, 0)?;
            if Sexp::same_node(&current, &next) {
                return Ok(current);
            }
            current = next;
        }
        let name = current.head_symbol().unwrap_or("<form>").to_string();
        self.warnings.push(
            self.ctx
                .report
                .report(
                    ErrorKind::MalformedMacro {
                        macro_name: name,
                        reason: format!(
                            "expansion did not reach a fixed point within {} iterations",
                            self.options.iteration_limit
                        ),
                    },
                    meta_span(current.meta.as_ref()),
                )
                .as_warning(),
        );
        Ok(current)
    }

    fn expand_form(&mut self, node: Sexp, scope: ScopeId, depth: usize) -> Result<Sexp, HqlError> {
        if depth > self.options.max_depth {
            return Err(self.ctx.error(
                ErrorKind::InterpreterDepth {
                    limit: self.options.max_depth,
                },
                node.meta.as_ref(),
            ));
        }

        let SexpKind::List(items) = &*node.kind else {
            return Ok(node);
        };
        if items.is_empty() {
            return Ok(node);
        }

        // Quoted data and quasiquote templates are never expanded; the
        // interpreter gives them meaning inside macro bodies.
        if let Some(head) = node.head_symbol() {
            match head {
                "quote" | "quasiquote" => return Ok(node),
                "macro" => {
                    // A nested definition registers in the current scope and
                    // leaves no residue in the output.
                    if let Some(closure) = parse_macro_definition(&node, scope, self)? {
                        self.ctx.arena.define_macro(scope, closure);
                        return Ok(Sexp::null(node.meta.clone()));
                    }
                }
                _ => {}
            }
        }

        // Depth-first: arguments are rewritten before the head is tried.
        let mut changed = false;
        let mut expanded_items = Vec::with_capacity(items.len());
        for item in items {
            let expanded = self.expand_form(item.clone(), scope, depth + 1)?;
            if !Sexp::same_node(item, &expanded) {
                changed = true;
            }
            expanded_items.push(expanded);
        }

        let head_macro = node
            .head_symbol()
            .and_then(|name| self.ctx.arena.lookup_macro(scope, name));

        if let Some(closure) = head_macro {
            let call_meta = node.meta.clone();
            let result =
                self.invoke_macro(&closure, &expanded_items[1..], call_meta.as_ref(), scope)?;
            // Further macro calls inside the rewrite wait for the next
            // fixed-point iteration; that keeps the iteration limit (not
            // the depth limit) the bound on infinite macros.
            return Ok(retarget_meta(result, call_meta.as_ref()));
        }

        if changed {
            Ok(Sexp::list(expanded_items, node.meta.clone()))
        } else {
            Ok(node)
        }
    }

    /// Invokes one macro closure: classify arguments, bind, evaluate the
    /// body, convert the result back to syntax.
    fn invoke_macro(
        &mut self,
        closure: &MacroClosure,
        args: &[Sexp],
        call_meta: Option<&Meta>,
        scope: ScopeId,
    ) -> Result<Sexp, HqlError> {
        if !closure.accepts(args.len()) {
            return Err(self.ctx.error(
                ErrorKind::MacroArity {
                    macro_name: closure.name.clone(),
                    expected: closure.expected_arity(),
                    actual: args.len(),
                },
                call_meta,
            ));
        }

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.classify_argument(arg, scope)?);
        }

        let call_scope = self.ctx.arena.push_scope(closure.env);
        for (name, value) in closure.params.iter().zip(&values) {
            self.ctx.arena.define(call_scope, name.as_str(), value.clone());
        }
        if let Some(rest) = &closure.rest {
            self.ctx.arena.define(
                call_scope,
                rest.as_str(),
                Value::List(values[closure.params.len()..].to_vec()),
            );
        }

        let saved_context = self.ctx.arena.current_macro_context.clone();
        self.ctx.arena.current_macro_context = Some(closure.name.clone());
        let result = eval_body(&closure.body, call_scope, 0, &mut self.ctx);
        self.ctx.arena.current_macro_context = saved_context;

        Ok(value_to_sexp(result?))
    }

    /// The hybrid argument policy. Evaluation failures fall back to
    /// passing the argument as data: an argument mentioning runtime-only
    /// bindings is syntax from the macro's point of view.
    fn classify_argument(&mut self, arg: &Sexp, scope: ScopeId) -> Result<Value, HqlError> {
        let Some(head) = arg.head_symbol() else {
            return Ok(sexp_to_value(arg));
        };

        if let Some(primitive) = head.strip_prefix('%') {
            if self.ctx.arena.lookup(scope, primitive).is_none() {
                return Err(self.ctx.error(
                    ErrorKind::UnknownPrimitive { name: head.into() },
                    arg.meta.as_ref(),
                ));
            }
            let items = arg.as_list().expect("head_symbol implies list");
            let mut stripped = items.to_vec();
            stripped[0] = Sexp::symbol(primitive, items[0].meta.clone());
            let call = Sexp::list(stripped, arg.meta.clone());
            return interp::eval(&call, scope, 0, &mut self.ctx);
        }

        if self.is_known_operator(head, scope) {
            match interp::eval(arg, scope, 0, &mut self.ctx) {
                Ok(value) => return Ok(value),
                Err(_) => return Ok(sexp_to_value(arg)),
            }
        }
        Ok(sexp_to_value(arg))
    }

    fn is_known_operator(&self, name: &str, scope: ScopeId) -> bool {
        INTERP_SPECIAL_FORMS.contains(&name)
            || self.ctx.arena.lookup_macro(scope, name).is_some()
            || matches!(
                self.ctx.arena.lookup(scope, name),
                Some(Value::Closure(_)) | Some(Value::Native(..))
            )
    }
}

/// Parses `(macro name [params...] body...)`; `&` introduces the single
/// rest parameter.
fn parse_macro_definition(
    node: &Sexp,
    scope: ScopeId,
    expander: &mut Expander,
) -> Result<Option<MacroClosure>, HqlError> {
    if !node.is_call_to("macro") {
        return Ok(None);
    }
    let items = node.as_list().expect("is_call_to implies list");
    let [_, name_node, params_node, body @ ..] = items else {
        return Err(expander.ctx.error(
            ErrorKind::MalformedMacro {
                macro_name: items
                    .get(1)
                    .and_then(Sexp::as_symbol)
                    .unwrap_or("<anonymous>")
                    .into(),
                reason: "expected (macro name [params...] body...)".into(),
            },
            node.meta.as_ref(),
        ));
    };
    let Some(name) = name_node.as_symbol() else {
        return Err(expander.ctx.error(
            ErrorKind::MalformedMacro {
                macro_name: "<anonymous>".into(),
                reason: "macro name must be a symbol".into(),
            },
            name_node.meta.as_ref(),
        ));
    };
    if body.is_empty() {
        return Err(expander.ctx.error(
            ErrorKind::MalformedMacro {
                macro_name: name.into(),
                reason: "macro body is empty".into(),
            },
            node.meta.as_ref(),
        ));
    }
    let (params, rest) = interp::parse_params(params_node, &expander.ctx)?;
    Ok(Some(MacroClosure {
        name: name.to_string(),
        params,
        rest,
        body: body.to_vec(),
        env: scope,
    }))
}

/// A named top-level function becomes callable from later macro bodies
/// ("incremental evaluation"). The form stays in the output untouched.
fn seed_named_function(form: &Sexp, expander: &mut Expander) {
    let is_named_fn = form.is_call_to("fn")
        && form
            .as_list()
            .and_then(|items| items.get(1))
            .and_then(Sexp::as_symbol)
            .is_some();
    if is_named_fn {
        // Best effort: a body using runtime-only forms still binds; errors
        // surface only if a macro actually calls it.
        let _ = interp::eval(form, ScopeArena::GLOBAL, 0, &mut expander.ctx);
    }
}

/// Retargets generated metas to the call site. A node keeps its meta only
/// when it already points at the same file at or after the call site line.
pub fn retarget_meta(node: Sexp, site: Option<&Meta>) -> Sexp {
    let Some(site) = site else {
        return node;
    };
    let meta = match &node.meta {
        Some(meta) if !meta.should_retarget_to(site) => node.meta.clone(),
        _ => Some(site.clone()),
    };
    let kind = match &*node.kind {
        SexpKind::List(items) => {
            let new_items: Vec<Sexp> = items
                .iter()
                .map(|item| retarget_meta(item.clone(), Some(site)))
                .collect();
            std::sync::Arc::new(SexpKind::List(new_items))
        }
        _ => node.kind.clone(),
    };
    Sexp { kind, meta }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::gensym::reset_gensym;
    use crate::syntax::read;

    fn expand_source(source: &str) -> Result<MacroExpansion, HqlError> {
        let forms = read(source, "test.hql").expect("read");
        let mut arena = ScopeArena::new();
        expand_program(
            forms,
            &mut arena,
            SourceContext::from_file("test.hql", source),
            &ExpandOptions::default(),
        )
    }

    fn pretty_all(expansion: &MacroExpansion) -> Vec<String> {
        expansion.forms.iter().map(Sexp::pretty).collect()
    }

    #[test]
    fn macro_definitions_are_removed_from_output() {
        let out = expand_source("(macro noop [x] x) (noop 42)").unwrap();
        assert_eq!(pretty_all(&out), vec!["42"]);
    }

    #[test]
    fn computation_macros_receive_evaluated_arguments() {
        // Seed scenario: triple-nested decrement evaluates at macro time.
        let out =
            expand_source("(macro inc1 [x] (- x 1)) (inc1 (inc1 (inc1 10)))").unwrap();
        assert_eq!(pretty_all(&out), vec!["7"]);
    }

    #[test]
    fn unknown_operator_arguments_pass_as_syntax() {
        let out = expand_source(
            "(macro second-clause [& clauses] `(pick ~(nth clauses 1))) \
             (second-clause (when a 1) (otherwise 2))",
        )
        .unwrap();
        assert_eq!(pretty_all(&out), vec!["(pick (otherwise 2))"]);
    }

    #[test]
    fn gensym_macro_expands_hygienically() {
        reset_gensym();
        let out = expand_source(
            "(macro swap [a b] (var tmp (gensym \"swap_tmp\")) \
             `(let (~tmp ~a) (set! ~a ~b) (set! ~b ~tmp))) \
             (swap x y)",
        )
        .unwrap();
        assert_eq!(
            pretty_all(&out),
            vec!["(let (swap_tmp_0 x) (set! x y) (set! y swap_tmp_0))"]
        );
    }

    #[test]
    fn expansion_is_idempotent() {
        let source = "(macro inc1 [x] (- x 1)) (inc1 (inc1 10))";
        let first = expand_source(source).unwrap();
        let rendered = pretty_all(&first).join(" ");
        let second = expand_source(&rendered).unwrap();
        assert_eq!(pretty_all(&first), pretty_all(&second));
    }

    #[test]
    fn infinite_macro_warns_instead_of_hanging() {
        let out = expand_source("(macro forever [x] `(forever ~x)) (forever 1)").unwrap();
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].is_warning());
    }

    #[test]
    fn arity_mismatch_is_fatal() {
        let err = expand_source("(macro pair [a b] `(~a ~b)) (pair 1)").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::MacroArity { .. }));
    }

    #[test]
    fn named_functions_accumulate_for_later_macros() {
        let out = expand_source(
            "(fn twice [x] (* x 2)) (macro m [x] (twice x)) (m 21)",
        )
        .unwrap();
        assert_eq!(pretty_all(&out), vec!["(fn twice [x] (* x 2))", "42"]);
    }

    #[test]
    fn rest_parameters_collect_trailing_arguments() {
        let out = expand_source(
            "(macro count-args [& xs] (count xs)) (count-args a b c)",
        )
        .unwrap();
        assert_eq!(pretty_all(&out), vec!["3"]);
    }

    #[test]
    fn expansion_metas_point_at_the_call_site() {
        let source = "(macro mk [x] `(wrapped ~x))\n(mk 5)";
        let forms = read(source, "main.hql").expect("read");
        let mut arena = ScopeArena::new();
        let out = expand_program(
            forms,
            &mut arena,
            SourceContext::from_file("main.hql", source),
            &ExpandOptions::default(),
        )
        .unwrap();
        let expanded = &out.forms[0];
        let meta = expanded.meta.as_ref().expect("call-site meta");
        assert_eq!(meta.line, 2);
        for child in expanded.as_list().unwrap() {
            let m = child.meta.as_ref().expect("retargeted meta");
            assert_eq!(m.file.as_deref(), Some("main.hql"));
            assert!(m.line >= 2);
        }
    }
}
