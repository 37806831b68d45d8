//! Semantic validator.
//!
//! Runs on fully expanded forms, before any optimization, so every message
//! points at user source positions. Checks:
//!
//! - duplicate `let`/`var`/`const`/`fn` declarations in one scope (fatal)
//! - `set!`/`=` targets resolve through scope lookup (fatal)
//! - arity of calls to known functions (warning; escalates to error for
//!   typed callees or under `strict`)
//! - property access against the built-in method table for strings,
//!   arrays, and numbers (warning unless `strict`)
//!
//! Type information is local only: literal types, parameter annotations
//! (`a:number`), and propagation through `let` initializers and known
//! method returns.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::errors::{
    meta_span, ErrorKind, ErrorReporting, HqlError, ReportContext, SourceContext,
};
use crate::syntax::{Lit, Sexp, SexpKind, SYM_HASH_MAP, SYM_TEMPLATE, SYM_VECTOR};

#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Escalates soft diagnostics (arity, property, argument types) to
    /// errors.
    pub strict: bool,
}

/// Successful validation still carries the soft diagnostics.
#[derive(Debug)]
pub struct Validation {
    pub warnings: Vec<HqlError>,
}

/// The local type lattice. `Unknown` absorbs everything the checker
/// cannot see locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ty {
    Number,
    Str,
    Bool,
    Null,
    Array,
    Object,
    Function,
    Unknown,
}

impl Ty {
    pub fn name(self) -> &'static str {
        match self {
            Ty::Number => "number",
            Ty::Str => "string",
            Ty::Bool => "boolean",
            Ty::Null => "null",
            Ty::Array => "array",
            Ty::Object => "object",
            Ty::Function => "function",
            Ty::Unknown => "unknown",
        }
    }

    fn from_annotation(name: &str) -> Ty {
        match name {
            "number" | "int" | "float" => Ty::Number,
            "string" => Ty::Str,
            "boolean" | "bool" => Ty::Bool,
            "array" => Ty::Array,
            "object" | "map" => Ty::Object,
            "function" => Ty::Function,
            _ => Ty::Unknown,
        }
    }
}

/// Built-in method table: property name and its return type, per base
/// type. Mismatched lookups on typed expressions are reported.
static METHOD_TABLE: Lazy<HashMap<Ty, HashMap<&'static str, Ty>>> = Lazy::new(|| {
    let string_methods: &[(&str, Ty)] = &[
        ("length", Ty::Number),
        ("toUpperCase", Ty::Str),
        ("toLowerCase", Ty::Str),
        ("trim", Ty::Str),
        ("trimStart", Ty::Str),
        ("trimEnd", Ty::Str),
        ("split", Ty::Array),
        ("indexOf", Ty::Number),
        ("lastIndexOf", Ty::Number),
        ("includes", Ty::Bool),
        ("startsWith", Ty::Bool),
        ("endsWith", Ty::Bool),
        ("slice", Ty::Str),
        ("substring", Ty::Str),
        ("charAt", Ty::Str),
        ("charCodeAt", Ty::Number),
        ("replace", Ty::Str),
        ("replaceAll", Ty::Str),
        ("concat", Ty::Str),
        ("repeat", Ty::Str),
        ("padStart", Ty::Str),
        ("padEnd", Ty::Str),
        ("toString", Ty::Str),
    ];
    let array_methods: &[(&str, Ty)] = &[
        ("length", Ty::Number),
        ("push", Ty::Number),
        ("pop", Ty::Unknown),
        ("shift", Ty::Unknown),
        ("unshift", Ty::Number),
        ("map", Ty::Array),
        ("filter", Ty::Array),
        ("reduce", Ty::Unknown),
        ("forEach", Ty::Null),
        ("slice", Ty::Array),
        ("splice", Ty::Array),
        ("indexOf", Ty::Number),
        ("lastIndexOf", Ty::Number),
        ("includes", Ty::Bool),
        ("join", Ty::Str),
        ("concat", Ty::Array),
        ("find", Ty::Unknown),
        ("findIndex", Ty::Number),
        ("some", Ty::Bool),
        ("every", Ty::Bool),
        ("reverse", Ty::Array),
        ("sort", Ty::Array),
        ("flat", Ty::Array),
        ("flatMap", Ty::Array),
        ("toString", Ty::Str),
    ];
    let number_methods: &[(&str, Ty)] = &[
        ("toFixed", Ty::Str),
        ("toPrecision", Ty::Str),
        ("toExponential", Ty::Str),
        ("toString", Ty::Str),
    ];
    let mut table = HashMap::new();
    table.insert(Ty::Str, string_methods.iter().copied().collect());
    table.insert(Ty::Array, array_methods.iter().copied().collect());
    table.insert(Ty::Number, number_methods.iter().copied().collect());
    table
});

/// Signature of a user function collected during validation.
#[derive(Debug, Clone)]
struct FnSig {
    params: Vec<(String, Option<Ty>)>,
    rest: bool,
    return_type: Option<Ty>,
}

impl FnSig {
    fn has_typed_params(&self) -> bool {
        self.params.iter().any(|(_, ty)| ty.is_some())
    }

    fn accepts(&self, argc: usize) -> bool {
        if self.rest {
            argc >= self.params.len()
        } else {
            argc == self.params.len()
        }
    }
}

/// Validates expanded forms. Fatal problems return the first error;
/// everything soft accumulates in the returned warning list.
pub fn validate(
    forms: &[Sexp],
    source: SourceContext,
    options: &ValidateOptions,
) -> Result<Validation, HqlError> {
    let mut v = Validator {
        report: ReportContext::new(source, "validate"),
        strict: options.strict,
        warnings: Vec::new(),
        functions: HashMap::new(),
        scopes: vec![HashMap::new()],
    };
    for form in forms {
        v.check_form(form)?;
    }
    Ok(Validation {
        warnings: v.warnings,
    })
}

struct Validator {
    report: ReportContext,
    strict: bool,
    warnings: Vec<HqlError>,
    functions: HashMap<String, FnSig>,
    scopes: Vec<HashMap<String, Ty>>,
}

impl Validator {
    // ========================================================================
    // SCOPES
    // ========================================================================

    fn declare(&mut self, name: &str, ty: Ty, at: &Sexp) -> Result<(), HqlError> {
        let scope = self.scopes.last_mut().expect("scope stack is never empty");
        if scope.contains_key(name) {
            return Err(self.report.report(
                ErrorKind::DuplicateDeclaration {
                    symbol: name.to_string(),
                },
                meta_span(at.meta.as_ref()),
            ));
        }
        scope.insert(name.to_string(), ty);
        Ok(())
    }

    fn resolve(&self, name: &str) -> Option<Ty> {
        self.scopes.iter().rev().find_map(|s| s.get(name)).copied()
    }

    fn in_scope<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, HqlError>,
    ) -> Result<T, HqlError> {
        self.scopes.push(HashMap::new());
        let result = f(self);
        self.scopes.pop();
        result
    }

    fn soft(&mut self, kind: ErrorKind, at: &Sexp) -> Result<(), HqlError> {
        let err = self.report.report(kind, meta_span(at.meta.as_ref()));
        if self.strict {
            return Err(err);
        }
        self.warnings.push(err.as_warning());
        Ok(())
    }

    // ========================================================================
    // WALK
    // ========================================================================

    fn check_form(&mut self, form: &Sexp) -> Result<(), HqlError> {
        let SexpKind::List(items) = &*form.kind else {
            return self.check_symbol_access(form);
        };
        if items.is_empty() {
            return Ok(());
        }

        match form.head_symbol() {
            Some("quote") | Some("quasiquote") | Some("macro") => Ok(()),
            Some("let") | Some("const") => self.check_declaration(form, items),
            Some("var") => self.check_declaration(form, items),
            Some("fn") => self.check_fn(form, items),
            Some("set!") => self.check_assignment(form, items),
            Some("=") if items.len() == 3 && items[1].as_symbol().is_some() => {
                self.check_assignment(form, items)
            }
            Some("do") => self.in_scope(|v| items[1..].iter().try_for_each(|i| v.check_form(i))),
            Some("for") => self.check_for(form, items),
            Some("while") => self.in_scope(|v| {
                items[1..].iter().try_for_each(|i| v.check_form(i))
            }),
            Some("try") => self.check_try(items),
            Some("class") => self.check_class(form, items),
            _ => {
                self.check_call(form, items)?;
                for item in &items[1..] {
                    self.check_form(item)?;
                }
                // Operands of unknown heads still get checked; the head
                // itself may be a dotted member access worth a look.
                if let Some(head) = items.first() {
                    self.check_symbol_access(head)?;
                }
                Ok(())
            }
        }
    }

    fn check_declaration(&mut self, form: &Sexp, items: &[Sexp]) -> Result<(), HqlError> {
        // Scoped shape `(let (name value) body...)`: the binding lives in
        // its own block scope.
        if let Some((name, init, body)) = scoped_binding(items) {
            self.check_form(init)?;
            let ty = self.infer(init);
            return self.in_scope(|v| {
                if let Some(n) = name.as_symbol() {
                    v.declare(n, ty, name)?;
                }
                body.iter().try_for_each(|i| v.check_form(i))
            });
        }
        let [_, target, init] = items else {
            // Malformed shapes are lowering's problem; arity of the form
            // itself is not a semantic question.
            return items[1..].iter().try_for_each(|i| self.check_form(i));
        };
        self.check_form(init)?;
        let ty = self.infer(init);
        match &*target.kind {
            SexpKind::Symbol(name) => self.declare(name, ty, target),
            SexpKind::List(_) => {
                // Destructuring target: every bound name declares.
                for name in pattern_names(target) {
                    self.declare(&name, Ty::Unknown, target)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn check_fn(&mut self, form: &Sexp, items: &[Sexp]) -> Result<(), HqlError> {
        let (name, params_node, rest_items) = match items {
            [_, n, p, rest @ ..] if n.as_symbol().is_some() => {
                (Some(n.as_symbol().unwrap()), p, rest)
            }
            [_, p, rest @ ..] => (None, p, rest),
            _ => return Ok(()),
        };

        let sig = parse_signature(params_node, rest_items);
        if let Some(name) = name {
            self.declare(name, Ty::Function, form)?;
            self.functions.insert(name.to_string(), sig.clone());
        }

        let body = skip_return_annotation(rest_items);
        self.in_scope(|v| {
            for (param, ty) in &sig.params {
                v.declare(param, ty.unwrap_or(Ty::Unknown), params_node)?;
            }
            body.iter().try_for_each(|i| v.check_form(i))
        })
    }

    fn check_assignment(&mut self, form: &Sexp, items: &[Sexp]) -> Result<(), HqlError> {
        let [_, target, value] = items else {
            return Ok(());
        };
        if let Some(name) = target.as_symbol() {
            // Dotted targets assign through a member; only the base needs
            // to resolve.
            let base = name.split('.').next().unwrap_or(name);
            if self.resolve(base).is_none() && self.functions.get(base).is_none() {
                return Err(self.report.report(
                    ErrorKind::UndefinedAssignTarget {
                        symbol: base.to_string(),
                    },
                    meta_span(target.meta.as_ref().or(form.meta.as_ref())),
                ));
            }
        }
        self.check_form(value)
    }

    fn check_for(&mut self, _form: &Sexp, items: &[Sexp]) -> Result<(), HqlError> {
        let Some(binding) = items.get(1) else {
            return Ok(());
        };
        // (for [i coll] body...)
        let binding_items = binding.as_list().unwrap_or(&[]);
        let binding_items = if binding.is_call_to(SYM_VECTOR) {
            &binding_items[1..]
        } else {
            binding_items
        };
        self.in_scope(|v| {
            if let [var, coll] = binding_items {
                v.check_form(coll)?;
                if let Some(name) = var.as_symbol() {
                    v.declare(name, Ty::Unknown, var)?;
                }
            }
            items[2..].iter().try_for_each(|i| v.check_form(i))
        })
    }

    fn check_try(&mut self, items: &[Sexp]) -> Result<(), HqlError> {
        for item in &items[1..] {
            match item.head_symbol() {
                Some("catch") => {
                    let parts = item.as_list().expect("head_symbol implies list");
                    self.in_scope(|v| {
                        if let Some(name) = parts.get(1).and_then(Sexp::as_symbol) {
                            v.declare(name, Ty::Unknown, item)?;
                        }
                        parts[2..].iter().try_for_each(|i| v.check_form(i))
                    })?;
                }
                Some("finally") => {
                    let parts = item.as_list().expect("head_symbol implies list");
                    self.in_scope(|v| parts[1..].iter().try_for_each(|i| v.check_form(i)))?;
                }
                _ => self.in_scope(|v| v.check_form(item))?,
            }
        }
        Ok(())
    }

    fn check_class(&mut self, form: &Sexp, items: &[Sexp]) -> Result<(), HqlError> {
        if let Some(name) = items.get(1).and_then(Sexp::as_symbol) {
            self.declare(name, Ty::Function, form)?;
        }
        self.in_scope(|v| items[2..].iter().try_for_each(|i| v.check_form(i)))
    }

    // ========================================================================
    // CALLS AND PROPERTY ACCESS
    // ========================================================================

    fn check_call(&mut self, form: &Sexp, items: &[Sexp]) -> Result<(), HqlError> {
        let Some(callee) = items.first().and_then(Sexp::as_symbol) else {
            return Ok(());
        };
        let Some(sig) = self.functions.get(callee).cloned() else {
            return Ok(());
        };
        let argc = items.len() - 1;
        if !sig.accepts(argc) {
            let expected = if sig.rest {
                format!("at least {}", sig.params.len())
            } else {
                sig.params.len().to_string()
            };
            let kind = ErrorKind::CallArityMismatch {
                callee: callee.to_string(),
                expected,
                actual: argc,
            };
            if sig.has_typed_params() {
                return Err(self
                    .report
                    .report(kind, meta_span(form.meta.as_ref())));
            }
            self.soft(kind, form)?;
        }
        for ((param, annotated), arg) in sig.params.iter().zip(&items[1..]) {
            let Some(expected) = annotated else { continue };
            let actual = self.infer(arg);
            if actual != Ty::Unknown && actual != *expected {
                self.soft(
                    ErrorKind::ArgumentTypeMismatch {
                        callee: callee.to_string(),
                        param: param.clone(),
                        expected: expected.name().to_string(),
                        actual: actual.name().to_string(),
                    },
                    arg,
                )?;
            }
        }
        Ok(())
    }

    /// Dotted symbols are property accesses; when the base has a known
    /// type, the property must appear in the built-in method table.
    /// Mismatches are soft: warnings unless `strict` escalates them.
    fn check_symbol_access(&mut self, node: &Sexp) -> Result<(), HqlError> {
        let Some(name) = node.as_symbol() else {
            return Ok(());
        };
        let Some((base, prop)) = name.split_once('.') else {
            return Ok(());
        };
        if prop.is_empty() || prop.contains('.') {
            return Ok(());
        }
        let Some(base_ty) = self.resolve(base) else {
            return Ok(());
        };
        let Some(methods) = METHOD_TABLE.get(&base_ty) else {
            return Ok(());
        };
        if !methods.contains_key(prop) {
            self.soft(
                ErrorKind::UnknownProperty {
                    property: prop.to_string(),
                    value_type: base_ty.name().to_string(),
                },
                node,
            )?;
        }
        Ok(())
    }

    // ========================================================================
    // LOCAL TYPE INFERENCE
    // ========================================================================

    fn infer(&self, expr: &Sexp) -> Ty {
        match &*expr.kind {
            SexpKind::Literal(Lit::Number(_)) => Ty::Number,
            SexpKind::Literal(Lit::Str(_)) => Ty::Str,
            SexpKind::Literal(Lit::Bool(_)) => Ty::Bool,
            SexpKind::Literal(Lit::Null) => Ty::Null,
            SexpKind::Symbol(name) => match name.split_once('.') {
                None => self.resolve(name).unwrap_or(Ty::Unknown),
                Some((base, prop)) => self
                    .resolve(base)
                    .and_then(|ty| METHOD_TABLE.get(&ty))
                    .and_then(|methods| methods.get(prop))
                    .copied()
                    .unwrap_or(Ty::Unknown),
            },
            SexpKind::List(items) => match items.first().and_then(Sexp::as_symbol) {
                Some(SYM_VECTOR) => Ty::Array,
                Some(SYM_HASH_MAP) => Ty::Object,
                Some(SYM_TEMPLATE) | Some("str") => Ty::Str,
                Some("fn") => Ty::Function,
                Some("+") => {
                    // String concatenation leaks through `+`.
                    if items[1..].iter().any(|a| self.infer(a) == Ty::Str) {
                        Ty::Str
                    } else {
                        Ty::Number
                    }
                }
                Some("-") | Some("*") | Some("/") | Some("%") => Ty::Number,
                Some("==") | Some("!=") | Some("<") | Some("<=") | Some(">") | Some(">=")
                | Some("not") | Some("eq?") => Ty::Bool,
                Some(callee) => self
                    .functions
                    .get(callee)
                    .and_then(|sig| sig.return_type)
                    .unwrap_or(Ty::Unknown),
                None => Ty::Unknown,
            },
        }
    }
}

// ============================================================================
// SIGNATURE HELPERS
// ============================================================================

fn parse_signature(params_node: &Sexp, rest_items: &[Sexp]) -> FnSig {
    let empty: &[Sexp] = &[];
    let raw = params_node.as_list().unwrap_or(empty);
    let raw = if params_node.is_call_to(SYM_VECTOR) {
        &raw[1..]
    } else {
        raw
    };

    let mut params = Vec::new();
    let mut rest = false;
    let mut saw_marker = false;
    for item in raw {
        let Some(name) = item.as_symbol() else { continue };
        if name == "&" {
            saw_marker = true;
            continue;
        }
        if saw_marker {
            rest = true;
            saw_marker = false;
            continue;
        }
        match name.split_once(':') {
            Some((bare, ann)) => params.push((bare.to_string(), Some(Ty::from_annotation(ann)))),
            None => params.push((name.to_string(), None)),
        }
    }

    let return_type = rest_items
        .first()
        .and_then(Sexp::as_symbol)
        .and_then(|s| s.strip_prefix(':'))
        .map(Ty::from_annotation);

    FnSig {
        params,
        rest,
        return_type,
    }
}

fn skip_return_annotation(items: &[Sexp]) -> &[Sexp] {
    match items.first().and_then(Sexp::as_symbol) {
        Some(s) if s.starts_with(':') => &items[1..],
        _ => items,
    }
}

/// Recognizes the scoped binding shape `(let (name value) body...)`.
fn scoped_binding(items: &[Sexp]) -> Option<(&Sexp, &Sexp, &[Sexp])> {
    if items.len() < 3 {
        return None;
    }
    let pair = items[1].as_list()?;
    let [name, init] = pair else {
        return None;
    };
    let head = name.as_symbol()?;
    if head == SYM_VECTOR || head == SYM_HASH_MAP {
        return None;
    }
    Some((name, init, &items[2..]))
}

/// Collects every name bound by a destructuring pattern, skipping `_`.
pub fn pattern_names(pattern: &Sexp) -> Vec<String> {
    let mut names = Vec::new();
    collect_pattern_names(pattern, &mut names);
    names
}

fn collect_pattern_names(pattern: &Sexp, out: &mut Vec<String>) {
    match &*pattern.kind {
        SexpKind::Symbol(name)
            if !matches!(name.as_str(), "_" | "&" | SYM_VECTOR | SYM_HASH_MAP) =>
        {
            out.push(name.clone());
        }
        SexpKind::List(items) => {
            for item in items {
                collect_pattern_names(item, out);
            }
        }
        _ => {}
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::read;

    fn run(source: &str) -> Result<Validation, HqlError> {
        let forms = read(source, "test.hql").expect("read");
        validate(
            &forms,
            SourceContext::from_file("test.hql", source),
            &ValidateOptions::default(),
        )
    }

    fn run_strict(source: &str) -> Result<Validation, HqlError> {
        let forms = read(source, "test.hql").expect("read");
        validate(
            &forms,
            SourceContext::from_file("test.hql", source),
            &ValidateOptions { strict: true },
        )
    }

    #[test]
    fn duplicate_declarations_in_one_scope_are_rejected() {
        let err = run("(let x 10) (let x 20)").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DuplicateDeclaration { .. }));
        assert!(err.to_string().contains("already been declared"));
    }

    #[test]
    fn shadowing_in_a_child_scope_is_allowed() {
        let out = run("(let x 10) (do (let x 20) x)").unwrap();
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn assignment_to_undeclared_binding_is_rejected() {
        let err = run("(set! missing 1)").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UndefinedAssignTarget { .. }));
    }

    #[test]
    fn assignment_to_declared_binding_passes() {
        assert!(run("(var x 1) (set! x 2)").is_ok());
        assert!(run("(var x 1) (= x 2)").is_ok());
    }

    #[test]
    fn typed_argument_mismatch_warns_and_names_both_types() {
        let out = run(
            "(fn add [a:number b:number] :number (+ a b)) (add \"hello\" \"world\")",
        )
        .unwrap();
        assert_eq!(out.warnings.len(), 2);
        let msg = out.warnings[0].to_string();
        assert!(msg.contains("number") && msg.contains("string"), "{}", msg);
    }

    #[test]
    fn typed_argument_mismatch_is_fatal_in_strict_mode() {
        let err = run_strict(
            "(fn add [a:number b:number] :number (+ a b)) (add \"hello\" \"world\")",
        )
        .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ArgumentTypeMismatch { .. }));
    }

    #[test]
    fn arity_mismatch_on_untyped_function_is_soft() {
        let out = run("(fn f [a b] (+ a b)) (f 1)").unwrap();
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn arity_mismatch_on_typed_function_is_fatal() {
        let err = run("(fn f [a:number] a) (f 1 2)").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::CallArityMismatch { .. }));
    }

    #[test]
    fn unknown_property_on_typed_binding_warns() {
        let out = run("(let s \"hi\") (s.nonsense)").unwrap();
        assert_eq!(out.warnings.len(), 1);
        assert!(matches!(
            out.warnings[0].kind,
            ErrorKind::UnknownProperty { .. }
        ));
    }

    #[test]
    fn unknown_property_is_fatal_in_strict_mode() {
        let err = run_strict("(let s \"hi\") (s.nonsense)").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnknownProperty { .. }));
    }

    #[test]
    fn known_property_on_typed_binding_is_clean() {
        let out = run("(let s \"hi\") (s.toUpperCase)").unwrap();
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn function_params_live_in_their_own_scope() {
        let out = run("(let x 1) (fn f [x] x) (f 2)").unwrap();
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn for_binding_scopes_to_the_loop() {
        let out = run("(for [i [1 2 3]] i) (for [i [4 5]] i)").unwrap();
        assert!(out.warnings.is_empty());
    }
}
