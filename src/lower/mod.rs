//! AST -> IR lowering.
//!
//! A pure transformation from validated S-expressions to the IR tree.
//! Position matters: the same surface form can lower differently in
//! statement and expression position (`if` becomes an IfStatement or a
//! ConditionalExpression, `do` a block or an IIFE), so the dispatch is
//! split into `lower_statement` and `lower_expr`.

mod forms;

use crate::errors::{meta_span, ErrorReporting, HqlError, ReportContext, SourceContext};
use crate::ir::{IrKind, IrNode};
use crate::syntax::{Lit, Sexp, SexpKind, SYM_HASH_MAP, SYM_SPREAD, SYM_TEMPLATE, SYM_VECTOR};

/// Lowers a whole program to an `IrKind::Program`.
pub fn lower_program(forms: &[Sexp], source: SourceContext) -> Result<IrNode, HqlError> {
    let lowerer = Lowerer {
        report: ReportContext::new(source, "lower"),
    };
    let body = forms
        .iter()
        .map(|form| lowerer.lower_statement(form))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(IrNode::new(IrKind::Program { body }, None))
}

pub(crate) struct Lowerer {
    pub(crate) report: ReportContext,
}

impl Lowerer {
    // ========================================================================
    // STATEMENT POSITION
    // ========================================================================

    pub(crate) fn lower_statement(&self, form: &Sexp) -> Result<IrNode, HqlError> {
        match form.head_symbol() {
            Some("fn") if is_named_fn(form) => self.lower_fn_declaration(form),
            Some("let") | Some("var") | Some("const") => self.lower_declaration(form),
            Some("if") => self.lower_if_statement(form),
            Some("cond") => self.lower_cond_statement(form),
            Some("do") => self.lower_do_block(form),
            Some("for") => self.lower_for(form),
            Some("while") => self.lower_while(form),
            Some("throw") => self.lower_throw(form),
            Some("break") => Ok(IrNode::new(
                IrKind::BreakStatement {
                    label: loop_label(form),
                },
                form.meta.clone(),
            )),
            Some("continue") => Ok(IrNode::new(
                IrKind::ContinueStatement {
                    label: loop_label(form),
                },
                form.meta.clone(),
            )),
            Some("try") => self.lower_try(form),
            Some("class") => self.lower_class(form),
            Some("import") => self.lower_import(form),
            Some("export") => self.lower_export(form),
            _ => self.lower_expr(form),
        }
    }

    /// Lowers a body of forms where the last value is the result:
    /// function bodies, IIFE bodies, match arms.
    pub(crate) fn lower_body_with_return(&self, forms: &[Sexp]) -> Result<IrNode, HqlError> {
        let mut body = Vec::with_capacity(forms.len());
        if let Some((last, init)) = forms.split_last() {
            for form in init {
                body.push(self.lower_statement(form)?);
            }
            if is_statement_only(last) {
                body.push(self.lower_statement(last)?);
                body.push(IrNode::new(
                    IrKind::ReturnStatement { argument: None },
                    last.meta.clone(),
                ));
            } else {
                let value = self.lower_expr(last)?;
                body.push(IrNode::new(
                    IrKind::ReturnStatement {
                        argument: Some(Box::new(value)),
                    },
                    last.meta.clone(),
                ));
            }
        }
        Ok(IrNode::new(IrKind::BlockStatement { body }, None))
    }

    // ========================================================================
    // EXPRESSION POSITION
    // ========================================================================

    pub(crate) fn lower_expr(&self, form: &Sexp) -> Result<IrNode, HqlError> {
        match &*form.kind {
            SexpKind::Literal(lit) => Ok(IrNode::new(
                IrKind::Literal { value: lit.clone() },
                form.meta.clone(),
            )),
            SexpKind::Symbol(name) => Ok(self.lower_symbol(name, form)),
            SexpKind::List(items) => self.lower_list_expr(form, items),
        }
    }

    /// Dotted symbols become member chains: `a.b.c` reads as
    /// `(a).b.c`. Bare symbols become identifiers (sanitized at emission).
    fn lower_symbol(&self, name: &str, form: &Sexp) -> IrNode {
        let mut segments = name.split('.').filter(|s| !s.is_empty());
        let Some(first) = segments.next() else {
            return IrNode::new(
                IrKind::Identifier { name: name.into() },
                form.meta.clone(),
            );
        };
        let mut node = IrNode::new(
            IrKind::Identifier { name: first.into() },
            form.meta.clone(),
        );
        for segment in segments {
            node = IrNode::new(
                IrKind::MemberExpression {
                    object: Box::new(node),
                    property: Box::new(IrNode::new(
                        IrKind::Identifier {
                            name: segment.into(),
                        },
                        form.meta.clone(),
                    )),
                    computed: false,
                },
                form.meta.clone(),
            );
        }
        node
    }

    fn lower_list_expr(&self, form: &Sexp, items: &[Sexp]) -> Result<IrNode, HqlError> {
        let Some(head) = form.head_symbol() else {
            // Computed callee: ((f x) y)
            return match items.split_first() {
                None => Ok(IrNode::new(
                    IrKind::ArrayExpression { elements: vec![] },
                    form.meta.clone(),
                )),
                Some((callee, args)) => {
                    let callee = self.lower_expr(callee)?;
                    let args = self.lower_call_args(args)?;
                    Ok(IrNode::new(
                        IrKind::CallExpression {
                            callee: Box::new(callee),
                            args,
                        },
                        form.meta.clone(),
                    ))
                }
            };
        };

        match head {
            "quote" => self.lower_quote(form, items),
            "if" => self.lower_if_expr(form, items),
            "cond" => self.lower_cond_expr(form, items),
            "do" => self.lower_do_expr(form),
            "fn" => self.lower_fn_expr(form),
            SYM_VECTOR => {
                let elements = self.lower_call_args(&items[1..])?;
                Ok(IrNode::new(
                    IrKind::ArrayExpression { elements },
                    form.meta.clone(),
                ))
            }
            SYM_HASH_MAP => self.lower_hash_map(form, items),
            SYM_TEMPLATE => self.lower_template(form, items),
            SYM_SPREAD => {
                let [_, arg] = items else {
                    return Err(self.malformed(form, "...", "expected one expression"));
                };
                Ok(IrNode::new(
                    IrKind::SpreadElement {
                        argument: Box::new(self.lower_expr(arg)?),
                    },
                    form.meta.clone(),
                ))
            }
            "let" | "var" | "const" => {
                // A declaration in expression position evaluates inside an
                // IIFE; a simple binding yields the bound value.
                let mut body = vec![form.clone()];
                if let [_, target, _init] = items {
                    if let Some(name) = target.as_symbol() {
                        body.push(Sexp::symbol(name, form.meta.clone()));
                    }
                }
                self.iife(form, &body)
            }
            "set!" => self.lower_assignment(form, items),
            "=" if items.len() == 3 && is_assign_target(&items[1]) => {
                self.lower_assignment(form, items)
            }
            "get" => self.lower_get(form, items),
            "range" => {
                let args = self.lower_call_args(&items[1..])?;
                Ok(IrNode::new(
                    IrKind::CallExpression {
                        callee: Box::new(helper_ref("__hql_range", form)),
                        args,
                    },
                    form.meta.clone(),
                ))
            }
            "await" => self.lower_wrapper(form, items, "await"),
            "yield" => self.lower_wrapper(form, items, "yield"),
            "new" => {
                let [_, callee, args @ ..] = items else {
                    return Err(self.malformed(form, "new", "expected a constructor"));
                };
                Ok(IrNode::new(
                    IrKind::NewExpression {
                        callee: Box::new(self.lower_expr(callee)?),
                        args: self.lower_call_args(args)?,
                    },
                    form.meta.clone(),
                ))
            }
            "match" => self.lower_match(form, items),
            "and" | "or" => {
                let op = if head == "and" { "&&" } else { "||" };
                self.lower_operator_chain(form, &items[1..], op)
            }
            "not" => {
                let [_, arg] = items else {
                    return Err(self.malformed(form, "not", "expected one expression"));
                };
                Ok(IrNode::new(
                    IrKind::UnaryExpression {
                        op: "!".into(),
                        operand: Box::new(self.lower_expr(arg)?),
                    },
                    form.meta.clone(),
                ))
            }
            "+" | "-" | "*" | "/" | "%" => self.lower_arithmetic(form, items, head),
            "==" | "eq?" => self.lower_operator_chain(form, &items[1..], "==="),
            "!=" => self.lower_operator_chain(form, &items[1..], "!=="),
            "=" => self.lower_operator_chain(form, &items[1..], "==="),
            "<" | "<=" | ">" | ">=" => self.lower_operator_chain(form, &items[1..], head),
            // A `for` can appear in expression position; the optimizer
            // wraps it into an IIFE afterwards.
            "for" => self.lower_for(form),
            "while" => self.lower_while(form),
            "throw" => self.lower_throw(form),
            _ => {
                let callee = self.lower_expr(&items[0])?;
                let args = self.lower_call_args(&items[1..])?;
                Ok(IrNode::new(
                    IrKind::CallExpression {
                        callee: Box::new(callee),
                        args,
                    },
                    form.meta.clone(),
                ))
            }
        }
    }

    pub(crate) fn lower_call_args(&self, args: &[Sexp]) -> Result<Vec<IrNode>, HqlError> {
        args.iter().map(|arg| self.lower_expr(arg)).collect()
    }

    // ========================================================================
    // SMALL EXPRESSION FORMS
    // ========================================================================

    /// Quoted data becomes literal JS data: symbols are strings, lists
    /// are arrays.
    fn lower_quote(&self, form: &Sexp, items: &[Sexp]) -> Result<IrNode, HqlError> {
        let [_, arg] = items else {
            return Err(self.malformed(form, "quote", "expected one form"));
        };
        Ok(self.quote_to_ir(arg))
    }

    fn quote_to_ir(&self, node: &Sexp) -> IrNode {
        let kind = match &*node.kind {
            SexpKind::Symbol(name) => IrKind::Literal {
                value: Lit::Str(name.clone()),
            },
            SexpKind::Literal(lit) => IrKind::Literal { value: lit.clone() },
            SexpKind::List(items) => IrKind::ArrayExpression {
                elements: items.iter().map(|i| self.quote_to_ir(i)).collect(),
            },
        };
        IrNode::new(kind, node.meta.clone())
    }

    fn lower_wrapper(&self, form: &Sexp, items: &[Sexp], op: &str) -> Result<IrNode, HqlError> {
        let [_, arg] = items else {
            return Err(self.malformed(form, op, "expected one expression"));
        };
        let argument = Box::new(self.lower_expr(arg)?);
        let kind = match op {
            "await" => IrKind::AwaitExpression { argument },
            _ => IrKind::YieldExpression { argument },
        };
        Ok(IrNode::new(kind, form.meta.clone()))
    }

    fn lower_assignment(&self, form: &Sexp, items: &[Sexp]) -> Result<IrNode, HqlError> {
        let [_, target, value] = items else {
            return Err(self.malformed(form, "set!", "expected a target and a value"));
        };
        Ok(IrNode::new(
            IrKind::AssignmentExpression {
                target: Box::new(self.lower_expr(target)?),
                value: Box::new(self.lower_expr(value)?),
            },
            form.meta.clone(),
        ))
    }

    fn lower_get(&self, form: &Sexp, items: &[Sexp]) -> Result<IrNode, HqlError> {
        let args = match items {
            [_, obj, key] => vec![self.lower_expr(obj)?, self.lower_expr(key)?],
            [_, obj, key, dflt] => vec![
                self.lower_expr(obj)?,
                self.lower_expr(key)?,
                self.lower_expr(dflt)?,
            ],
            _ => return Err(self.malformed(form, "get", "expected (get obj key) or (get obj key default)")),
        };
        Ok(IrNode::new(
            IrKind::CallExpression {
                callee: Box::new(helper_ref("__hql_get", form)),
                args,
            },
            form.meta.clone(),
        ))
    }

    /// Map literals build null-prototype objects through the runtime
    /// helper. A spread entry flattens the source object into the flat
    /// key/value argument list.
    fn lower_hash_map(&self, form: &Sexp, items: &[Sexp]) -> Result<IrNode, HqlError> {
        let mut args = Vec::with_capacity(items.len() - 1);
        for entry in &items[1..] {
            if entry.is_call_to(SYM_SPREAD) {
                let spread_arg = &entry.as_list().expect("spread form")[1];
                args.push(IrNode::new(
                    IrKind::SpreadElement {
                        argument: Box::new(entries_flat(self.lower_expr(spread_arg)?, entry)),
                    },
                    entry.meta.clone(),
                ));
                continue;
            }
            args.push(self.lower_expr(entry)?);
        }
        Ok(IrNode::new(
            IrKind::CallExpression {
                callee: Box::new(helper_ref(SYM_HASH_MAP, form)),
                args,
            },
            form.meta.clone(),
        ))
    }

    /// Template strings become a `str` call over the parts.
    fn lower_template(&self, form: &Sexp, items: &[Sexp]) -> Result<IrNode, HqlError> {
        let args = self.lower_call_args(&items[1..])?;
        Ok(IrNode::new(
            IrKind::CallExpression {
                callee: Box::new(IrNode::new(
                    IrKind::Identifier { name: "str".into() },
                    form.meta.clone(),
                )),
                args,
            },
            form.meta.clone(),
        ))
    }

    // ========================================================================
    // OPERATORS
    // ========================================================================

    fn lower_arithmetic(&self, form: &Sexp, items: &[Sexp], op: &str) -> Result<IrNode, HqlError> {
        let args = &items[1..];
        match args {
            [] => Err(self.malformed(form, op, "expected at least one operand")),
            [only] => {
                if op == "-" {
                    Ok(IrNode::new(
                        IrKind::UnaryExpression {
                            op: "-".into(),
                            operand: Box::new(self.lower_expr(only)?),
                        },
                        form.meta.clone(),
                    ))
                } else {
                    self.lower_expr(only)
                }
            }
            _ => self.fold_binary(form, args, op),
        }
    }

    /// Comparison chains `(< a b c)` become `a < b && b < c`; other
    /// operators fold left.
    fn lower_operator_chain(
        &self,
        form: &Sexp,
        args: &[Sexp],
        op: &str,
    ) -> Result<IrNode, HqlError> {
        match op {
            "&&" | "||" => self.fold_binary(form, args, op),
            _ if args.len() <= 2 => self.fold_binary(form, args, op),
            _ => {
                let mut clauses = Vec::new();
                for pair in args.windows(2) {
                    clauses.push(IrNode::new(
                        IrKind::BinaryExpression {
                            op: op.into(),
                            left: Box::new(self.lower_expr(&pair[0])?),
                            right: Box::new(self.lower_expr(&pair[1])?),
                        },
                        form.meta.clone(),
                    ));
                }
                let mut iter = clauses.into_iter();
                let first = iter.next().expect("windows(2) yields at least one");
                Ok(iter.fold(first, |acc, clause| {
                    IrNode::new(
                        IrKind::BinaryExpression {
                            op: "&&".into(),
                            left: Box::new(acc),
                            right: Box::new(clause),
                        },
                        form.meta.clone(),
                    )
                }))
            }
        }
    }

    fn fold_binary(&self, form: &Sexp, args: &[Sexp], op: &str) -> Result<IrNode, HqlError> {
        let mut iter = args.iter();
        let Some(first) = iter.next() else {
            return Err(self.malformed(form, op, "expected at least one operand"));
        };
        let mut node = self.lower_expr(first)?;
        for arg in iter {
            node = IrNode::new(
                IrKind::BinaryExpression {
                    op: op.into(),
                    left: Box::new(node),
                    right: Box::new(self.lower_expr(arg)?),
                },
                form.meta.clone(),
            );
        }
        Ok(node)
    }

    // ========================================================================
    // ERRORS
    // ========================================================================

    pub(crate) fn malformed(&self, form: &Sexp, name: &str, reason: &str) -> HqlError {
        self.report
            .malformed_form(name, reason, meta_span(form.meta.as_ref()))
    }
}

// ============================================================================
// SHARED SHAPE HELPERS
// ============================================================================

pub(crate) fn is_named_fn(form: &Sexp) -> bool {
    form.as_list()
        .and_then(|items| items.get(1))
        .and_then(Sexp::as_symbol)
        .is_some()
}

fn is_assign_target(node: &Sexp) -> bool {
    node.as_symbol().is_some()
}

fn is_statement_only(form: &Sexp) -> bool {
    matches!(
        form.head_symbol(),
        Some("let") | Some("var") | Some("const") | Some("while") | Some("throw")
            | Some("break") | Some("continue") | Some("import") | Some("export")
            | Some("class")
    ) || (form.is_call_to("fn") && is_named_fn(form))
}

fn loop_label(form: &Sexp) -> Option<String> {
    form.as_list()
        .and_then(|items| items.get(1))
        .and_then(Sexp::as_symbol)
        .map(String::from)
}

pub(crate) fn helper_ref(name: &str, form: &Sexp) -> IrNode {
    IrNode::new(
        IrKind::Identifier { name: name.into() },
        form.meta.clone(),
    )
}

/// `Object.entries(x).flat()` - flattens an object into the alternating
/// key/value list the hash-map helper expects.
fn entries_flat(object: IrNode, at: &Sexp) -> IrNode {
    let entries = IrNode::new(
        IrKind::CallExpression {
            callee: Box::new(IrNode::new(
                IrKind::MemberExpression {
                    object: Box::new(IrNode::new(
                        IrKind::Identifier {
                            name: "Object".into(),
                        },
                        at.meta.clone(),
                    )),
                    property: Box::new(IrNode::new(
                        IrKind::Identifier {
                            name: "entries".into(),
                        },
                        at.meta.clone(),
                    )),
                    computed: false,
                },
                at.meta.clone(),
            )),
            args: vec![object],
        },
        at.meta.clone(),
    );
    IrNode::new(
        IrKind::CallExpression {
            callee: Box::new(IrNode::new(
                IrKind::MemberExpression {
                    object: Box::new(entries),
                    property: Box::new(IrNode::new(
                        IrKind::Identifier {
                            name: "flat".into(),
                        },
                        at.meta.clone(),
                    )),
                    computed: false,
                },
                at.meta.clone(),
            )),
            args: vec![],
        },
        at.meta.clone(),
    )
}
