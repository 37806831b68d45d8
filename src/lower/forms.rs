//! Statement-level special forms and patterns.

use crate::errors::HqlError;
use crate::ir::{DeclKind, ImportSpecifier, IrKind, IrNode};
use crate::lower::{helper_ref, Lowerer};
use crate::macros::next_gensym;
use crate::syntax::{Sexp, SexpKind, SYM_HASH_MAP, SYM_SPREAD, SYM_VECTOR};

impl Lowerer {
    // ========================================================================
    // DECLARATIONS
    // ========================================================================

    /// `(let x v)` declares a const, `(var x v)` a let, `(const x v)` a
    /// const whose initializer is deep-frozen. The target may be a
    /// destructuring pattern. The scoped shape `(let (name value)
    /// body...)` lowers to a block holding the binding and the body.
    pub(crate) fn lower_declaration(&self, form: &Sexp) -> Result<IrNode, HqlError> {
        let items = form.as_list().expect("declaration is a list");
        let head = form.head_symbol().expect("declaration has a head");
        if let Some(binding) = scoped_binding(items) {
            return self.lower_scoped_let(form, binding, &items[2..]);
        }
        let [_, target, init] = items else {
            return Err(self.malformed(form, head, "expected a target and an initializer"));
        };

        let decl = match head {
            "var" => DeclKind::Let,
            _ => DeclKind::Const,
        };
        let mut init_ir = self.lower_expr(init)?;
        if head == "const" {
            init_ir = IrNode::new(
                IrKind::CallExpression {
                    callee: Box::new(helper_ref("__hql_deepFreeze", form)),
                    args: vec![init_ir],
                },
                form.meta.clone(),
            );
        }

        let target_ir = self.lower_binding_target(target)?;
        Ok(IrNode::new(
            IrKind::VariableDeclaration {
                decl,
                target: Box::new(target_ir),
                init: Box::new(init_ir),
            },
            form.meta.clone(),
        ))
    }

    fn lower_scoped_let(
        &self,
        form: &Sexp,
        (name, init): (&Sexp, &Sexp),
        body: &[Sexp],
    ) -> Result<IrNode, HqlError> {
        let mut stmts = vec![IrNode::new(
            IrKind::VariableDeclaration {
                decl: DeclKind::Let,
                target: Box::new(self.lower_binding_target(name)?),
                init: Box::new(self.lower_expr(init)?),
            },
            form.meta.clone(),
        )];
        for stmt in body {
            stmts.push(self.lower_statement(stmt)?);
        }
        Ok(IrNode::new(
            IrKind::BlockStatement { body: stmts },
            form.meta.clone(),
        ))
    }

    fn lower_binding_target(&self, target: &Sexp) -> Result<IrNode, HqlError> {
        match &*target.kind {
            SexpKind::Symbol(name) => Ok(IrNode::new(
                IrKind::Identifier { name: name.clone() },
                target.meta.clone(),
            )),
            SexpKind::List(_) => self.lower_pattern(target),
            _ => Err(self.malformed(target, "binding", "target must be a name or a pattern")),
        }
    }

    // ========================================================================
    // PATTERNS
    // ========================================================================

    /// Destructuring: `[a _ c & rest]` and `{a b & rest}` with `_` skips.
    pub(crate) fn lower_pattern(&self, pattern: &Sexp) -> Result<IrNode, HqlError> {
        if pattern.is_call_to(SYM_VECTOR) {
            let items = &pattern.as_list().expect("vector form")[1..];
            let mut elements = Vec::new();
            let mut rest = None;
            let mut iter = items.iter().peekable();
            while let Some(item) = iter.next() {
                if item.as_symbol() == Some("&") {
                    let Some(rest_node) = iter.next() else {
                        return Err(self.malformed(pattern, "pattern", "'&' needs a name"));
                    };
                    rest = Some(Box::new(self.lower_binding_target(rest_node)?));
                    break;
                }
                if item.as_symbol() == Some("_") {
                    elements.push(None);
                    continue;
                }
                elements.push(Some(self.lower_binding_target(item)?));
            }
            return Ok(IrNode::new(
                IrKind::ArrayPattern { elements, rest },
                pattern.meta.clone(),
            ));
        }
        if pattern.is_call_to(SYM_HASH_MAP) {
            let items = &pattern.as_list().expect("map form")[1..];
            let mut properties = Vec::new();
            let mut rest = None;
            let mut iter = items.iter().peekable();
            while let Some(item) = iter.next() {
                if item.as_symbol() == Some("&") {
                    let Some(rest_node) = iter.next() else {
                        return Err(self.malformed(pattern, "pattern", "'&' needs a name"));
                    };
                    rest = Some(Box::new(self.lower_binding_target(rest_node)?));
                    break;
                }
                let Some(name) = item.as_symbol().or_else(|| item.as_str()) else {
                    return Err(self.malformed(item, "pattern", "object keys must be names"));
                };
                properties.push((name.to_string(), None));
            }
            return Ok(IrNode::new(
                IrKind::ObjectPattern { properties, rest },
                pattern.meta.clone(),
            ));
        }
        Err(self.malformed(pattern, "pattern", "expected a vector or map pattern"))
    }

    // ========================================================================
    // FUNCTIONS
    // ========================================================================

    pub(crate) fn lower_fn_declaration(&self, form: &Sexp) -> Result<IrNode, HqlError> {
        let items = form.as_list().expect("fn form is a list");
        let [_, name_node, params_node, rest @ ..] = items else {
            return Err(self.malformed(form, "fn", "expected a name, parameters, and a body"));
        };
        let name = name_node.as_symbol().expect("caller checked is_named_fn");
        let (params, param_types, rest_param) = self.lower_params(params_node)?;
        let (return_type, body_forms) = split_return_annotation(rest);
        let body = self.lower_body_with_return(body_forms)?;
        let is_async = contains_await(body_forms);
        Ok(IrNode::new(
            IrKind::FnFunctionDeclaration {
                id: name.to_string(),
                params: with_rest(params, rest_param),
                param_types,
                return_type,
                body: Box::new(body),
                is_async,
            },
            form.meta.clone(),
        ))
    }

    pub(crate) fn lower_fn_expr(&self, form: &Sexp) -> Result<IrNode, HqlError> {
        let items = form.as_list().expect("fn form is a list");
        // A named fn in expression position still declares via statement
        // lowering wrapped in an IIFE-free context; treat as anonymous
        // using the same body.
        let (params_node, rest) = match items {
            [_, n, p, rest @ ..] if n.as_symbol().is_some() => (p, rest),
            [_, p, rest @ ..] => (p, rest),
            _ => return Err(self.malformed(form, "fn", "expected parameters and a body")),
        };
        let (params, _types, rest_param) = self.lower_params(params_node)?;
        let (_ret, body_forms) = split_return_annotation(rest);
        let body = self.lower_body_with_return(body_forms)?;
        let is_async = contains_await(body_forms);
        Ok(IrNode::new(
            IrKind::FunctionExpression {
                params: with_rest(params, rest_param),
                body: Box::new(body),
                is_async,
                is_arrow: false,
            },
            form.meta.clone(),
        ))
    }

    /// Parameters: plain names (annotations stripped into the type list),
    /// destructuring patterns, and `& rest`.
    fn lower_params(
        &self,
        params_node: &Sexp,
    ) -> Result<(Vec<IrNode>, Vec<Option<String>>, Option<IrNode>), HqlError> {
        let empty: &[Sexp] = &[];
        let raw = params_node.as_list().unwrap_or(empty);
        let raw = if params_node.is_call_to(SYM_VECTOR) {
            &raw[1..]
        } else {
            raw
        };
        let mut params = Vec::new();
        let mut types = Vec::new();
        let mut rest = None;
        let mut iter = raw.iter().peekable();
        while let Some(item) = iter.next() {
            if item.as_symbol() == Some("&") {
                if let Some(rest_node) = iter.next() {
                    let name = rest_node.as_symbol().unwrap_or("rest");
                    rest = Some(IrNode::new(
                        IrKind::SpreadElement {
                            argument: Box::new(IrNode::new(
                                IrKind::Identifier { name: name.into() },
                                rest_node.meta.clone(),
                            )),
                        },
                        rest_node.meta.clone(),
                    ));
                }
                break;
            }
            match &*item.kind {
                SexpKind::Symbol(name) => {
                    let (bare, annotation) = match name.split_once(':') {
                        Some((b, a)) => (b.to_string(), Some(a.to_string())),
                        None => (name.clone(), None),
                    };
                    params.push(IrNode::new(
                        IrKind::Identifier { name: bare },
                        item.meta.clone(),
                    ));
                    types.push(annotation);
                }
                SexpKind::List(_) => {
                    params.push(self.lower_pattern(item)?);
                    types.push(None);
                }
                _ => return Err(self.malformed(item, "fn", "invalid parameter")),
            }
        }
        Ok((params, types, rest))
    }

    // ========================================================================
    // CONTROL FLOW
    // ========================================================================

    pub(crate) fn lower_if_statement(&self, form: &Sexp) -> Result<IrNode, HqlError> {
        let items = form.as_list().expect("if form is a list");
        let (test, consequent, alternate) = match items {
            [_, t, c] => (t, c, None),
            [_, t, c, a] => (t, c, Some(a)),
            _ => return Err(self.malformed(form, "if", "expected a test and 1 or 2 branches")),
        };
        Ok(IrNode::new(
            IrKind::IfStatement {
                test: Box::new(self.lower_expr(test)?),
                consequent: Box::new(self.lower_branch(consequent)?),
                alternate: alternate
                    .map(|a| self.lower_branch(a).map(Box::new))
                    .transpose()?,
            },
            form.meta.clone(),
        ))
    }

    fn lower_branch(&self, branch: &Sexp) -> Result<IrNode, HqlError> {
        let stmt = self.lower_statement(branch)?;
        if matches!(stmt.kind, IrKind::BlockStatement { .. }) {
            return Ok(stmt);
        }
        let pos = stmt.pos.clone();
        Ok(IrNode::new(IrKind::BlockStatement { body: vec![stmt] }, pos))
    }

    pub(crate) fn lower_if_expr(&self, form: &Sexp, items: &[Sexp]) -> Result<IrNode, HqlError> {
        let (test, consequent, alternate) = match items {
            [_, t, c] => (t, c, None),
            [_, t, c, a] => (t, c, Some(a)),
            _ => return Err(self.malformed(form, "if", "expected a test and 1 or 2 branches")),
        };
        let alternate_ir = match alternate {
            Some(a) => self.lower_expr(a)?,
            None => IrNode::new(
                IrKind::Literal {
                    value: crate::syntax::Lit::Null,
                },
                form.meta.clone(),
            ),
        };
        Ok(IrNode::new(
            IrKind::ConditionalExpression {
                test: Box::new(self.lower_expr(test)?),
                consequent: Box::new(self.lower_expr(consequent)?),
                alternate: Box::new(alternate_ir),
            },
            form.meta.clone(),
        ))
    }

    pub(crate) fn lower_cond_statement(&self, form: &Sexp) -> Result<IrNode, HqlError> {
        let items = form.as_list().expect("cond form is a list");
        self.build_cond(form, &items[1..], true)
    }

    pub(crate) fn lower_cond_expr(&self, form: &Sexp, items: &[Sexp]) -> Result<IrNode, HqlError> {
        self.build_cond(form, &items[1..], false)
    }

    fn build_cond(
        &self,
        form: &Sexp,
        clauses: &[Sexp],
        statement: bool,
    ) -> Result<IrNode, HqlError> {
        let Some((clause, rest)) = clauses.split_first() else {
            return Ok(IrNode::new(
                IrKind::Literal {
                    value: crate::syntax::Lit::Null,
                },
                form.meta.clone(),
            ));
        };
        let Some([test, body @ ..]) = clause.as_list() else {
            return Err(self.malformed(clause, "cond", "clauses are (test expr...)"));
        };
        let is_else = test.as_symbol() == Some("else");
        if is_else {
            return if statement {
                let stmts = body
                    .iter()
                    .map(|b| self.lower_statement(b))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(IrNode::new(
                    IrKind::BlockStatement { body: stmts },
                    clause.meta.clone(),
                ))
            } else {
                self.lower_clause_value(clause, body)
            };
        }
        let test_ir = self.lower_expr(test)?;
        if statement {
            let stmts = body
                .iter()
                .map(|b| self.lower_statement(b))
                .collect::<Result<Vec<_>, _>>()?;
            let alternate = if rest.is_empty() {
                None
            } else {
                Some(Box::new(self.build_cond(form, rest, true)?))
            };
            Ok(IrNode::new(
                IrKind::IfStatement {
                    test: Box::new(test_ir),
                    consequent: Box::new(IrNode::new(
                        IrKind::BlockStatement { body: stmts },
                        clause.meta.clone(),
                    )),
                    alternate,
                },
                form.meta.clone(),
            ))
        } else {
            Ok(IrNode::new(
                IrKind::ConditionalExpression {
                    test: Box::new(test_ir),
                    consequent: Box::new(self.lower_clause_value(clause, body)?),
                    alternate: Box::new(self.build_cond(form, rest, false)?),
                },
                form.meta.clone(),
            ))
        }
    }

    fn lower_clause_value(&self, clause: &Sexp, body: &[Sexp]) -> Result<IrNode, HqlError> {
        match body {
            [single] => self.lower_expr(single),
            _ => self.iife(clause, body),
        }
    }

    /// `(do ...)` in statement position is a plain block.
    pub(crate) fn lower_do_block(&self, form: &Sexp) -> Result<IrNode, HqlError> {
        let items = form.as_list().expect("do form is a list");
        let body = items[1..]
            .iter()
            .map(|f| self.lower_statement(f))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(IrNode::new(
            IrKind::BlockStatement { body },
            form.meta.clone(),
        ))
    }

    /// `(do ...)` in expression position is an immediately-invoked arrow.
    pub(crate) fn lower_do_expr(&self, form: &Sexp) -> Result<IrNode, HqlError> {
        let items = form.as_list().expect("do form is a list");
        self.iife(form, &items[1..])
    }

    pub(crate) fn iife(&self, at: &Sexp, body: &[Sexp]) -> Result<IrNode, HqlError> {
        let block = self.lower_body_with_return(body)?;
        Ok(IrNode::new(
            IrKind::CallExpression {
                callee: Box::new(IrNode::new(
                    IrKind::FunctionExpression {
                        params: vec![],
                        body: Box::new(block),
                        is_async: contains_await(body),
                        is_arrow: true,
                    },
                    at.meta.clone(),
                )),
                args: vec![],
            },
            at.meta.clone(),
        ))
    }

    // ========================================================================
    // LOOPS
    // ========================================================================

    /// `(for [i coll] body...)`. A direct `(range ...)` iterable lowers to
    /// a native counting loop; other iterables coerce through
    /// `__hql_toSequence`, skipped for array literals.
    pub(crate) fn lower_for(&self, form: &Sexp) -> Result<IrNode, HqlError> {
        let items = form.as_list().expect("for form is a list");
        let Some(binding) = items.get(1) else {
            return Err(self.malformed(form, "for", "expected [var iterable]"));
        };
        let empty: &[Sexp] = &[];
        let binding_items = binding.as_list().unwrap_or(empty);
        let binding_items = if binding.is_call_to(SYM_VECTOR) {
            &binding_items[1..]
        } else {
            binding_items
        };
        let [var, iterable] = binding_items else {
            return Err(self.malformed(form, "for", "expected [var iterable]"));
        };
        let Some(var_name) = var.as_symbol() else {
            return Err(self.malformed(var, "for", "loop variable must be a name"));
        };

        let body = items[2..]
            .iter()
            .map(|f| self.lower_statement(f))
            .collect::<Result<Vec<_>, _>>()?;
        let body = IrNode::new(IrKind::BlockStatement { body }, form.meta.clone());

        // Lazy-range specialization: the sequence never materializes.
        if iterable.is_call_to("range") {
            let range_args = &iterable.as_list().expect("range form")[1..];
            let (start, end, step) = match range_args {
                [end] => (None, end, None),
                [start, end] => (Some(start), end, None),
                [start, end, step] => (Some(start), end, Some(step)),
                _ => return Err(self.malformed(iterable, "range", "expected 1 to 3 arguments")),
            };
            let zero = IrNode::new(
                IrKind::Literal {
                    value: crate::syntax::Lit::Number(0.0),
                },
                iterable.meta.clone(),
            );
            return Ok(IrNode::new(
                IrKind::ForStatement {
                    var: var_name.to_string(),
                    start: Box::new(match start {
                        Some(s) => self.lower_expr(s)?,
                        None => zero,
                    }),
                    end: Box::new(self.lower_expr(end)?),
                    step: step.map(|s| self.lower_expr(s).map(Box::new)).transpose()?,
                    body: Box::new(body),
                },
                form.meta.clone(),
            ));
        }

        let iterable_ir = self.lower_expr(iterable)?;
        // Array literals are already sequences.
        let iterable_ir = if iterable.is_call_to(SYM_VECTOR) {
            iterable_ir
        } else {
            IrNode::new(
                IrKind::CallExpression {
                    callee: Box::new(helper_ref("__hql_toSequence", form)),
                    args: vec![iterable_ir],
                },
                iterable.meta.clone(),
            )
        };
        Ok(IrNode::new(
            IrKind::ForOfStatement {
                binding: Box::new(IrNode::new(
                    IrKind::Identifier {
                        name: var_name.to_string(),
                    },
                    var.meta.clone(),
                )),
                iterable: Box::new(iterable_ir),
                body: Box::new(body),
            },
            form.meta.clone(),
        ))
    }

    pub(crate) fn lower_while(&self, form: &Sexp) -> Result<IrNode, HqlError> {
        let items = form.as_list().expect("while form is a list");
        let [_, test, body @ ..] = items else {
            return Err(self.malformed(form, "while", "expected a test and a body"));
        };
        let body_ir = body
            .iter()
            .map(|f| self.lower_statement(f))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(IrNode::new(
            IrKind::WhileStatement {
                test: Box::new(self.lower_expr(test)?),
                body: Box::new(IrNode::new(
                    IrKind::BlockStatement { body: body_ir },
                    form.meta.clone(),
                )),
            },
            form.meta.clone(),
        ))
    }

    pub(crate) fn lower_throw(&self, form: &Sexp) -> Result<IrNode, HqlError> {
        let items = form.as_list().expect("throw form is a list");
        let [_, arg] = items else {
            return Err(self.malformed(form, "throw", "expected one expression"));
        };
        Ok(IrNode::new(
            IrKind::ThrowStatement {
                argument: Box::new(self.lower_expr(arg)?),
            },
            form.meta.clone(),
        ))
    }

    /// `(try body... (catch e handler...) (finally cleanup...))`.
    pub(crate) fn lower_try(&self, form: &Sexp) -> Result<IrNode, HqlError> {
        let items = form.as_list().expect("try form is a list");
        let mut body = Vec::new();
        let mut handler = None;
        let mut finalizer = None;
        for item in &items[1..] {
            match item.head_symbol() {
                Some("catch") => {
                    let parts = item.as_list().expect("catch form");
                    let param = parts
                        .get(1)
                        .and_then(Sexp::as_symbol)
                        .unwrap_or("e")
                        .to_string();
                    let stmts = parts[2..]
                        .iter()
                        .map(|f| self.lower_statement(f))
                        .collect::<Result<Vec<_>, _>>()?;
                    handler = Some((
                        param,
                        Box::new(IrNode::new(
                            IrKind::BlockStatement { body: stmts },
                            item.meta.clone(),
                        )),
                    ));
                }
                Some("finally") => {
                    let parts = item.as_list().expect("finally form");
                    let stmts = parts[1..]
                        .iter()
                        .map(|f| self.lower_statement(f))
                        .collect::<Result<Vec<_>, _>>()?;
                    finalizer = Some(Box::new(IrNode::new(
                        IrKind::BlockStatement { body: stmts },
                        item.meta.clone(),
                    )));
                }
                _ => body.push(self.lower_statement(item)?),
            }
        }
        Ok(IrNode::new(
            IrKind::TryStatement {
                block: Box::new(IrNode::new(
                    IrKind::BlockStatement { body },
                    form.meta.clone(),
                )),
                handler,
                finalizer,
            },
            form.meta.clone(),
        ))
    }

    /// `(class Name (field f v?) (method m [p...] body...))`.
    pub(crate) fn lower_class(&self, form: &Sexp) -> Result<IrNode, HqlError> {
        let items = form.as_list().expect("class form is a list");
        let Some(name) = items.get(1).and_then(Sexp::as_symbol) else {
            return Err(self.malformed(form, "class", "expected a class name"));
        };
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        for member in &items[2..] {
            match member.head_symbol() {
                Some("field") => {
                    let parts = member.as_list().expect("field form");
                    let Some(field_name) = parts.get(1).and_then(Sexp::as_symbol) else {
                        return Err(self.malformed(member, "field", "expected a field name"));
                    };
                    let init = parts
                        .get(2)
                        .map(|init| self.lower_expr(init))
                        .transpose()?;
                    fields.push((field_name.to_string(), init));
                }
                Some("method") => {
                    let parts = member.as_list().expect("method form");
                    let [_, m_name, m_params, m_body @ ..] = parts else {
                        return Err(self.malformed(member, "method", "expected name, params, body"));
                    };
                    let Some(m_name) = m_name.as_symbol() else {
                        return Err(self.malformed(member, "method", "method name must be a symbol"));
                    };
                    let (params, _types, rest_param) = self.lower_params(m_params)?;
                    let (_, body_forms) = split_return_annotation(m_body);
                    let body = self.lower_body_with_return(body_forms)?;
                    methods.push(IrNode::new(
                        IrKind::FunctionDeclaration {
                            id: m_name.to_string(),
                            params: with_rest(params, rest_param),
                            body: Box::new(body),
                            is_async: contains_await(body_forms),
                        },
                        member.meta.clone(),
                    ));
                }
                _ => return Err(self.malformed(member, "class", "members are (field ...) or (method ...)")),
            }
        }
        Ok(IrNode::new(
            IrKind::ClassDeclaration {
                id: name.to_string(),
                fields,
                methods,
            },
            form.meta.clone(),
        ))
    }

    // ========================================================================
    // PATTERN MATCHING
    // ========================================================================

    /// `(match v (pattern result)...)` lowers to an IIFE that tests each
    /// clause in order. Literal patterns compare strictly, map patterns go
    /// through `__hql_match_obj`, `_` always matches, and a symbol pattern
    /// binds the scrutinee.
    pub(crate) fn lower_match(&self, form: &Sexp, items: &[Sexp]) -> Result<IrNode, HqlError> {
        let [_, scrutinee, clauses @ ..] = items else {
            return Err(self.malformed(form, "match", "expected a value and clauses"));
        };
        let subject = next_gensym("__match");
        let subject_id = |at: &Sexp| {
            IrNode::new(
                IrKind::Identifier {
                    name: subject.clone(),
                },
                at.meta.clone(),
            )
        };

        let mut body = vec![IrNode::new(
            IrKind::VariableDeclaration {
                decl: DeclKind::Const,
                target: Box::new(subject_id(scrutinee)),
                init: Box::new(self.lower_expr(scrutinee)?),
            },
            scrutinee.meta.clone(),
        )];

        for clause in clauses {
            let Some([pattern, result @ ..]) = clause.as_list() else {
                return Err(self.malformed(clause, "match", "clauses are (pattern result...)"));
            };
            let return_result = IrNode::new(
                IrKind::ReturnStatement {
                    argument: Some(Box::new(match result {
                        [single] => self.lower_expr(single)?,
                        _ => self.iife(clause, result)?,
                    })),
                },
                clause.meta.clone(),
            );

            match &*pattern.kind {
                SexpKind::Symbol(name) if name == "_" => {
                    body.push(return_result);
                    break;
                }
                SexpKind::Symbol(name) => {
                    // Binding pattern: always matches, names the subject.
                    body.push(IrNode::new(
                        IrKind::VariableDeclaration {
                            decl: DeclKind::Const,
                            target: Box::new(IrNode::new(
                                IrKind::Identifier { name: name.clone() },
                                pattern.meta.clone(),
                            )),
                            init: Box::new(subject_id(pattern)),
                        },
                        pattern.meta.clone(),
                    ));
                    body.push(return_result);
                    break;
                }
                SexpKind::Literal(_) => {
                    let test = IrNode::new(
                        IrKind::BinaryExpression {
                            op: "===".into(),
                            left: Box::new(subject_id(pattern)),
                            right: Box::new(self.lower_expr(pattern)?),
                        },
                        pattern.meta.clone(),
                    );
                    body.push(IrNode::new(
                        IrKind::IfStatement {
                            test: Box::new(test),
                            consequent: Box::new(IrNode::new(
                                IrKind::BlockStatement {
                                    body: vec![return_result],
                                },
                                clause.meta.clone(),
                            )),
                            alternate: None,
                        },
                        clause.meta.clone(),
                    ));
                }
                SexpKind::List(_) if pattern.is_call_to(SYM_HASH_MAP) => {
                    let pattern_obj = self.match_pattern_object(pattern)?;
                    let test = IrNode::new(
                        IrKind::CallExpression {
                            callee: Box::new(helper_ref("__hql_match_obj", pattern)),
                            args: vec![pattern_obj, subject_id(pattern)],
                        },
                        pattern.meta.clone(),
                    );
                    body.push(IrNode::new(
                        IrKind::IfStatement {
                            test: Box::new(test),
                            consequent: Box::new(IrNode::new(
                                IrKind::BlockStatement {
                                    body: vec![return_result],
                                },
                                clause.meta.clone(),
                            )),
                            alternate: None,
                        },
                        clause.meta.clone(),
                    ));
                }
                _ => return Err(self.malformed(pattern, "match", "unsupported pattern")),
            }
        }

        body.push(IrNode::new(
            IrKind::ReturnStatement {
                argument: Some(Box::new(IrNode::new(
                    IrKind::Literal {
                        value: crate::syntax::Lit::Null,
                    },
                    form.meta.clone(),
                ))),
            },
            form.meta.clone(),
        ));

        Ok(IrNode::new(
            IrKind::CallExpression {
                callee: Box::new(IrNode::new(
                    IrKind::FunctionExpression {
                        params: vec![],
                        body: Box::new(IrNode::new(
                            IrKind::BlockStatement { body },
                            form.meta.clone(),
                        )),
                        is_async: false,
                        is_arrow: true,
                    },
                    form.meta.clone(),
                )),
                args: vec![],
            },
            form.meta.clone(),
        ))
    }

    /// A map pattern becomes a plain object literal handed to the
    /// structural matcher; spread entries become SpreadAssignments.
    fn match_pattern_object(&self, pattern: &Sexp) -> Result<IrNode, HqlError> {
        let entries = &pattern.as_list().expect("map pattern")[1..];
        let mut properties = Vec::new();
        let mut i = 0;
        while i < entries.len() {
            // A spread entry occupies a single slot; key/value pairs take
            // two.
            if entries[i].is_call_to(SYM_SPREAD) {
                let spread_arg = &entries[i].as_list().expect("spread form")[1];
                properties.push(IrNode::new(
                    IrKind::SpreadAssignment {
                        argument: Box::new(self.lower_expr(spread_arg)?),
                    },
                    entries[i].meta.clone(),
                ));
                i += 1;
                continue;
            }
            let key = &entries[i];
            let Some(value) = entries.get(i + 1) else {
                return Err(self.malformed(pattern, "match", "map pattern key without a value"));
            };
            let key_ir = match key.as_symbol().or_else(|| key.as_str()) {
                Some(name) => IrNode::new(
                    IrKind::Literal {
                        value: crate::syntax::Lit::Str(name.to_string()),
                    },
                    key.meta.clone(),
                ),
                None => self.lower_expr(key)?,
            };
            properties.push(IrNode::new(
                IrKind::Property {
                    key: Box::new(key_ir),
                    value: Box::new(self.lower_expr(value)?),
                    computed: false,
                },
                key.meta.clone(),
            ));
            i += 2;
        }
        Ok(IrNode::new(
            IrKind::ObjectExpression { properties },
            pattern.meta.clone(),
        ))
    }

    // ========================================================================
    // MODULES
    // ========================================================================

    /// `(import name from "spec")`, `(import [a b] from "spec")`, or the
    /// side-effect-only `(import "spec")`.
    pub(crate) fn lower_import(&self, form: &Sexp) -> Result<IrNode, HqlError> {
        let items = form.as_list().expect("import form is a list");
        match items {
            [_, spec] if spec.as_str().is_some() => Ok(IrNode::new(
                IrKind::ImportDeclaration {
                    specifiers: vec![],
                    source: spec.as_str().unwrap().to_string(),
                },
                form.meta.clone(),
            )),
            [_, binding, from, spec] if from.as_symbol() == Some("from") => {
                let Some(source) = spec.as_str() else {
                    return Err(self.malformed(form, "import", "module specifier must be a string"));
                };
                let specifiers = if let Some(name) = binding.as_symbol() {
                    vec![ImportSpecifier::Default(name.to_string())]
                } else if binding.is_call_to(SYM_VECTOR) {
                    binding.as_list().expect("vector form")[1..]
                        .iter()
                        .map(|item| {
                            item.as_symbol()
                                .map(|s| ImportSpecifier::Named {
                                    imported: s.to_string(),
                                    local: s.to_string(),
                                })
                                .ok_or_else(|| {
                                    self.malformed(item, "import", "imported names must be symbols")
                                })
                        })
                        .collect::<Result<Vec<_>, _>>()?
                } else {
                    return Err(self.malformed(form, "import", "expected a name or [names...]"));
                };
                Ok(IrNode::new(
                    IrKind::ImportDeclaration {
                        specifiers,
                        source: source.to_string(),
                    },
                    form.meta.clone(),
                ))
            }
            _ => Err(self.malformed(
                form,
                "import",
                "expected (import name from \"spec\") or (import [names] from \"spec\")",
            )),
        }
    }

    /// `(export [a b])` re-exports existing bindings by name.
    pub(crate) fn lower_export(&self, form: &Sexp) -> Result<IrNode, HqlError> {
        let items = form.as_list().expect("export form is a list");
        let [_, binding] = items else {
            return Err(self.malformed(form, "export", "expected (export [names...])"));
        };
        if !binding.is_call_to(SYM_VECTOR) {
            return Err(self.malformed(form, "export", "expected a vector of names"));
        }
        let names = binding.as_list().expect("vector form")[1..]
            .iter()
            .map(|item| {
                item.as_symbol()
                    .map(|s| (s.to_string(), s.to_string()))
                    .ok_or_else(|| self.malformed(item, "export", "exported names must be symbols"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(IrNode::new(
            IrKind::ExportNamedDeclaration { names },
            form.meta.clone(),
        ))
    }
}

// ============================================================================
// SHAPE HELPERS
// ============================================================================

/// Recognizes `(let (name value) body...)`: a plain two-element list
/// target whose head is a bare symbol (vectors and maps are destructuring
/// targets instead).
pub(crate) fn scoped_binding(items: &[Sexp]) -> Option<(&Sexp, &Sexp)> {
    let [_, target, _rest @ ..] = items else {
        return None;
    };
    if items.len() < 3 {
        return None;
    }
    let pair = target.as_list()?;
    let [name, init] = pair else {
        return None;
    };
    let head = name.as_symbol()?;
    if head == crate::syntax::SYM_VECTOR || head == SYM_HASH_MAP {
        return None;
    }
    Some((name, init))
}

fn split_return_annotation(items: &[Sexp]) -> (Option<String>, &[Sexp]) {
    match items.first().and_then(Sexp::as_symbol) {
        Some(s) if s.starts_with(':') && items.len() > 1 => {
            (Some(s[1..].to_string()), &items[1..])
        }
        _ => (None, items),
    }
}

fn with_rest(mut params: Vec<IrNode>, rest: Option<IrNode>) -> Vec<IrNode> {
    if let Some(rest) = rest {
        params.push(rest);
    }
    params
}

/// Syntactic scan for `await` so function emission can pick `async`.
fn contains_await(forms: &[Sexp]) -> bool {
    fn scan(node: &Sexp) -> bool {
        match &*node.kind {
            SexpKind::List(items) => {
                if node.is_call_to("await") {
                    return true;
                }
                // Nested functions own their own awaits.
                if node.is_call_to("fn") {
                    return false;
                }
                items.iter().any(scan)
            }
            _ => false,
        }
    }
    forms.iter().any(scan)
}
