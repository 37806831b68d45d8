//! Code generator: IR -> pretty-printed JavaScript with source mappings.
//!
//! Emission is a plain IR walk. Every node with a source position records
//! a mapping at the point its first character is emitted; mappings are
//! anchored at line 1 column 0 of the user body, and later stages shift
//! them when a prelude is prepended.

pub mod sourcemap;

pub use sourcemap::{Mapping, SourceMap};

use crate::errors::{meta_span, ErrorReporting, HqlError, ReportContext, SourceContext};
use crate::ir::{ImportSpecifier, IrKind, IrNode};
use crate::syntax::{format_number, Lit};

/// Output of one generation run, pre-prelude.
#[derive(Debug, Clone)]
pub struct Generated {
    pub code: String,
    pub mappings: Vec<Mapping>,
}

/// Generates JavaScript for a lowered, optimized program. With
/// `return_last`, the final expression statement is emitted as a
/// `return`; the linker uses this for its IIFE and module wrappers.
pub fn generate(program: &IrNode, return_last: bool) -> Result<Generated, HqlError> {
    let mut emitter = Emitter::new();
    let IrKind::Program { body } = &program.kind else {
        return Err(emitter.unsupported(program));
    };
    emitter.emit_program_body(body, return_last)?;
    Ok(Generated {
        code: emitter.out,
        mappings: emitter.mappings,
    })
}

/// Rewrites a name into a valid JS identifier: dashes become underscores,
/// a leading digit gets a prefix, anything else unsupported folds to `_`.
pub fn sanitize_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, ch) in name.chars().enumerate() {
        let valid = ch == '$' || ch == '_' || ch.is_ascii_alphanumeric();
        if i == 0 && ch.is_ascii_digit() {
            out.push('_');
            out.push(ch);
        } else if valid {
            out.push(ch);
        } else if ch == '-' {
            out.push('_');
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "_".to_string()
    } else {
        out
    }
}

struct Emitter {
    out: String,
    line: u32,
    column: u32,
    indent: usize,
    mappings: Vec<Mapping>,
    report: ReportContext,
}

impl Emitter {
    fn new() -> Self {
        Emitter {
            out: String::new(),
            line: 0,
            column: 0,
            indent: 0,
            mappings: Vec::new(),
            report: ReportContext::new(SourceContext::fallback("codegen"), "codegen"),
        }
    }

    // ========================================================================
    // TEXT PRIMITIVES
    // ========================================================================

    fn push(&mut self, text: &str) {
        for ch in text.chars() {
            if ch == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += ch.len_utf16() as u32;
            }
        }
        self.out.push_str(text);
    }

    fn newline(&mut self) {
        self.push("\n");
        let pad = "  ".repeat(self.indent);
        self.push(&pad);
    }

    /// Records a mapping for the node at the current output position.
    fn mark(&mut self, node: &IrNode) {
        if let Some(pos) = &node.pos {
            if pos.line > 0 {
                self.mappings.push(Mapping {
                    generated_line: self.line,
                    generated_column: self.column,
                    source_line: pos.line - 1,
                    source_column: pos.column,
                });
            }
        }
    }

    fn unsupported(&self, node: &IrNode) -> HqlError {
        self.report.report(
            crate::errors::ErrorKind::UnsupportedNode {
                kind: node.kind_name().to_string(),
            },
            meta_span(node.pos.as_ref()),
        )
    }

    // ========================================================================
    // PROGRAM AND STATEMENTS
    // ========================================================================

    fn emit_program_body(&mut self, body: &[IrNode], return_last: bool) -> Result<(), HqlError> {
        for (i, stmt) in body.iter().enumerate() {
            if i > 0 {
                self.newline();
            }
            let is_last = i + 1 == body.len();
            if return_last && is_last && !stmt.kind.is_statement() {
                self.mark(stmt);
                self.push("return ");
                self.emit_expr(stmt)?;
                self.push(";");
            } else {
                self.emit_statement(stmt)?;
            }
        }
        Ok(())
    }

    fn emit_statement(&mut self, node: &IrNode) -> Result<(), HqlError> {
        match &node.kind {
            IrKind::Program { .. } => Err(self.unsupported(node)),
            IrKind::BlockStatement { .. } => self.emit_block(node),
            IrKind::VariableDeclaration { decl, target, init } => {
                self.mark(node);
                self.push(decl.keyword());
                self.push(" ");
                self.emit_expr(target)?;
                self.push(" = ");
                self.emit_expr(init)?;
                self.push(";");
                Ok(())
            }
            IrKind::FunctionDeclaration {
                id,
                params,
                body,
                is_async,
            }
            | IrKind::FnFunctionDeclaration {
                id,
                params,
                body,
                is_async,
                ..
            } => {
                self.mark(node);
                if *is_async {
                    self.push("async ");
                }
                self.push("function ");
                self.push(&sanitize_identifier(id));
                self.emit_params(params)?;
                self.push(" ");
                self.emit_block(body)?;
                Ok(())
            }
            IrKind::ClassDeclaration {
                id,
                fields,
                methods,
            } => self.emit_class(node, id, fields, methods),
            IrKind::IfStatement { .. } => self.emit_if(node),
            IrKind::ReturnStatement { argument } => {
                self.mark(node);
                match argument {
                    Some(arg) => {
                        self.push("return ");
                        self.emit_expr(arg)?;
                        self.push(";");
                    }
                    None => self.push("return;"),
                }
                Ok(())
            }
            IrKind::BreakStatement { label } => {
                self.mark(node);
                match label {
                    Some(l) => {
                        self.push("break ");
                        self.push(&sanitize_identifier(l));
                        self.push(";");
                    }
                    None => self.push("break;"),
                }
                Ok(())
            }
            IrKind::ContinueStatement { label } => {
                self.mark(node);
                match label {
                    Some(l) => {
                        self.push("continue ");
                        self.push(&sanitize_identifier(l));
                        self.push(";");
                    }
                    None => self.push("continue;"),
                }
                Ok(())
            }
            IrKind::ForOfStatement {
                binding,
                iterable,
                body,
            } => {
                self.mark(node);
                self.push("for (const ");
                self.emit_expr(binding)?;
                self.push(" of ");
                self.emit_expr(iterable)?;
                self.push(") ");
                self.emit_block(body)?;
                Ok(())
            }
            IrKind::ForStatement {
                var,
                start,
                end,
                step,
                body,
            } => self.emit_for(node, var, start, end, step.as_deref(), body),
            IrKind::WhileStatement { test, body } => {
                self.mark(node);
                self.push("while (");
                self.emit_expr(test)?;
                self.push(") ");
                self.emit_block(body)?;
                Ok(())
            }
            IrKind::ThrowStatement { argument } => {
                self.mark(node);
                self.push("throw ");
                self.emit_expr(argument)?;
                self.push(";");
                Ok(())
            }
            IrKind::TryStatement {
                block,
                handler,
                finalizer,
            } => {
                self.mark(node);
                self.push("try ");
                self.emit_block(block)?;
                if let Some((param, body)) = handler {
                    self.push(" catch (");
                    self.push(&sanitize_identifier(param));
                    self.push(") ");
                    self.emit_block(body)?;
                }
                if let Some(fin) = finalizer {
                    self.push(" finally ");
                    self.emit_block(fin)?;
                }
                Ok(())
            }
            IrKind::ImportDeclaration { specifiers, source } => {
                self.mark(node);
                self.emit_import(specifiers, source);
                Ok(())
            }
            IrKind::ExportNamedDeclaration { names } => {
                self.mark(node);
                self.push("export { ");
                for (i, (local, exported)) in names.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.push(&sanitize_identifier(local));
                    if local != exported {
                        self.push(" as ");
                        self.push(&sanitize_identifier(exported));
                    }
                }
                self.push(" };");
                Ok(())
            }
            // Expression in statement position.
            _ => {
                self.emit_expr(node)?;
                self.push(";");
                Ok(())
            }
        }
    }

    fn emit_block(&mut self, node: &IrNode) -> Result<(), HqlError> {
        let IrKind::BlockStatement { body } = &node.kind else {
            // Single-statement bodies still brace.
            self.push("{");
            self.indent += 1;
            self.newline();
            self.emit_statement(node)?;
            self.indent -= 1;
            self.newline();
            self.push("}");
            return Ok(());
        };
        if body.is_empty() {
            self.push("{}");
            return Ok(());
        }
        self.push("{");
        self.indent += 1;
        for stmt in body {
            self.newline();
            self.emit_statement(stmt)?;
        }
        self.indent -= 1;
        self.newline();
        self.push("}");
        Ok(())
    }

    fn emit_if(&mut self, node: &IrNode) -> Result<(), HqlError> {
        let IrKind::IfStatement {
            test,
            consequent,
            alternate,
        } = &node.kind
        else {
            return Err(self.unsupported(node));
        };
        self.mark(node);
        self.push("if (");
        self.emit_expr(test)?;
        self.push(") ");
        self.emit_block(consequent)?;
        if let Some(alt) = alternate {
            self.push(" else ");
            if matches!(alt.kind, IrKind::IfStatement { .. }) {
                self.emit_if(alt)?;
            } else {
                self.emit_block(alt)?;
            }
        }
        Ok(())
    }

    fn emit_for(
        &mut self,
        node: &IrNode,
        var: &str,
        start: &IrNode,
        end: &IrNode,
        step: Option<&IrNode>,
        body: &IrNode,
    ) -> Result<(), HqlError> {
        self.mark(node);
        let var = sanitize_identifier(var);
        self.push("for (let ");
        self.push(&var);
        self.push(" = ");
        self.emit_expr(start)?;
        self.push("; ");
        self.push(&var);
        // A literal negative step flips the loop direction.
        let descending = matches!(
            step.map(|s| &s.kind),
            Some(IrKind::Literal {
                value: Lit::Number(n)
            }) if *n < 0.0
        );
        self.push(if descending { " > " } else { " < " });
        self.emit_expr(end)?;
        self.push("; ");
        match step {
            None => {
                self.push(&var);
                self.push("++");
            }
            Some(step) => {
                self.push(&var);
                self.push(" += ");
                self.emit_expr(step)?;
            }
        }
        self.push(") ");
        self.emit_block(body)
    }

    fn emit_class(
        &mut self,
        node: &IrNode,
        id: &str,
        fields: &[(String, Option<IrNode>)],
        methods: &[IrNode],
    ) -> Result<(), HqlError> {
        self.mark(node);
        self.push("class ");
        self.push(&sanitize_identifier(id));
        self.push(" {");
        self.indent += 1;
        for (name, init) in fields {
            self.newline();
            self.push(&sanitize_identifier(name));
            if let Some(init) = init {
                self.push(" = ");
                self.emit_expr(init)?;
            }
            self.push(";");
        }
        for method in methods {
            let IrKind::FunctionDeclaration {
                id,
                params,
                body,
                is_async,
            } = &method.kind
            else {
                return Err(self.unsupported(method));
            };
            self.newline();
            self.mark(method);
            if *is_async {
                self.push("async ");
            }
            self.push(&sanitize_identifier(id));
            self.emit_params(params)?;
            self.push(" ");
            self.emit_block(body)?;
        }
        self.indent -= 1;
        self.newline();
        self.push("}");
        Ok(())
    }

    fn emit_import(&mut self, specifiers: &[ImportSpecifier], source: &str) {
        if specifiers.is_empty() {
            self.push(&format!("import {:?};", source));
            return;
        }
        self.push("import ");
        let mut named = Vec::new();
        let mut lead = Vec::new();
        for spec in specifiers {
            match spec {
                ImportSpecifier::Default(name) => lead.push(sanitize_identifier(name)),
                ImportSpecifier::Namespace(name) => {
                    lead.push(format!("* as {}", sanitize_identifier(name)))
                }
                ImportSpecifier::Named { imported, local } => {
                    if imported == local {
                        named.push(sanitize_identifier(local));
                    } else {
                        named.push(format!(
                            "{} as {}",
                            sanitize_identifier(imported),
                            sanitize_identifier(local)
                        ));
                    }
                }
            }
        }
        let mut parts = lead;
        if !named.is_empty() {
            parts.push(format!("{{ {} }}", named.join(", ")));
        }
        self.push(&parts.join(", "));
        self.push(&format!(" from {:?};", source));
    }

    // ========================================================================
    // EXPRESSIONS
    // ========================================================================

    fn emit_expr(&mut self, node: &IrNode) -> Result<(), HqlError> {
        self.mark(node);
        match &node.kind {
            IrKind::Identifier { name } => {
                self.push(&sanitize_identifier(name));
                Ok(())
            }
            IrKind::Literal { value } => {
                let text = match value {
                    Lit::Number(n) => format_number(*n),
                    Lit::Str(s) => format!("{:?}", s),
                    Lit::Bool(b) => b.to_string(),
                    Lit::Null => "null".to_string(),
                };
                self.push(&text);
                Ok(())
            }
            IrKind::BinaryExpression { op, left, right } => {
                self.emit_operand(left)?;
                self.push(" ");
                self.push(op);
                self.push(" ");
                self.emit_operand(right)
            }
            IrKind::UnaryExpression { op, operand } => {
                self.push(op);
                self.emit_operand(operand)
            }
            IrKind::ConditionalExpression {
                test,
                consequent,
                alternate,
            } => {
                self.emit_operand(test)?;
                self.push(" ? ");
                self.emit_operand(consequent)?;
                self.push(" : ");
                self.emit_operand(alternate)
            }
            IrKind::AssignmentExpression { target, value } => {
                self.emit_expr(target)?;
                self.push(" = ");
                self.emit_expr(value)
            }
            IrKind::CallExpression { callee, args } => {
                if matches!(callee.kind, IrKind::FunctionExpression { .. }) {
                    self.push("(");
                    self.emit_expr(callee)?;
                    self.push(")");
                } else {
                    self.emit_expr(callee)?;
                }
                self.push("(");
                self.emit_list(args)?;
                self.push(")");
                Ok(())
            }
            IrKind::NewExpression { callee, args } => {
                self.push("new ");
                self.emit_expr(callee)?;
                self.push("(");
                self.emit_list(args)?;
                self.push(")");
                Ok(())
            }
            IrKind::MemberExpression {
                object,
                property,
                computed,
            } => {
                let needs_parens = matches!(
                    object.kind,
                    IrKind::Literal { .. } | IrKind::FunctionExpression { .. }
                );
                if needs_parens {
                    self.push("(");
                }
                self.emit_expr(object)?;
                if needs_parens {
                    self.push(")");
                }
                if *computed {
                    self.push("[");
                    self.emit_expr(property)?;
                    self.push("]");
                } else {
                    self.push(".");
                    self.emit_expr(property)?;
                }
                Ok(())
            }
            IrKind::FunctionExpression {
                params,
                body,
                is_async,
                is_arrow,
            } => {
                if *is_async {
                    self.push("async ");
                }
                if *is_arrow {
                    self.emit_params(params)?;
                    self.push(" => ");
                    self.emit_block(body)?;
                } else {
                    self.push("function ");
                    self.emit_params(params)?;
                    self.push(" ");
                    self.emit_block(body)?;
                }
                Ok(())
            }
            IrKind::ArrayExpression { elements } => {
                self.push("[");
                self.emit_list(elements)?;
                self.push("]");
                Ok(())
            }
            IrKind::ObjectExpression { properties } => {
                self.push("{");
                for (i, prop) in properties.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    } else {
                        self.push(" ");
                    }
                    self.emit_expr(prop)?;
                }
                if !properties.is_empty() {
                    self.push(" ");
                }
                self.push("}");
                Ok(())
            }
            IrKind::Property {
                key,
                value,
                computed,
            } => {
                if *computed {
                    self.push("[");
                    self.emit_expr(key)?;
                    self.push("]");
                } else {
                    match &key.kind {
                        IrKind::Literal {
                            value: Lit::Str(s),
                        } => self.push(&format!("{:?}", s)),
                        _ => self.emit_expr(key)?,
                    }
                }
                self.push(": ");
                self.emit_expr(value)
            }
            IrKind::SpreadElement { argument } | IrKind::SpreadAssignment { argument } => {
                self.push("...");
                self.emit_expr(argument)
            }
            IrKind::AwaitExpression { argument } => {
                self.push("await ");
                self.emit_operand(argument)
            }
            IrKind::YieldExpression { argument } => {
                self.push("yield ");
                self.emit_operand(argument)
            }
            IrKind::ArrayPattern { elements, rest } => {
                self.push("[");
                for (i, el) in elements.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    match el {
                        Some(el) => self.emit_expr(el)?,
                        None => {}
                    }
                }
                if let Some(rest) = rest {
                    if !elements.is_empty() {
                        self.push(", ");
                    }
                    self.push("...");
                    self.emit_expr(rest)?;
                }
                self.push("]");
                Ok(())
            }
            IrKind::ObjectPattern { properties, rest } => {
                self.push("{ ");
                for (i, (name, alias)) in properties.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.push(&sanitize_identifier(name));
                    if let Some(alias) = alias {
                        self.push(": ");
                        self.emit_expr(alias)?;
                    }
                }
                if let Some(rest) = rest {
                    if !properties.is_empty() {
                        self.push(", ");
                    }
                    self.push("...");
                    self.emit_expr(rest)?;
                }
                self.push(" }");
                Ok(())
            }
            _ => Err(self.unsupported(node)),
        }
    }

    /// Operands of operators parenthesize when they are themselves
    /// compound, keeping emission simple and associativity explicit.
    fn emit_operand(&mut self, node: &IrNode) -> Result<(), HqlError> {
        let compound = matches!(
            node.kind,
            IrKind::BinaryExpression { .. }
                | IrKind::ConditionalExpression { .. }
                | IrKind::AssignmentExpression { .. }
                | IrKind::FunctionExpression { .. }
                | IrKind::AwaitExpression { .. }
                | IrKind::YieldExpression { .. }
        );
        if compound {
            self.push("(");
            self.emit_expr(node)?;
            self.push(")");
        } else {
            self.emit_expr(node)?;
        }
        Ok(())
    }

    fn emit_list(&mut self, items: &[IrNode]) -> Result<(), HqlError> {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.emit_expr(item)?;
        }
        Ok(())
    }

    fn emit_params(&mut self, params: &[IrNode]) -> Result<(), HqlError> {
        self.push("(");
        self.emit_list(params)?;
        self.push(")");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SourceContext;
    use crate::lower::lower_program;
    use crate::optimize::optimize;
    use crate::syntax::read;

    fn emit(source: &str) -> String {
        let forms = read(source, "test.hql").expect("read");
        let program = lower_program(&forms, SourceContext::from_file("test.hql", source))
            .expect("lower");
        let program = optimize(program);
        generate(&program, false).expect("generate").code
    }

    #[test]
    fn declarations_pick_const_and_let() {
        assert_eq!(emit("(let x 1)"), "const x = 1;");
        assert_eq!(emit("(var y 2)"), "let y = 2;");
    }

    #[test]
    fn const_wraps_initializer_in_deep_freeze() {
        assert_eq!(emit("(const c [1 2])"), "const c = __hql_deepFreeze([1, 2]);");
    }

    #[test]
    fn named_fn_emits_function_declaration_with_return() {
        let code = emit("(fn add [a b] (+ a b))");
        assert!(code.starts_with("function add(a, b) {"), "{}", code);
        assert!(code.contains("return a + b;"), "{}", code);
    }

    #[test]
    fn typed_params_are_stripped() {
        let code = emit("(fn add [a:number b:number] :number (+ a b))");
        assert!(code.contains("function add(a, b)"), "{}", code);
    }

    #[test]
    fn dashes_sanitize_to_underscores() {
        assert_eq!(emit("(let my-var 1) my-var"), "const my_var = 1;\nmy_var;");
    }

    #[test]
    fn map_literals_go_through_the_hash_map_helper() {
        let code = emit("{toString: \"my-value\"}");
        assert_eq!(code, "__hql_hash_map(\"toString\", \"my-value\");");
    }

    #[test]
    fn range_for_lowers_to_native_counting_loop() {
        let code = emit("(for [i (range 10)] (console.log i))");
        assert!(
            code.starts_with("for (let i = 0; i < 10; i++) {"),
            "{}",
            code
        );
        assert!(!code.contains("__hql_range"), "{}", code);
    }

    #[test]
    fn collection_for_coerces_through_to_sequence() {
        let code = emit("(let xs [1 2]) (for [x xs] x)");
        assert!(code.contains("for (const x of __hql_toSequence(xs))"), "{}", code);
    }

    #[test]
    fn array_literal_for_skips_coercion() {
        let code = emit("(for [x [1 2]] x)");
        assert!(code.contains("for (const x of [1, 2])"), "{}", code);
    }

    #[test]
    fn if_lowers_by_position() {
        let statement = emit("(if true (console.log 1) (console.log 2))");
        assert!(statement.contains("console.log(1)"), "{}", statement);
        let expression = emit("(let x (if c 1 2))");
        assert!(expression.contains("const x = c ? 1 : 2;"), "{}", expression);
    }

    #[test]
    fn do_in_expression_position_is_an_iife() {
        let code = emit("(let x (do (var t 1) (+ t 1)))");
        assert!(code.contains("(() => {"), "{}", code);
        assert!(code.contains("return t + 1;"), "{}", code);
    }

    #[test]
    fn quoted_data_becomes_js_data() {
        assert_eq!(emit("'x"), "\"x\";");
        assert_eq!(emit("'(a 1)"), "[\"a\", 1];");
    }

    #[test]
    fn destructuring_patterns_emit() {
        let code = emit("(let [a _ c & rest] xs)");
        assert_eq!(code, "const [a, , c, ...rest] = xs;");
        let code = emit("(let {a b} obj)");
        assert_eq!(code, "const { a, b } = obj;");
    }

    #[test]
    fn template_strings_become_str_calls() {
        let code = emit("`hi ${name}!`");
        assert_eq!(code, "str(\"hi \", name, \"!\");");
    }

    #[test]
    fn imports_and_exports_emit_es_module_syntax() {
        assert_eq!(
            emit("(import [a b] from \"./m.hql\")"),
            "import { a, b } from \"./m.hql\";"
        );
        assert_eq!(emit("(export [a b])"), "export { a, b };");
    }

    #[test]
    fn mappings_track_lines_and_columns() {
        let source = "(let x 1)\n(let y 2)";
        let forms = read(source, "test.hql").expect("read");
        let program = lower_program(&forms, SourceContext::from_file("test.hql", source))
            .expect("lower");
        let generated = generate(&program, false).expect("generate");
        let second_line = generated
            .mappings
            .iter()
            .find(|m| m.generated_line == 1)
            .expect("mapping for second statement");
        assert_eq!(second_line.source_line, 1);
    }
}
