//! Intermediate representation between validated S-expressions and
//! JavaScript text.
//!
//! The kind set is closed; every consumer (optimizer, code generator) has
//! a single match site over it. Nodes carry the source `Meta` they came
//! from so the code generator can record source-map positions.

use serde::{Deserialize, Serialize};

use crate::syntax::{Lit, Meta};

/// `let`/`const` choice for variable declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclKind {
    Const,
    Let,
}

impl DeclKind {
    pub fn keyword(self) -> &'static str {
        match self {
            DeclKind::Const => "const",
            DeclKind::Let => "let",
        }
    }
}

/// One import binding of an `ImportDeclaration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImportSpecifier {
    /// `import name from "..."`
    Default(String),
    /// `import * as name from "..."`
    Namespace(String),
    /// `import { imported as local } from "..."`
    Named { imported: String, local: String },
}

/// An IR node: a kind plus the source position it lowers from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrNode {
    pub kind: IrKind,
    pub pos: Option<Meta>,
}

impl IrNode {
    pub fn new(kind: IrKind, pos: Option<Meta>) -> Self {
        IrNode { kind, pos }
    }

    /// Short kind name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrKind {
    Program {
        body: Vec<IrNode>,
    },
    /// Plain `function name(...) {...}`.
    FunctionDeclaration {
        id: String,
        params: Vec<IrNode>,
        body: Box<IrNode>,
        is_async: bool,
    },
    /// Anonymous or arrow function in expression position.
    FunctionExpression {
        params: Vec<IrNode>,
        body: Box<IrNode>,
        is_async: bool,
        is_arrow: bool,
    },
    /// A named `fn` form: like FunctionDeclaration but remembers the
    /// declared parameter/return types for tooling.
    FnFunctionDeclaration {
        id: String,
        params: Vec<IrNode>,
        param_types: Vec<Option<String>>,
        return_type: Option<String>,
        body: Box<IrNode>,
        is_async: bool,
    },
    ClassDeclaration {
        id: String,
        fields: Vec<(String, Option<IrNode>)>,
        methods: Vec<IrNode>,
    },
    VariableDeclaration {
        decl: DeclKind,
        target: Box<IrNode>,
        init: Box<IrNode>,
    },
    AssignmentExpression {
        target: Box<IrNode>,
        value: Box<IrNode>,
    },
    CallExpression {
        callee: Box<IrNode>,
        args: Vec<IrNode>,
    },
    NewExpression {
        callee: Box<IrNode>,
        args: Vec<IrNode>,
    },
    BinaryExpression {
        op: String,
        left: Box<IrNode>,
        right: Box<IrNode>,
    },
    UnaryExpression {
        op: String,
        operand: Box<IrNode>,
    },
    ConditionalExpression {
        test: Box<IrNode>,
        consequent: Box<IrNode>,
        alternate: Box<IrNode>,
    },
    BlockStatement {
        body: Vec<IrNode>,
    },
    IfStatement {
        test: Box<IrNode>,
        consequent: Box<IrNode>,
        alternate: Option<Box<IrNode>>,
    },
    ReturnStatement {
        argument: Option<Box<IrNode>>,
    },
    BreakStatement {
        label: Option<String>,
    },
    ContinueStatement {
        label: Option<String>,
    },
    ForOfStatement {
        binding: Box<IrNode>,
        iterable: Box<IrNode>,
        body: Box<IrNode>,
    },
    /// Native counting loop; the lazy-range specialization lowers to it.
    ForStatement {
        var: String,
        start: Box<IrNode>,
        end: Box<IrNode>,
        step: Option<Box<IrNode>>,
        body: Box<IrNode>,
    },
    WhileStatement {
        test: Box<IrNode>,
        body: Box<IrNode>,
    },
    ThrowStatement {
        argument: Box<IrNode>,
    },
    TryStatement {
        block: Box<IrNode>,
        handler: Option<(String, Box<IrNode>)>,
        finalizer: Option<Box<IrNode>>,
    },
    AwaitExpression {
        argument: Box<IrNode>,
    },
    YieldExpression {
        argument: Box<IrNode>,
    },
    SpreadElement {
        argument: Box<IrNode>,
    },
    /// Spread inside an object literal.
    SpreadAssignment {
        argument: Box<IrNode>,
    },
    ObjectExpression {
        properties: Vec<IrNode>,
    },
    /// One `key: value` entry of an ObjectExpression.
    Property {
        key: Box<IrNode>,
        value: Box<IrNode>,
        computed: bool,
    },
    ArrayExpression {
        elements: Vec<IrNode>,
    },
    /// Destructuring `[a, , c, ...rest]`; `None` elements are skips.
    ArrayPattern {
        elements: Vec<Option<IrNode>>,
        rest: Option<Box<IrNode>>,
    },
    /// Destructuring `{a, b: alias, ...rest}`.
    ObjectPattern {
        properties: Vec<(String, Option<IrNode>)>,
        rest: Option<Box<IrNode>>,
    },
    Identifier {
        name: String,
    },
    Literal {
        value: Lit,
    },
    MemberExpression {
        object: Box<IrNode>,
        property: Box<IrNode>,
        computed: bool,
    },
    ImportDeclaration {
        specifiers: Vec<ImportSpecifier>,
        source: String,
    },
    ExportNamedDeclaration {
        names: Vec<(String, String)>,
    },
}

impl IrKind {
    pub fn name(&self) -> &'static str {
        match self {
            IrKind::Program { .. } => "Program",
            IrKind::FunctionDeclaration { .. } => "FunctionDeclaration",
            IrKind::FunctionExpression { .. } => "FunctionExpression",
            IrKind::FnFunctionDeclaration { .. } => "FnFunctionDeclaration",
            IrKind::ClassDeclaration { .. } => "ClassDeclaration",
            IrKind::VariableDeclaration { .. } => "VariableDeclaration",
            IrKind::AssignmentExpression { .. } => "AssignmentExpression",
            IrKind::CallExpression { .. } => "CallExpression",
            IrKind::NewExpression { .. } => "NewExpression",
            IrKind::BinaryExpression { .. } => "BinaryExpression",
            IrKind::UnaryExpression { .. } => "UnaryExpression",
            IrKind::ConditionalExpression { .. } => "ConditionalExpression",
            IrKind::BlockStatement { .. } => "BlockStatement",
            IrKind::IfStatement { .. } => "IfStatement",
            IrKind::ReturnStatement { .. } => "ReturnStatement",
            IrKind::BreakStatement { .. } => "BreakStatement",
            IrKind::ContinueStatement { .. } => "ContinueStatement",
            IrKind::ForOfStatement { .. } => "ForOfStatement",
            IrKind::ForStatement { .. } => "ForStatement",
            IrKind::WhileStatement { .. } => "WhileStatement",
            IrKind::ThrowStatement { .. } => "ThrowStatement",
            IrKind::TryStatement { .. } => "TryStatement",
            IrKind::AwaitExpression { .. } => "AwaitExpression",
            IrKind::YieldExpression { .. } => "YieldExpression",
            IrKind::SpreadElement { .. } => "SpreadElement",
            IrKind::SpreadAssignment { .. } => "SpreadAssignment",
            IrKind::ObjectExpression { .. } => "ObjectExpression",
            IrKind::Property { .. } => "Property",
            IrKind::ArrayExpression { .. } => "ArrayExpression",
            IrKind::ArrayPattern { .. } => "ArrayPattern",
            IrKind::ObjectPattern { .. } => "ObjectPattern",
            IrKind::Identifier { .. } => "Identifier",
            IrKind::Literal { .. } => "Literal",
            IrKind::MemberExpression { .. } => "MemberExpression",
            IrKind::ImportDeclaration { .. } => "ImportDeclaration",
            IrKind::ExportNamedDeclaration { .. } => "ExportNamedDeclaration",
        }
    }

    /// True for kinds that stand alone as statements; everything else is
    /// an expression emitted with a trailing `;` in statement position.
    pub fn is_statement(&self) -> bool {
        matches!(
            self,
            IrKind::Program { .. }
                | IrKind::FunctionDeclaration { .. }
                | IrKind::FnFunctionDeclaration { .. }
                | IrKind::ClassDeclaration { .. }
                | IrKind::VariableDeclaration { .. }
                | IrKind::BlockStatement { .. }
                | IrKind::IfStatement { .. }
                | IrKind::ReturnStatement { .. }
                | IrKind::BreakStatement { .. }
                | IrKind::ContinueStatement { .. }
                | IrKind::ForOfStatement { .. }
                | IrKind::ForStatement { .. }
                | IrKind::WhileStatement { .. }
                | IrKind::ThrowStatement { .. }
                | IrKind::TryStatement { .. }
                | IrKind::ImportDeclaration { .. }
                | IrKind::ExportNamedDeclaration { .. }
        )
    }
}

impl IrNode {
    /// Visits every direct child without enumerating the union at call
    /// sites. The optimizer's scope-aware queries and the helper-demand
    /// scan are all built on this.
    pub fn walk_children<'n>(&'n self, f: &mut impl FnMut(&'n IrNode)) {
        match &self.kind {
            IrKind::Program { body } | IrKind::BlockStatement { body } => {
                body.iter().for_each(f)
            }
            IrKind::FunctionDeclaration { params, body, .. }
            | IrKind::FunctionExpression { params, body, .. }
            | IrKind::FnFunctionDeclaration { params, body, .. } => {
                params.iter().for_each(&mut *f);
                f(body);
            }
            IrKind::ClassDeclaration {
                fields, methods, ..
            } => {
                for (_, init) in fields {
                    if let Some(init) = init {
                        f(init);
                    }
                }
                methods.iter().for_each(f);
            }
            IrKind::VariableDeclaration { target, init, .. } => {
                f(target);
                f(init);
            }
            IrKind::AssignmentExpression { target, value } => {
                f(target);
                f(value);
            }
            IrKind::CallExpression { callee, args } | IrKind::NewExpression { callee, args } => {
                f(callee);
                args.iter().for_each(f);
            }
            IrKind::BinaryExpression { left, right, .. } => {
                f(left);
                f(right);
            }
            IrKind::UnaryExpression { operand, .. } => f(operand),
            IrKind::ConditionalExpression {
                test,
                consequent,
                alternate,
            } => {
                f(test);
                f(consequent);
                f(alternate);
            }
            IrKind::IfStatement {
                test,
                consequent,
                alternate,
            } => {
                f(test);
                f(consequent);
                if let Some(alt) = alternate {
                    f(alt);
                }
            }
            IrKind::ReturnStatement { argument } => {
                if let Some(arg) = argument {
                    f(arg);
                }
            }
            IrKind::ForOfStatement {
                binding,
                iterable,
                body,
            } => {
                f(binding);
                f(iterable);
                f(body);
            }
            IrKind::ForStatement {
                start,
                end,
                step,
                body,
                ..
            } => {
                f(start);
                f(end);
                if let Some(step) = step {
                    f(step);
                }
                f(body);
            }
            IrKind::WhileStatement { test, body } => {
                f(test);
                f(body);
            }
            IrKind::ThrowStatement { argument }
            | IrKind::AwaitExpression { argument }
            | IrKind::YieldExpression { argument }
            | IrKind::SpreadElement { argument }
            | IrKind::SpreadAssignment { argument } => f(argument),
            IrKind::TryStatement {
                block,
                handler,
                finalizer,
            } => {
                f(block);
                if let Some((_, body)) = handler {
                    f(body);
                }
                if let Some(fin) = finalizer {
                    f(fin);
                }
            }
            IrKind::ObjectExpression { properties } => properties.iter().for_each(f),
            IrKind::Property { key, value, .. } => {
                f(key);
                f(value);
            }
            IrKind::ArrayExpression { elements } => elements.iter().for_each(f),
            IrKind::ArrayPattern { elements, rest } => {
                for el in elements.iter().flatten() {
                    f(el);
                }
                if let Some(rest) = rest {
                    f(rest);
                }
            }
            IrKind::ObjectPattern { properties, rest } => {
                for (_, alias) in properties {
                    if let Some(alias) = alias {
                        f(alias);
                    }
                }
                if let Some(rest) = rest {
                    f(rest);
                }
            }
            IrKind::MemberExpression {
                object, property, ..
            } => {
                f(object);
                f(property);
            }
            IrKind::Identifier { .. }
            | IrKind::Literal { .. }
            | IrKind::BreakStatement { .. }
            | IrKind::ContinueStatement { .. }
            | IrKind::ImportDeclaration { .. }
            | IrKind::ExportNamedDeclaration { .. } => {}
        }
    }

    /// Pre-order walk over the whole tree.
    pub fn walk<'n>(&'n self, f: &mut dyn FnMut(&'n IrNode)) {
        f(self);
        self.walk_children(&mut |child| child.walk(&mut *f));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> IrNode {
        IrNode::new(
            IrKind::Identifier {
                name: name.to_string(),
            },
            None,
        )
    }

    #[test]
    fn walk_visits_every_node_once() {
        let call = IrNode::new(
            IrKind::CallExpression {
                callee: Box::new(ident("f")),
                args: vec![ident("a"), ident("b")],
            },
            None,
        );
        let mut seen = Vec::new();
        call.walk(&mut |node| seen.push(node.kind_name()));
        assert_eq!(
            seen,
            vec!["CallExpression", "Identifier", "Identifier", "Identifier"]
        );
    }

    #[test]
    fn statement_classification_drives_semicolon_emission() {
        assert!(IrKind::IfStatement {
            test: Box::new(ident("x")),
            consequent: Box::new(ident("y")),
            alternate: None,
        }
        .is_statement());
        assert!(!IrKind::Identifier { name: "x".into() }.is_statement());
    }
}
