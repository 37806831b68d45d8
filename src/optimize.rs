//! Conservative, behavior-preserving IR passes.
//!
//! - dead-branch elimination for literal-boolean `if` tests
//! - constant folding of literal arithmetic and comparisons
//! - wrapping of loops that ended up in expression position into
//!   `(() => { ...; return null; })()`
//! - helper-demand analysis for the linker's prelude
//!
//! The lazy-range specialization itself happens at lowering (the range
//! call never materializes); this stage only guarantees the invariants
//! around it.

use std::collections::BTreeSet;

use crate::ir::{IrKind, IrNode};
use crate::linker::helpers::HELPER_NAMES;
use crate::syntax::Lit;

/// Rewrites the tree bottom-up, statement context first.
pub fn optimize(program: IrNode) -> IrNode {
    rewrite_statement(program)
}

/// Names of runtime helpers the emitted code will reference. Computed on
/// the optimized tree so eliminated branches cost nothing.
pub fn required_helpers(program: &IrNode) -> BTreeSet<&'static str> {
    let mut demanded = BTreeSet::new();
    program.walk(&mut |node| {
        if let IrKind::Identifier { name } = &node.kind {
            if let Some(known) = HELPER_NAMES.iter().find(|h| **h == name.as_str()) {
                demanded.insert(*known);
            }
        }
    });
    demanded
}

// ============================================================================
// REWRITE - statement position
// ============================================================================

fn rewrite_statement(node: IrNode) -> IrNode {
    let IrNode { kind, pos } = node;
    let kind = match kind {
        IrKind::Program { body } => IrKind::Program {
            body: body.into_iter().map(rewrite_statement).collect(),
        },
        IrKind::BlockStatement { body } => IrKind::BlockStatement {
            body: body.into_iter().map(rewrite_statement).collect(),
        },
        IrKind::IfStatement {
            test,
            consequent,
            alternate,
        } => {
            let test = rewrite_expr(*test);
            match literal_bool(&test) {
                Some(true) => return rewrite_statement(*consequent),
                Some(false) => {
                    return match alternate {
                        Some(alt) => rewrite_statement(*alt),
                        None => IrNode::new(IrKind::BlockStatement { body: vec![] }, pos),
                    }
                }
                None => IrKind::IfStatement {
                    test: Box::new(test),
                    consequent: Box::new(rewrite_statement(*consequent)),
                    alternate: alternate.map(|a| Box::new(rewrite_statement(*a))),
                },
            }
        }
        IrKind::VariableDeclaration { decl, target, init } => IrKind::VariableDeclaration {
            decl,
            target,
            init: Box::new(rewrite_expr(*init)),
        },
        IrKind::FunctionDeclaration {
            id,
            params,
            body,
            is_async,
        } => IrKind::FunctionDeclaration {
            id,
            params,
            body: Box::new(rewrite_statement(*body)),
            is_async,
        },
        IrKind::FnFunctionDeclaration {
            id,
            params,
            param_types,
            return_type,
            body,
            is_async,
        } => IrKind::FnFunctionDeclaration {
            id,
            params,
            param_types,
            return_type,
            body: Box::new(rewrite_statement(*body)),
            is_async,
        },
        IrKind::ClassDeclaration {
            id,
            fields,
            methods,
        } => IrKind::ClassDeclaration {
            id,
            fields: fields
                .into_iter()
                .map(|(name, init)| (name, init.map(rewrite_expr)))
                .collect(),
            methods: methods.into_iter().map(rewrite_statement).collect(),
        },
        IrKind::ReturnStatement { argument } => IrKind::ReturnStatement {
            argument: argument.map(|a| Box::new(rewrite_expr(*a))),
        },
        IrKind::ForOfStatement {
            binding,
            iterable,
            body,
        } => IrKind::ForOfStatement {
            binding,
            iterable: Box::new(rewrite_expr(*iterable)),
            body: Box::new(rewrite_statement(*body)),
        },
        IrKind::ForStatement {
            var,
            start,
            end,
            step,
            body,
        } => IrKind::ForStatement {
            var,
            start: Box::new(rewrite_expr(*start)),
            end: Box::new(rewrite_expr(*end)),
            step: step.map(|s| Box::new(rewrite_expr(*s))),
            body: Box::new(rewrite_statement(*body)),
        },
        IrKind::WhileStatement { test, body } => IrKind::WhileStatement {
            test: Box::new(rewrite_expr(*test)),
            body: Box::new(rewrite_statement(*body)),
        },
        IrKind::ThrowStatement { argument } => IrKind::ThrowStatement {
            argument: Box::new(rewrite_expr(*argument)),
        },
        IrKind::TryStatement {
            block,
            handler,
            finalizer,
        } => IrKind::TryStatement {
            block: Box::new(rewrite_statement(*block)),
            handler: handler.map(|(param, body)| (param, Box::new(rewrite_statement(*body)))),
            finalizer: finalizer.map(|f| Box::new(rewrite_statement(*f))),
        },
        // An expression in statement position.
        other => return rewrite_expr(IrNode::new(other, pos)),
    };
    IrNode::new(kind, pos)
}

// ============================================================================
// REWRITE - expression position
// ============================================================================

fn rewrite_expr(node: IrNode) -> IrNode {
    let IrNode { kind, pos } = node;
    let kind = match kind {
        // A loop that reached expression position: evaluate for effect,
        // produce null.
        IrKind::ForOfStatement { .. }
        | IrKind::ForStatement { .. }
        | IrKind::WhileStatement { .. } => {
            let stmt = rewrite_statement(IrNode::new(kind, pos.clone()));
            return wrap_statement_expression(stmt, pos);
        }
        IrKind::ConditionalExpression {
            test,
            consequent,
            alternate,
        } => {
            let test = rewrite_expr(*test);
            match literal_bool(&test) {
                Some(true) => return rewrite_expr(*consequent),
                Some(false) => return rewrite_expr(*alternate),
                None => IrKind::ConditionalExpression {
                    test: Box::new(test),
                    consequent: Box::new(rewrite_expr(*consequent)),
                    alternate: Box::new(rewrite_expr(*alternate)),
                },
            }
        }
        IrKind::BinaryExpression { op, left, right } => {
            let left = rewrite_expr(*left);
            let right = rewrite_expr(*right);
            match fold_binary(&op, &left, &right) {
                Some(folded) => folded,
                None => IrKind::BinaryExpression {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            }
        }
        IrKind::UnaryExpression { op, operand } => {
            let operand = rewrite_expr(*operand);
            match (op.as_str(), &operand.kind) {
                ("-", IrKind::Literal {
                    value: Lit::Number(n),
                }) => IrKind::Literal {
                    value: Lit::Number(-n),
                },
                ("!", IrKind::Literal {
                    value: Lit::Bool(b),
                }) => IrKind::Literal {
                    value: Lit::Bool(!b),
                },
                _ => IrKind::UnaryExpression {
                    op,
                    operand: Box::new(operand),
                },
            }
        }
        IrKind::CallExpression { callee, args } => IrKind::CallExpression {
            callee: Box::new(rewrite_expr(*callee)),
            args: args.into_iter().map(rewrite_expr).collect(),
        },
        IrKind::NewExpression { callee, args } => IrKind::NewExpression {
            callee: Box::new(rewrite_expr(*callee)),
            args: args.into_iter().map(rewrite_expr).collect(),
        },
        IrKind::AssignmentExpression { target, value } => IrKind::AssignmentExpression {
            target,
            value: Box::new(rewrite_expr(*value)),
        },
        IrKind::FunctionExpression {
            params,
            body,
            is_async,
            is_arrow,
        } => IrKind::FunctionExpression {
            params,
            body: Box::new(rewrite_statement(*body)),
            is_async,
            is_arrow,
        },
        IrKind::ArrayExpression { elements } => IrKind::ArrayExpression {
            elements: elements.into_iter().map(rewrite_expr).collect(),
        },
        IrKind::ObjectExpression { properties } => IrKind::ObjectExpression {
            properties: properties.into_iter().map(rewrite_expr).collect(),
        },
        IrKind::Property {
            key,
            value,
            computed,
        } => IrKind::Property {
            key,
            value: Box::new(rewrite_expr(*value)),
            computed,
        },
        IrKind::SpreadElement { argument } => IrKind::SpreadElement {
            argument: Box::new(rewrite_expr(*argument)),
        },
        IrKind::SpreadAssignment { argument } => IrKind::SpreadAssignment {
            argument: Box::new(rewrite_expr(*argument)),
        },
        IrKind::MemberExpression {
            object,
            property,
            computed,
        } => IrKind::MemberExpression {
            object: Box::new(rewrite_expr(*object)),
            property,
            computed,
        },
        IrKind::AwaitExpression { argument } => IrKind::AwaitExpression {
            argument: Box::new(rewrite_expr(*argument)),
        },
        IrKind::YieldExpression { argument } => IrKind::YieldExpression {
            argument: Box::new(rewrite_expr(*argument)),
        },
        other => other,
    };
    IrNode::new(kind, pos)
}

/// `(() => { <stmt>; return null; })()`
fn wrap_statement_expression(stmt: IrNode, pos: Option<crate::syntax::Meta>) -> IrNode {
    let return_null = IrNode::new(
        IrKind::ReturnStatement {
            argument: Some(Box::new(IrNode::new(
                IrKind::Literal { value: Lit::Null },
                pos.clone(),
            ))),
        },
        pos.clone(),
    );
    IrNode::new(
        IrKind::CallExpression {
            callee: Box::new(IrNode::new(
                IrKind::FunctionExpression {
                    params: vec![],
                    body: Box::new(IrNode::new(
                        IrKind::BlockStatement {
                            body: vec![stmt, return_null],
                        },
                        pos.clone(),
                    )),
                    is_async: false,
                    is_arrow: true,
                },
                pos.clone(),
            )),
            args: vec![],
        },
        pos,
    )
}

fn literal_bool(node: &IrNode) -> Option<bool> {
    match &node.kind {
        IrKind::Literal {
            value: Lit::Bool(b),
        } => Some(*b),
        _ => None,
    }
}

fn fold_binary(op: &str, left: &IrNode, right: &IrNode) -> Option<IrKind> {
    let (l, r) = match (&left.kind, &right.kind) {
        (
            IrKind::Literal {
                value: Lit::Number(l),
            },
            IrKind::Literal {
                value: Lit::Number(r),
            },
        ) => (*l, *r),
        _ => return None,
    };
    let folded = match op {
        "+" => Lit::Number(l + r),
        "-" => Lit::Number(l - r),
        "*" => Lit::Number(l * r),
        // Division by a literal zero is left for the runtime.
        "/" if r != 0.0 => Lit::Number(l / r),
        "%" if r != 0.0 => Lit::Number(l % r),
        "===" => Lit::Bool(l == r),
        "!==" => Lit::Bool(l != r),
        "<" => Lit::Bool(l < r),
        "<=" => Lit::Bool(l <= r),
        ">" => Lit::Bool(l > r),
        ">=" => Lit::Bool(l >= r),
        _ => return None,
    };
    Some(IrKind::Literal { value: folded })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> IrNode {
        IrNode::new(
            IrKind::Literal {
                value: Lit::Number(n),
            },
            None,
        )
    }

    fn boolean(b: bool) -> IrNode {
        IrNode::new(
            IrKind::Literal {
                value: Lit::Bool(b),
            },
            None,
        )
    }

    #[test]
    fn folds_literal_arithmetic() {
        let expr = IrNode::new(
            IrKind::BinaryExpression {
                op: "-".into(),
                left: Box::new(IrNode::new(
                    IrKind::BinaryExpression {
                        op: "-".into(),
                        left: Box::new(num(10.0)),
                        right: Box::new(num(1.0)),
                    },
                    None,
                )),
                right: Box::new(num(1.0)),
            },
            None,
        );
        let out = optimize(expr);
        assert_eq!(
            out.kind,
            IrKind::Literal {
                value: Lit::Number(8.0)
            }
        );
    }

    #[test]
    fn literal_test_keeps_only_the_taken_branch() {
        let stmt = IrNode::new(
            IrKind::IfStatement {
                test: Box::new(boolean(false)),
                consequent: Box::new(IrNode::new(IrKind::BlockStatement { body: vec![num(1.0)] }, None)),
                alternate: Some(Box::new(IrNode::new(
                    IrKind::BlockStatement {
                        body: vec![num(2.0)],
                    },
                    None,
                ))),
            },
            None,
        );
        let out = optimize(stmt);
        match out.kind {
            IrKind::BlockStatement { body } => {
                assert_eq!(body.len(), 1);
                assert_eq!(
                    body[0].kind,
                    IrKind::Literal {
                        value: Lit::Number(2.0)
                    }
                );
            }
            other => panic!("expected the alternate block, got {}", other.name()),
        }
    }

    #[test]
    fn loops_in_expression_position_get_wrapped() {
        let loop_node = IrNode::new(
            IrKind::WhileStatement {
                test: Box::new(boolean(true)),
                body: Box::new(IrNode::new(IrKind::BlockStatement { body: vec![] }, None)),
            },
            None,
        );
        let decl = IrNode::new(
            IrKind::VariableDeclaration {
                decl: crate::ir::DeclKind::Const,
                target: Box::new(IrNode::new(
                    IrKind::Identifier { name: "x".into() },
                    None,
                )),
                init: Box::new(loop_node),
            },
            None,
        );
        let out = optimize(decl);
        match out.kind {
            IrKind::VariableDeclaration { init, .. } => {
                assert!(matches!(init.kind, IrKind::CallExpression { .. }));
            }
            other => panic!("expected a declaration, got {}", other.name()),
        }
    }

    #[test]
    fn helper_demand_sees_only_referenced_helpers() {
        let call = IrNode::new(
            IrKind::CallExpression {
                callee: Box::new(IrNode::new(
                    IrKind::Identifier {
                        name: "__hql_get".into(),
                    },
                    None,
                )),
                args: vec![],
            },
            None,
        );
        let helpers = required_helpers(&call);
        assert!(helpers.contains("__hql_get"));
        assert!(!helpers.contains("__hql_range"));
    }
}
