//! Scope arena for macro-time evaluation.
//!
//! The compiler driver owns one arena; scopes hold parent indices rather
//! than pointers, so macro closures can keep a plain `ScopeId` and no
//! retain cycle is possible (macros live in a separate map from the
//! variables that could reference them).

use im::HashMap;

use crate::interp::Value;
use crate::macros::MacroClosure;

/// Index of a scope in the arena. The global scope is always index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub usize);

/// One lexical scope: a parent pointer plus the two name maps.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub variables: HashMap<String, Value>,
    pub macros: HashMap<String, MacroClosure>,
}

/// All scopes of one compiler driver. Scopes are created on each
/// `let`/`fn` entry and become unreachable on exit; the arena itself
/// outlives IR construction, so no node ever references a destroyed scope.
#[derive(Debug, Clone)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
    /// File currently being expanded, for diagnostic attribution.
    pub current_file: Option<String>,
    /// Macro currently being evaluated, for diagnostic attribution.
    pub current_macro_context: Option<String>,
}

impl ScopeArena {
    pub fn new() -> Self {
        ScopeArena {
            scopes: vec![Scope::default()],
            current_file: None,
            current_macro_context: None,
        }
    }

    pub const GLOBAL: ScopeId = ScopeId(0);

    /// Creates a child scope and returns its index.
    pub fn push_scope(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            parent: Some(parent),
            ..Scope::default()
        });
        id
    }

    pub fn define(&mut self, scope: ScopeId, name: impl Into<String>, value: Value) {
        self.scopes[scope.0].variables.insert(name.into(), value);
    }

    pub fn define_macro(&mut self, scope: ScopeId, closure: MacroClosure) {
        self.scopes[scope.0]
            .macros
            .insert(closure.name.clone(), closure);
    }

    /// Walks the scope chain for a variable binding.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<Value> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = &self.scopes[id.0];
            if let Some(value) = s.variables.get(name) {
                return Some(value.clone());
            }
            current = s.parent;
        }
        None
    }

    /// Walks the scope chain for a macro binding.
    pub fn lookup_macro(&self, scope: ScopeId, name: &str) -> Option<MacroClosure> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = &self.scopes[id.0];
            if let Some(closure) = s.macros.get(name) {
                return Some(closure.clone());
            }
            current = s.parent;
        }
        None
    }

    /// Reassigns an existing binding, walking the chain. Returns false
    /// when no scope declares the name.
    pub fn assign(&mut self, scope: ScopeId, name: &str, value: Value) -> bool {
        let mut current = Some(scope);
        while let Some(id) = current {
            if self.scopes[id.0].variables.contains_key(name) {
                self.scopes[id.0].variables.insert(name.to_string(), value);
                return true;
            }
            current = self.scopes[id.0].parent;
        }
        false
    }

    /// Drops every scope and binding, restoring a fresh global scope.
    /// Exposed so unrelated compiles can start deterministic.
    pub fn reset(&mut self) {
        self.scopes = vec![Scope::default()];
        self.current_file = None;
        self.current_macro_context = None;
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }
}

impl Default for ScopeArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_parent_chain() {
        let mut arena = ScopeArena::new();
        arena.define(ScopeArena::GLOBAL, "x", Value::Number(1.0));
        let child = arena.push_scope(ScopeArena::GLOBAL);
        let grandchild = arena.push_scope(child);
        assert_eq!(arena.lookup(grandchild, "x"), Some(Value::Number(1.0)));
        assert_eq!(arena.lookup(grandchild, "y"), None);
    }

    #[test]
    fn child_bindings_shadow_without_mutating_parent() {
        let mut arena = ScopeArena::new();
        arena.define(ScopeArena::GLOBAL, "x", Value::Number(1.0));
        let child = arena.push_scope(ScopeArena::GLOBAL);
        arena.define(child, "x", Value::Number(2.0));
        assert_eq!(arena.lookup(child, "x"), Some(Value::Number(2.0)));
        assert_eq!(
            arena.lookup(ScopeArena::GLOBAL, "x"),
            Some(Value::Number(1.0))
        );
    }

    #[test]
    fn assign_targets_the_declaring_scope() {
        let mut arena = ScopeArena::new();
        arena.define(ScopeArena::GLOBAL, "x", Value::Number(1.0));
        let child = arena.push_scope(ScopeArena::GLOBAL);
        assert!(arena.assign(child, "x", Value::Number(5.0)));
        assert_eq!(
            arena.lookup(ScopeArena::GLOBAL, "x"),
            Some(Value::Number(5.0))
        );
        assert!(!arena.assign(child, "missing", Value::Nil));
    }

    #[test]
    fn reset_restores_a_single_empty_global() {
        let mut arena = ScopeArena::new();
        arena.define(ScopeArena::GLOBAL, "x", Value::Number(1.0));
        arena.push_scope(ScopeArena::GLOBAL);
        arena.reset();
        assert_eq!(arena.scope_count(), 1);
        assert_eq!(arena.lookup(ScopeArena::GLOBAL, "x"), None);
    }
}
