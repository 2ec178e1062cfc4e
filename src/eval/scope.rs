//! Lexical scopes
//!
//! Scopes live in an arena and refer to their parent by handle, so
//! function values can keep their closure scope alive without any
//! reference cycles: children never point at descendants. Each `{…}`
//! block, loop body, match arm, and function call pushes a fresh child
//! scope; for function calls the parent is the function's *closure*
//! scope, not the caller's.

use std::rc::Rc;

use crate::eval::value::{FunctionValue, Value};

/// Handle into the scope arena
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScopeId(usize);

#[derive(Debug)]
struct Binding {
    value: Value,
    mutable: bool,
}

#[derive(Debug, Default)]
struct Scope {
    parent: Option<ScopeId>,
    bindings: Vec<(String, Binding)>,
    /// User-defined procedures, kept apart from value bindings
    fns: Vec<(String, Rc<FunctionValue>)>,
}

/// Why an operation on a scope failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeError {
    /// Name already declared in the same scope
    Redeclared,
    /// Assignment target not found anywhere in the chain
    Undefined,
    /// Assignment target found but declared `const`
    Immutable,
}

/// Arena of scope nodes
#[derive(Debug, Default)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
}

impl ScopeArena {
    /// Create the arena with a root scope and return its handle
    pub fn new() -> (ScopeArena, ScopeId) {
        let arena = ScopeArena { scopes: vec![Scope::default()] };
        (arena, ScopeId(0))
    }

    /// Push a fresh child of `parent`
    pub fn push(&mut self, parent: ScopeId) -> ScopeId {
        self.scopes.push(Scope { parent: Some(parent), ..Scope::default() });
        ScopeId(self.scopes.len() - 1)
    }

    /// Declare a new binding in `scope` itself
    pub fn declare(
        &mut self,
        scope: ScopeId,
        name: &str,
        value: Value,
        mutable: bool,
    ) -> Result<(), ScopeError> {
        let s = &mut self.scopes[scope.0];
        if s.bindings.iter().any(|(n, _)| n == name) || s.fns.iter().any(|(n, _)| n == name) {
            return Err(ScopeError::Redeclared);
        }
        s.bindings.push((name.to_string(), Binding { value, mutable }));
        Ok(())
    }

    /// Declare a user procedure in `scope`
    pub fn declare_fn(
        &mut self,
        scope: ScopeId,
        name: &str,
        function: Rc<FunctionValue>,
    ) -> Result<(), ScopeError> {
        let s = &mut self.scopes[scope.0];
        if s.bindings.iter().any(|(n, _)| n == name) || s.fns.iter().any(|(n, _)| n == name) {
            return Err(ScopeError::Redeclared);
        }
        s.fns.push((name.to_string(), function));
        Ok(())
    }

    /// Look a name up, climbing the parent chain
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<Value> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = &self.scopes[id.0];
            if let Some((_, b)) = s.bindings.iter().find(|(n, _)| n == name) {
                return Some(b.value.clone());
            }
            if let Some((_, f)) = s.fns.iter().find(|(n, _)| n == name) {
                return Some(Value::Function(f.clone()));
            }
            current = s.parent;
        }
        None
    }

    /// Assign to an existing binding, climbing the parent chain
    pub fn assign(&mut self, scope: ScopeId, name: &str, value: Value) -> Result<(), ScopeError> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = &mut self.scopes[id.0];
            if let Some((_, b)) = s.bindings.iter_mut().find(|(n, _)| n == name) {
                if !b.mutable {
                    return Err(ScopeError::Immutable);
                }
                b.value = value;
                return Ok(());
            }
            if s.fns.iter().any(|(n, _)| n == name) {
                return Err(ScopeError::Immutable);
            }
            current = s.parent;
        }
        Err(ScopeError::Undefined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_and_lookup() {
        let (mut arena, root) = ScopeArena::new();
        arena.declare(root, "a", Value::Int(1), false).unwrap();
        assert!(matches!(arena.lookup(root, "a"), Some(Value::Int(1))));
        assert!(arena.lookup(root, "missing").is_none());
    }

    #[test]
    fn test_lookup_climbs_chain() {
        let (mut arena, root) = ScopeArena::new();
        arena.declare(root, "a", Value::Int(1), false).unwrap();
        let child = arena.push(root);
        let grandchild = arena.push(child);
        assert!(matches!(arena.lookup(grandchild, "a"), Some(Value::Int(1))));
    }

    #[test]
    fn test_shadowing_in_child() {
        let (mut arena, root) = ScopeArena::new();
        arena.declare(root, "a", Value::Int(1), false).unwrap();
        let child = arena.push(root);
        arena.declare(child, "a", Value::Int(2), false).unwrap();
        assert!(matches!(arena.lookup(child, "a"), Some(Value::Int(2))));
        assert!(matches!(arena.lookup(root, "a"), Some(Value::Int(1))));
    }

    #[test]
    fn test_redeclaration_rejected_same_scope() {
        let (mut arena, root) = ScopeArena::new();
        arena.declare(root, "a", Value::Int(1), false).unwrap();
        assert_eq!(
            arena.declare(root, "a", Value::Int(2), true),
            Err(ScopeError::Redeclared)
        );
    }

    #[test]
    fn test_assignment_rules() {
        let (mut arena, root) = ScopeArena::new();
        arena.declare(root, "c", Value::Int(1), false).unwrap();
        arena.declare(root, "m", Value::Int(1), true).unwrap();
        let child = arena.push(root);

        assert_eq!(arena.assign(child, "m", Value::Int(5)), Ok(()));
        assert!(matches!(arena.lookup(root, "m"), Some(Value::Int(5))));
        assert_eq!(arena.assign(child, "c", Value::Int(5)), Err(ScopeError::Immutable));
        assert_eq!(arena.assign(child, "nope", Value::Int(5)), Err(ScopeError::Undefined));
    }
}
