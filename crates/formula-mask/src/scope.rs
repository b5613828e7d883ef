//! Layered name-resolution scopes.
//!
//! A [`Scope`] is a frame of bindings plus an optional parent. Lookup walks from the innermost
//! frame outwards. Each binding is either an already-forced value or a lazy entry that asks a
//! [`Resolve`] implementation for the value on every access; resolvers that want memoization
//! define the forced value into an inner frame so later lookups stop before reaching the lazy
//! one.
use crate::mask::MaskResult;
use crate::proxy::{Resolution, Resolve};
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Clone)]
pub enum Binding {
    Lazy(Rc<dyn Resolve>),
    Resolved(Value),
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Lazy(_) => f.write_str("Lazy(..)"),
            Binding::Resolved(value) => f.debug_tuple("Resolved").field(value).finish(),
        }
    }
}

struct Frame {
    bindings: RefCell<HashMap<String, Binding>>,
    parent: Option<Scope>,
}

/// Shared handle to one frame of a scope chain.
#[derive(Clone)]
pub struct Scope(Rc<Frame>);

impl Scope {
    /// A scope with no parent.
    pub fn root() -> Self {
        Self::with_parent(None)
    }

    /// A new empty scope whose parent is `parent`.
    pub fn child(parent: &Scope) -> Self {
        Self::with_parent(Some(parent.clone()))
    }

    /// A new scope where each of `names` resolves lazily through `resolver`.
    pub fn lazy<I, S>(names: I, resolver: Rc<dyn Resolve>, parent: Option<&Scope>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scope = Self::with_parent(parent.cloned());
        {
            let mut bindings = scope.0.bindings.borrow_mut();
            for name in names {
                bindings.insert(name.into(), Binding::Lazy(Rc::clone(&resolver)));
            }
        }
        scope
    }

    fn with_parent(parent: Option<Scope>) -> Self {
        Scope(Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent,
        }))
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.0.parent.as_ref()
    }

    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Define (or overwrite) an eager binding in this frame.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.0
            .bindings
            .borrow_mut()
            .insert(name.into(), Binding::Resolved(value));
    }

    /// Remove a binding from this frame, returning whether one was present.
    pub fn remove(&self, name: &str) -> bool {
        self.0.bindings.borrow_mut().remove(name).is_some()
    }

    pub fn contains_local(&self, name: &str) -> bool {
        self.0.bindings.borrow().contains_key(name)
    }

    /// Names bound in this frame, sorted.
    pub fn local_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.bindings.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `name` is bound anywhere along the chain.
    pub fn is_bound(&self, name: &str) -> bool {
        let mut current = Some(self);
        while let Some(scope) = current {
            if scope.contains_local(name) {
                return true;
            }
            current = scope.parent();
        }
        false
    }

    /// Look `name` up in this frame only, forcing it if it is lazy.
    pub fn get_local(&self, name: &str) -> MaskResult<Option<Value>> {
        // Clone the binding out so no borrow is held while a resolver runs; resolvers may define
        // into any frame, including this one.
        let binding = self.0.bindings.borrow().get(name).cloned();
        match binding {
            None => Ok(None),
            Some(Binding::Resolved(value)) => Ok(Some(value)),
            Some(Binding::Lazy(resolver)) => match resolver.resolve(name)? {
                Resolution::Value(value) => Ok(Some(value)),
                Resolution::Unavailable => Ok(None),
            },
        }
    }

    /// Look `name` up along the chain, innermost frame first.
    ///
    /// Returns `Ok(None)` when the name is unbound or its lazy resolver reports the value as
    /// unavailable.
    pub fn get(&self, name: &str) -> MaskResult<Option<Value>> {
        let mut current = Some(self);
        while let Some(scope) = current {
            if scope.contains_local(name) {
                return scope.get_local(name);
            }
            current = scope.parent();
        }
        Ok(None)
    }

    /// The nearest binding of `name` if it is already a value. Lazy bindings are not forced.
    pub fn peek(&self, name: &str) -> Option<Value> {
        let mut current = Some(self);
        while let Some(scope) = current {
            match scope.0.bindings.borrow().get(name) {
                Some(Binding::Resolved(value)) => return Some(value.clone()),
                Some(Binding::Lazy(_)) => return None,
                None => {}
            }
            current = scope.parent();
        }
        None
    }

    /// Depth of the chain, counting this frame.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = Some(self);
        while let Some(scope) = current {
            depth += 1;
            current = scope.parent();
        }
        depth
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("names", &self.local_names())
            .field("depth", &self.depth())
            .finish()
    }
}
