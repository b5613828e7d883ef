//! Column bindings underneath an evaluation scope.
//!
//! Two implementations share the [`Bindings`] interface and are picked once when a mask is
//! built:
//!
//! - [`GroupedBindings`] (grouped and rowwise data) exposes every column through an *active*
//!   scope of lazy bindings backed by a [`CallbackProxy`], with a *resolved* child scope that
//!   receives each subset the first time it is forced for the current group.
//! - [`NaturalBindings`] (ungrouped data) has a single group spanning the whole dataset, so it
//!   binds every column eagerly into one flat scope. There is no cache and no proxy: the only
//!   group lives exactly as long as the mask.
use crate::cache::{whole_column, SubsetCache, SubsetCacheStats};
use crate::dataset::Dataset;
use crate::index::{SlicingIndex, Variables};
use crate::mask::{MaskError, MaskResult};
use crate::proxy::{CallbackProxy, GroupResolver};
use crate::scope::Scope;
use crate::value::Value;
use std::fmt;
use std::rc::Rc;

pub trait Bindings: fmt::Debug {
    /// Install the group subsequent lookups resolve against.
    fn update(&self, index: &SlicingIndex);

    /// Innermost scope; the evaluation scope is layered on top of it.
    fn bottom(&self) -> &Scope;

    /// Outermost scope holding the column bindings; backs the `.data` pronoun.
    fn top(&self) -> &Scope;

    fn variables(&self) -> &Variables;

    /// Value of declared variable `name` for the current group.
    fn resolve(&self, name: &str) -> MaskResult<Value>;

    /// Weak resolution handle, for implementations that hand one to their scopes.
    fn proxy(&self) -> Option<CallbackProxy> {
        None
    }

    fn stats(&self) -> SubsetCacheStats {
        SubsetCacheStats::default()
    }
}

pub struct GroupedBindings {
    active: Scope,
    resolved: Scope,
    resolver: Rc<GroupResolver>,
    proxy: CallbackProxy,
    variables: Variables,
}

impl GroupedBindings {
    pub fn new(dataset: Rc<dyn Dataset>, variables: Variables, parent: &Scope) -> Self {
        let resolver = Rc::new(GroupResolver::new(SubsetCache::new(
            dataset,
            variables.clone(),
        )));
        let proxy = CallbackProxy::new(&resolver);

        let active = Scope::lazy(
            variables.names().iter().cloned(),
            Rc::new(proxy.clone()),
            Some(parent),
        );
        let resolved = Scope::child(&active);

        resolver.clear();
        resolver.set_target(resolved.clone());
        log::debug!("grouped bindings for {} variables", variables.len());

        Self {
            active,
            resolved,
            resolver,
            proxy,
            variables,
        }
    }

    pub fn resolver(&self) -> &GroupResolver {
        &self.resolver
    }

    pub fn current_index(&self) -> Option<SlicingIndex> {
        self.resolver.current_index()
    }
}

impl Bindings for GroupedBindings {
    fn update(&self, index: &SlicingIndex) {
        self.resolver.install(index);
    }

    fn bottom(&self) -> &Scope {
        &self.resolved
    }

    fn top(&self) -> &Scope {
        &self.active
    }

    fn variables(&self) -> &Variables {
        &self.variables
    }

    fn resolve(&self, name: &str) -> MaskResult<Value> {
        self.resolver.subset(name)
    }

    fn proxy(&self) -> Option<CallbackProxy> {
        Some(self.proxy.clone())
    }

    fn stats(&self) -> SubsetCacheStats {
        self.resolver.stats()
    }
}

impl Drop for GroupedBindings {
    fn drop(&mut self) {
        // Escaped closures may still hold the resolved frame; after this they reach the dead proxy.
        self.resolver.clear();
        log::debug!("dropped grouped bindings");
    }
}

impl fmt::Debug for GroupedBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupedBindings")
            .field("variables", &self.variables.names())
            .field("resolver", &self.resolver)
            .finish()
    }
}

pub struct NaturalBindings {
    scope: Scope,
    variables: Variables,
}

impl NaturalBindings {
    pub fn new(dataset: &dyn Dataset, variables: Variables, parent: &Scope) -> MaskResult<Self> {
        let scope = Scope::child(parent);
        for (pos, name) in variables.names().iter().enumerate() {
            scope.define(name.clone(), whole_column(dataset, variables.column_at(pos))?);
        }
        log::debug!("natural bindings for {} variables", variables.len());
        Ok(Self { scope, variables })
    }
}

impl Bindings for NaturalBindings {
    fn update(&self, _index: &SlicingIndex) {}

    fn bottom(&self) -> &Scope {
        &self.scope
    }

    fn top(&self) -> &Scope {
        &self.scope
    }

    fn variables(&self) -> &Variables {
        &self.variables
    }

    fn resolve(&self, name: &str) -> MaskResult<Value> {
        if !self.variables.contains(name) {
            return Err(MaskError::UndeclaredVariable(name.to_string()));
        }
        self.scope
            .get_local(name)?
            .ok_or_else(|| MaskError::UndeclaredVariable(name.to_string()))
    }
}

impl fmt::Debug for NaturalBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NaturalBindings")
            .field("variables", &self.variables.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InMemoryDataset;

    fn dataset() -> Rc<dyn Dataset> {
        Rc::new(
            InMemoryDataset::from_columns([
                ("g", vec![Value::from("a"), Value::from("b"), Value::from("a")]),
                ("x", vec![Value::from(1), Value::from(2), Value::from(3)]),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn grouped_scopes_are_chained_resolved_over_active() {
        let parent = Scope::root();
        let data = dataset();
        let bindings = GroupedBindings::new(data.clone(), Variables::all(data.as_ref()), &parent);

        assert!(bindings.bottom().parent().unwrap().ptr_eq(bindings.top()));
        assert!(bindings.top().parent().unwrap().ptr_eq(&parent));
        assert_eq!(bindings.top().local_names(), vec!["g", "x"]);
        assert!(bindings.bottom().local_names().is_empty());
    }

    #[test]
    fn forcing_through_active_caches_into_resolved() {
        let parent = Scope::root();
        let data = dataset();
        let bindings = GroupedBindings::new(data.clone(), Variables::all(data.as_ref()), &parent);
        bindings.update(&SlicingIndex::grouped(0, vec![0, 2]));

        let x = bindings.bottom().get("x").unwrap().unwrap();
        assert_eq!(x, Value::from(vec![Value::from(1), Value::from(3)]));
        assert!(bindings.bottom().contains_local("x"));
        assert_eq!(bindings.stats().materialized, 1);

        // Second lookup stops at the resolved frame.
        bindings.bottom().get("x").unwrap();
        assert_eq!(bindings.stats().materialized, 1);
        assert_eq!(bindings.resolver().cached_len(), 1);
        assert_eq!(
            bindings.current_index(),
            Some(SlicingIndex::grouped(0, vec![0, 2]))
        );

        bindings.update(&SlicingIndex::grouped(1, vec![1]));
        assert!(!bindings.bottom().contains_local("x"));
    }

    #[test]
    fn natural_bindings_share_one_scope() {
        let parent = Scope::root();
        let data = dataset();
        let bindings =
            NaturalBindings::new(data.as_ref(), Variables::all(data.as_ref()), &parent).unwrap();

        assert!(bindings.bottom().ptr_eq(bindings.top()));
        assert!(bindings.proxy().is_none());
        assert_eq!(
            bindings.resolve("x").unwrap(),
            Value::from(vec![Value::from(1), Value::from(2), Value::from(3)])
        );
        bindings.update(&SlicingIndex::natural(3));
        assert_eq!(bindings.resolve("x").unwrap().len(), 3);
    }
}
