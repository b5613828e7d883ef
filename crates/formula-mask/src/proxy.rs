//! Name resolution callbacks behind lazy column bindings.
//!
//! Lazy bindings live in scopes, and scopes can be captured by closures the evaluated expression
//! creates. Those closures may outlive the mask, so a scope must never own the resolver. The
//! mask's binding layer holds the only strong reference to its [`GroupResolver`]; scopes hold a
//! [`CallbackProxy`], which keeps a [`Weak`] reference and upgrades it for the duration of each
//! call. Once the mask is dropped the upgrade fails and the proxy answers
//! [`Resolution::Unavailable`] instead of touching freed state.
use crate::cache::{SubsetCache, SubsetCacheStats};
use crate::index::SlicingIndex;
use crate::mask::{MaskError, MaskResult};
use crate::scope::Scope;
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// Outcome of resolving a name through a lazy binding.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Value(Value),
    /// The resolver backing the binding no longer exists.
    Unavailable,
}

impl Resolution {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Resolution::Value(value) => Some(value),
            Resolution::Unavailable => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Resolution::Unavailable)
    }
}

/// Resolve a column name under the current group.
pub trait Resolve {
    fn resolve(&self, name: &str) -> MaskResult<Resolution>;
}

/// Strong-forwarding resolver: answers lookups from the subset cache using the installed index.
pub struct GroupResolver {
    cache: RefCell<SubsetCache>,
    index: RefCell<Option<SlicingIndex>>,
    /// Scope materialized subsets are defined into.
    target: RefCell<Option<Scope>>,
}

impl GroupResolver {
    pub(crate) fn new(cache: SubsetCache) -> Self {
        Self {
            cache: RefCell::new(cache),
            index: RefCell::new(None),
            target: RefCell::new(None),
        }
    }

    pub(crate) fn set_target(&self, scope: Scope) {
        *self.target.borrow_mut() = Some(scope);
    }

    /// Clear the cache, then install `index` as the current group.
    ///
    /// Nothing is materialized here; the next lookup of each variable gathers it for `index`.
    pub(crate) fn install(&self, index: &SlicingIndex) {
        let mut cache = self.cache.borrow_mut();
        self.clear_cache(&mut cache);
        let generation = cache.advance();
        *self.index.borrow_mut() = Some(index.clone());
        log::trace!(
            "installed group {} ({} rows, generation {generation})",
            index.group(),
            index.size()
        );
    }

    pub(crate) fn clear(&self) {
        let mut cache = self.cache.borrow_mut();
        self.clear_cache(&mut cache);
    }

    fn clear_cache(&self, cache: &mut SubsetCache) {
        match self.target.borrow().as_ref() {
            Some(target) => cache.clear(target),
            None => cache.clear(&Scope::root()),
        }
    }

    pub fn current_index(&self) -> Option<SlicingIndex> {
        self.index.borrow().clone()
    }

    pub fn generation(&self) -> u64 {
        self.cache.borrow().generation()
    }

    pub fn stats(&self) -> SubsetCacheStats {
        self.cache.borrow().stats()
    }

    pub fn cached_len(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Subset of `name` for the installed group.
    pub fn subset(&self, name: &str) -> MaskResult<Value> {
        if !self.cache.borrow().variables().contains(name) {
            return Err(MaskError::UndeclaredVariable(name.to_string()));
        }
        let index = self.index.borrow();
        let index = index.as_ref().ok_or(MaskError::NoCurrentGroup)?;
        let target = self.target.borrow();
        let scratch;
        let target = match target.as_ref() {
            Some(scope) => scope,
            None => {
                scratch = Scope::root();
                &scratch
            }
        };
        self.cache.borrow_mut().get(name, index, target)
    }
}

impl Resolve for GroupResolver {
    fn resolve(&self, name: &str) -> MaskResult<Resolution> {
        self.subset(name).map(Resolution::Value)
    }
}

impl fmt::Debug for GroupResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupResolver")
            .field("index", &self.index.borrow())
            .field("generation", &self.generation())
            .finish()
    }
}

/// Weak-forwarding resolver embedded in scopes whose lifetime the mask does not control.
#[derive(Clone)]
pub struct CallbackProxy {
    real: Weak<GroupResolver>,
    stale_accesses: Rc<Cell<usize>>,
}

impl CallbackProxy {
    pub(crate) fn new(real: &Rc<GroupResolver>) -> Self {
        Self {
            real: Rc::downgrade(real),
            stale_accesses: Rc::new(Cell::new(0)),
        }
    }

    /// Whether the resolver this proxy forwards to still exists.
    pub fn is_alive(&self) -> bool {
        self.real.strong_count() > 0
    }

    /// Number of lookups answered as unavailable because the resolver was gone.
    pub fn stale_accesses(&self) -> usize {
        self.stale_accesses.get()
    }
}

impl Resolve for CallbackProxy {
    fn resolve(&self, name: &str) -> MaskResult<Resolution> {
        match self.real.upgrade() {
            Some(real) => real.resolve(name),
            None => {
                self.stale_accesses.set(self.stale_accesses.get() + 1);
                log::warn!("hybrid callback proxy out of scope; `{name}` is unavailable");
                Ok(Resolution::Unavailable)
            }
        }
    }
}

impl fmt::Debug for CallbackProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackProxy")
            .field("alive", &self.is_alive())
            .field("stale_accesses", &self.stale_accesses())
            .finish()
    }
}
