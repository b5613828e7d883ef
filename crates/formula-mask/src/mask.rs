//! The data mask: per-group expression evaluation over a partitioned dataset.
//!
//! A [`DataMask`] is built once per evaluation session. For each group the caller hands it an
//! expression and the group's [`SlicingIndex`]; column names referenced by the expression resolve
//! to that group's rows only. Subsets are gathered lazily the first time a name is forced for a
//! group and reused until the next group is installed.
//!
//! ```text
//!   evaluation scope   .data  .env  ..group_size  ..group_number  (+ whatever the expression defines)
//!        |
//!   bottom()           resolved subsets for the current group
//!        |
//!   top()              lazy column bindings  --CallbackProxy (weak)-->  GroupResolver --> SubsetCache
//!        |
//!   parent             caller's scope
//! ```
//!
//! Ungrouped data skips the lazy layer: `bottom()` and `top()` are the same eagerly populated
//! scope.
use crate::bindings::{Bindings, GroupedBindings, NaturalBindings};
use crate::cache::SubsetCacheStats;
use crate::dataset::Dataset;
use crate::index::{DataShape, SlicingIndex, Variables};
use crate::proxy::CallbackProxy;
use crate::scope::Scope;
use crate::value::{Pronoun, Value};
use std::fmt;
use std::rc::Rc;

pub type MaskResult<T> = Result<T, MaskError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MaskError {
    #[error("undeclared variable: {0}")]
    UndeclaredVariable(String),

    #[error("no group index has been installed")]
    NoCurrentGroup,

    #[error("row {row} out of bounds for dataset with {row_count} rows")]
    RowOutOfBounds { row: usize, row_count: usize },

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("duplicate column: {column}")]
    DuplicateColumn { column: String },

    #[error("column length mismatch for {column}: expected {expected} values, got {actual}")]
    ColumnLengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("duplicate variable: {0}")]
    DuplicateVariable(String),
}

/// The expression engine a mask delegates to.
///
/// The mask never inspects expressions or engine errors; `eval` results are returned to the
/// caller of [`DataMask::evaluate`] untouched.
pub trait Evaluator {
    type Expr;
    type Error;

    fn eval(&self, expr: &Self::Expr, scope: &Scope) -> Result<Value, Self::Error>;
}

/// Names the mask defines into its evaluation scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaskOptions {
    pub data_pronoun: String,
    pub env_pronoun: String,
    /// Whether to bind `env_pronoun` at all.
    pub expose_env_pronoun: bool,
    pub group_size_var: String,
    pub group_number_var: String,
}

impl Default for MaskOptions {
    fn default() -> Self {
        Self {
            data_pronoun: ".data".to_string(),
            env_pronoun: ".env".to_string(),
            expose_env_pronoun: true,
            group_size_var: "..group_size".to_string(),
            group_number_var: "..group_number".to_string(),
        }
    }
}

impl MaskOptions {
    fn reserved(&self) -> [&str; 4] {
        [
            self.data_pronoun.as_str(),
            self.env_pronoun.as_str(),
            self.group_size_var.as_str(),
            self.group_number_var.as_str(),
        ]
    }
}

pub struct DataMask<E> {
    bindings: Box<dyn Bindings>,
    scope: Scope,
    options: MaskOptions,
    evaluator: E,
}

impl<E: Evaluator> DataMask<E> {
    pub fn new(
        dataset: Rc<dyn Dataset>,
        variables: Variables,
        shape: DataShape,
        parent: &Scope,
        evaluator: E,
    ) -> MaskResult<Self> {
        Self::with_options(
            dataset,
            variables,
            shape,
            parent,
            evaluator,
            MaskOptions::default(),
        )
    }

    pub fn with_options(
        dataset: Rc<dyn Dataset>,
        variables: Variables,
        shape: DataShape,
        parent: &Scope,
        evaluator: E,
        options: MaskOptions,
    ) -> MaskResult<Self> {
        let bindings: Box<dyn Bindings> = match shape {
            DataShape::Ungrouped => Box::new(NaturalBindings::new(
                dataset.as_ref(),
                variables,
                parent,
            )?),
            DataShape::Grouped | DataShape::Rowwise => {
                Box::new(GroupedBindings::new(dataset, variables, parent))
            }
        };

        let scope = Scope::child(bindings.bottom());
        scope.define(
            options.data_pronoun.clone(),
            Value::Pronoun(Pronoun::Data(bindings.top().clone())),
        );
        if options.expose_env_pronoun {
            scope.define(
                options.env_pronoun.clone(),
                Value::Pronoun(Pronoun::Env(parent.clone())),
            );
        }
        log::debug!("data mask ({shape:?}) over {} variables", bindings.variables().len());

        Ok(Self {
            bindings,
            scope,
            options,
            evaluator,
        })
    }

    /// Evaluate `expr` with column names bound to the rows of `index`.
    ///
    /// Errors raised by the evaluator are returned unchanged. The evaluation scope is reused
    /// across groups, so bindings the expression defines persist until [`DataMask::clear_scope`].
    pub fn evaluate(&self, expr: &E::Expr, index: &SlicingIndex) -> Result<Value, E::Error> {
        self.bindings.update(index);

        self.scope
            .define(self.options.group_size_var.clone(), Value::from(index.size()));
        self.scope.define(
            self.options.group_number_var.clone(),
            Value::from(index.group() + 1),
        );

        self.evaluator.eval(expr, &self.scope)
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }
}

impl<E> DataMask<E> {
    /// Value of declared variable `name` for the most recently installed group.
    pub fn resolve(&self, name: &str) -> MaskResult<Value> {
        self.bindings.resolve(name)
    }

    /// Weak resolution handle; `None` for ungrouped masks, which have no lazy bindings.
    pub fn proxy(&self) -> Option<CallbackProxy> {
        self.bindings.proxy()
    }

    /// Remove everything evaluated expressions defined into the evaluation scope, keeping the
    /// pronouns and group metadata.
    pub fn clear_scope(&self) {
        let reserved = self.options.reserved();
        for name in self.scope.local_names() {
            if !reserved.contains(&name.as_str()) {
                self.scope.remove(&name);
            }
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn bindings(&self) -> &dyn Bindings {
        self.bindings.as_ref()
    }

    pub fn variables(&self) -> &Variables {
        self.bindings.variables()
    }

    pub fn options(&self) -> &MaskOptions {
        &self.options
    }

    pub fn stats(&self) -> SubsetCacheStats {
        self.bindings.stats()
    }
}

impl<E> Drop for DataMask<E> {
    fn drop(&mut self) {
        // A closure stored in the evaluation scope captures a scope at or below it, which would
        // keep the whole chain (and the caller's parent) alive through an `Rc` cycle.
        let mut released = 0;
        for name in self.scope.local_names() {
            if let Some(Value::Function(closure)) = self.scope.peek(&name) {
                if closure.captures(&self.scope) {
                    self.scope.remove(&name);
                    released += 1;
                }
            }
        }
        log::debug!("dropped data mask ({released} closures released)");
    }
}

impl<E> fmt::Debug for DataMask<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataMask")
            .field("bindings", &self.bindings)
            .field("scope", &self.scope)
            .finish()
    }
}
