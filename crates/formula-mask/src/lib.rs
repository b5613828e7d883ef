#![forbid(unsafe_code)]

mod bindings;
mod cache;
mod dataset;
mod eval;
mod index;
mod mask;
mod proxy;
mod scope;
mod value;

pub use crate::mask::{DataMask, Evaluator, MaskOptions};
pub use crate::value::{Pronoun, Value};

pub use crate::bindings::{Bindings, GroupedBindings, NaturalBindings};
pub use crate::cache::{SubsetCache, SubsetCacheStats};
pub use crate::dataset::{Dataset, InMemoryDataset};
pub use crate::index::{DataShape, SlicingIndex, Variables};
pub use crate::proxy::{CallbackProxy, GroupResolver, Resolution, Resolve};
pub use crate::scope::{Binding, Scope};

pub use crate::eval::{BinaryOp, Closure, EvalError, EvalResult, Expr, Interpreter, UnaryOp};

pub use crate::mask::{MaskError, MaskResult};
