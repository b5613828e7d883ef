use crate::eval::Closure;
use crate::scope::Scope;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// A value flowing through a data mask: a scalar, a materialized column subset, a pronoun, or a
/// closure produced by the evaluator.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(f64),
    Text(Arc<str>),
    Vector(Rc<[Value]>),
    Pronoun(Pronoun),
    Function(Closure),
}

/// Structured access to a scope (`.data$x`, `.env$x`).
#[derive(Clone, Debug)]
pub enum Pronoun {
    /// Columns of the current group, backed by the binding layer's outermost scope.
    Data(Scope),
    /// The caller's environment the mask was layered on top of.
    Env(Scope),
}

impl Pronoun {
    pub fn scope(&self) -> &Scope {
        match self {
            Pronoun::Data(scope) | Pronoun::Env(scope) => scope,
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::Vector(_) => "vector",
            Value::Pronoun(_) => "pronoun",
            Value::Function(_) => "function",
        }
    }

    /// Number of elements: vectors report their length, `Null` is empty, everything else is a
    /// single element.
    pub fn len(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Vector(items) => items.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[Value]> {
        match self {
            Value::Vector(items) => Some(items),
            _ => None,
        }
    }

    /// Iterate over the elements, treating a scalar as a one-element vector.
    pub fn elements(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Value::Null => Box::new(std::iter::empty()),
            Value::Vector(items) => Box::new(items.iter()),
            other => Box::new(std::iter::once(other)),
        }
    }

    /// Whether two values share the same vector storage.
    pub fn shares_storage(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Vector(a), Value::Vector(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a == b,
            (Value::Pronoun(a), Value::Pronoun(b)) => match (a, b) {
                (Pronoun::Data(a), Pronoun::Data(b)) | (Pronoun::Env(a), Pronoun::Env(b)) => {
                    a.ptr_eq(b)
                }
                _ => false,
            },
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Vector(items) => {
                f.write_str("c(")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Value::Pronoun(Pronoun::Data(_)) => f.write_str("<pronoun .data>"),
            Value::Pronoun(Pronoun::Env(_)) => f.write_str("<pronoun .env>"),
            Value::Function(closure) => write!(f, "<function({})>", closure.params().join(", ")),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(Arc::from(value))
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::Vector(Rc::from(values))
    }
}
