//! A small tree-walking evaluator usable as the mask's expression engine.
//!
//! Expressions are built directly as [`Expr`] trees; there is no parser. Semantics follow the
//! usual data-frame conventions: column references evaluate to vectors, arithmetic and
//! comparisons work elementwise with length-1 recycling, and aggregates collapse a vector to a
//! scalar.
use crate::mask::{Evaluator, MaskError, MaskOptions};
use crate::scope::Scope;
use crate::value::{Pronoun, Value};
use ordered_float::OrderedFloat;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Null,
    Number(f64),
    Text(String),
    Boolean(bool),
    Symbol(String),
    /// `pronoun$name`, e.g. `.data$x`.
    Pronoun {
        pronoun: String,
        name: String,
    },
    /// Bind `name` in the scope the expression is evaluated in.
    Assign {
        name: String,
        value: Box<Expr>,
    },
    Block(Vec<Expr>),
    /// A closure over the scope it is evaluated in.
    Function {
        params: Vec<String>,
        body: Rc<Expr>,
    },
    Apply {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// Call a function bound in scope, or a builtin.
    Call {
        name: String,
        args: Vec<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    And,
    Or,
}

impl Expr {
    pub fn symbol(name: impl Into<String>) -> Self {
        Expr::Symbol(name.into())
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            name: name.into(),
            args,
        }
    }

    pub fn data(name: impl Into<String>) -> Self {
        Expr::Pronoun {
            pronoun: ".data".into(),
            name: name.into(),
        }
    }

    pub fn assign(name: impl Into<String>, value: Expr) -> Self {
        Expr::Assign {
            name: name.into(),
            value: Box::new(value),
        }
    }

    pub fn function(params: Vec<&str>, body: Expr) -> Self {
        Expr::Function {
            params: params.into_iter().map(String::from).collect(),
            body: Rc::new(body),
        }
    }

    pub fn apply(callee: Expr, args: Vec<Expr>) -> Self {
        Expr::Apply {
            callee: Box::new(callee),
            args,
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

/// A function value: parameters and body plus the scope it was created in.
#[derive(Clone)]
pub struct Closure {
    params: Rc<[String]>,
    body: Rc<Expr>,
    env: Scope,
}

impl Closure {
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn env(&self) -> &Scope {
        &self.env
    }

    pub fn ptr_eq(&self, other: &Closure) -> bool {
        Rc::ptr_eq(&self.body, &other.body) && self.env.ptr_eq(&other.env)
    }

    /// Whether `scope` is the closure's environment or one of its ancestors.
    pub fn captures(&self, scope: &Scope) -> bool {
        let mut current = Some(&self.env);
        while let Some(env) = current {
            if env.ptr_eq(scope) {
                return true;
            }
            current = env.parent();
        }
        false
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

pub type EvalResult<T> = Result<T, EvalError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("object '{0}' not found")]
    UndefinedVariable(String),

    #[error("column `{name}` not found in `{pronoun}`")]
    PronounLookup { pronoun: String, name: String },

    #[error("could not find function \"{0}\"")]
    UnknownFunction(String),

    #[error("{name}: expected {expected} arguments, got {actual}")]
    Arity {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("type error: {0}")]
    Type(String),

    #[error(transparent)]
    Mask(#[from] MaskError),
}

#[derive(Clone, Debug)]
pub struct Interpreter {
    group_size_var: String,
    group_number_var: String,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::for_options(&MaskOptions::default())
    }

    /// An interpreter whose `n()` / `cur_group_id()` read the metadata names in `options`.
    pub fn for_options(options: &MaskOptions) -> Self {
        Self {
            group_size_var: options.group_size_var.clone(),
            group_number_var: options.group_number_var.clone(),
        }
    }

    pub fn eval_expr(&self, expr: &Expr, scope: &Scope) -> EvalResult<Value> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Number(n) => Ok(Value::from(*n)),
            Expr::Text(s) => Ok(Value::from(s.as_str())),
            Expr::Boolean(b) => Ok(Value::from(*b)),
            Expr::Symbol(name) => lookup(scope, name),
            Expr::Pronoun { pronoun, name } => self.eval_pronoun(scope, pronoun, name),
            Expr::Assign { name, value } => {
                let value = self.eval_expr(value, scope)?;
                scope.define(name.clone(), value.clone());
                Ok(value)
            }
            Expr::Block(exprs) => {
                let mut last = Value::Null;
                for expr in exprs {
                    last = self.eval_expr(expr, scope)?;
                }
                Ok(last)
            }
            Expr::Function { params, body } => Ok(Value::Function(Closure {
                params: params.iter().cloned().collect(),
                body: Rc::clone(body),
                env: scope.clone(),
            })),
            Expr::Apply { callee, args } => {
                let closure = match self.eval_expr(callee, scope)? {
                    Value::Function(closure) => closure,
                    other => {
                        return Err(EvalError::Type(format!(
                            "attempt to apply non-function ({})",
                            other.type_name()
                        )))
                    }
                };
                let args = self.eval_args(args, scope)?;
                self.call_named("<anonymous>", &closure, args)
            }
            Expr::Call { name, args } => {
                // Column bindings are never functions; leave them unforced.
                if let Some(Value::Function(closure)) = scope.peek(name) {
                    let args = self.eval_args(args, scope)?;
                    return self.call_named(name, &closure, args);
                }
                let args = self.eval_args(args, scope)?;
                self.eval_builtin(name, args, scope)
            }
            Expr::UnaryOp { op, expr } => {
                let value = self.eval_expr(expr, scope)?;
                map_elements(&value, |v| match op {
                    UnaryOp::Negate => Ok(Value::from(-coerce_number(v)?)),
                    UnaryOp::Not => Ok(Value::from(!coerce_bool(v)?)),
                })
            }
            Expr::BinaryOp { op, left, right } => {
                let left = self.eval_expr(left, scope)?;
                let right = self.eval_expr(right, scope)?;
                eval_binary(*op, &left, &right)
            }
        }
    }

    /// Invoke a closure, typically one that escaped an earlier evaluation.
    pub fn call(&self, closure: &Closure, args: Vec<Value>) -> EvalResult<Value> {
        self.call_named("<anonymous>", closure, args)
    }

    fn call_named(&self, name: &str, closure: &Closure, args: Vec<Value>) -> EvalResult<Value> {
        if args.len() != closure.params.len() {
            return Err(EvalError::Arity {
                name: name.to_string(),
                expected: closure.params.len(),
                actual: args.len(),
            });
        }
        let frame = Scope::child(&closure.env);
        for (param, arg) in closure.params.iter().zip(args) {
            frame.define(param.clone(), arg);
        }
        self.eval_expr(&closure.body, &frame)
    }

    fn eval_args(&self, args: &[Expr], scope: &Scope) -> EvalResult<Vec<Value>> {
        args.iter().map(|arg| self.eval_expr(arg, scope)).collect()
    }

    fn eval_pronoun(&self, scope: &Scope, pronoun: &str, name: &str) -> EvalResult<Value> {
        let p = match lookup(scope, pronoun)? {
            Value::Pronoun(p) => p,
            other => {
                return Err(EvalError::Type(format!(
                    "`{pronoun}` is a {}, not a pronoun",
                    other.type_name()
                )))
            }
        };
        let found = match &p {
            Pronoun::Data(columns) => columns.get_local(name)?,
            Pronoun::Env(env) => env.get(name)?,
        };
        found.ok_or_else(|| EvalError::PronounLookup {
            pronoun: pronoun.to_string(),
            name: name.to_string(),
        })
    }

    fn eval_builtin(&self, name: &str, args: Vec<Value>, scope: &Scope) -> EvalResult<Value> {
        match name {
            "n" => {
                expect_arity(name, &args, 0)?;
                lookup(scope, &self.group_size_var)
            }
            "cur_group_id" => {
                expect_arity(name, &args, 0)?;
                lookup(scope, &self.group_number_var)
            }
            "c" => {
                let mut out = Vec::new();
                for arg in &args {
                    out.extend(arg.elements().cloned());
                }
                Ok(Value::from(out))
            }
            "length" => {
                let [x] = one_arg(name, &args)?;
                Ok(Value::from(x.len()))
            }
            "first" => {
                let [x] = one_arg(name, &args)?;
                Ok(x.elements().next().cloned().unwrap_or(Value::Null))
            }
            "sum" => {
                let [x] = one_arg(name, &args)?;
                match numbers(x)? {
                    Some(values) => Ok(Value::from(values.iter().sum::<f64>())),
                    None => Ok(Value::Null),
                }
            }
            "mean" => {
                let [x] = one_arg(name, &args)?;
                match numbers(x)? {
                    Some(values) if !values.is_empty() => Ok(Value::from(
                        values.iter().sum::<f64>() / values.len() as f64,
                    )),
                    _ => Ok(Value::Null),
                }
            }
            "min" | "max" => {
                let [x] = one_arg(name, &args)?;
                let Some(values) = numbers(x)? else {
                    return Ok(Value::Null);
                };
                let folded = if name == "min" {
                    values.into_iter().reduce(f64::min)
                } else {
                    values.into_iter().reduce(f64::max)
                };
                Ok(folded.map(Value::from).unwrap_or(Value::Null))
            }
            "n_distinct" => {
                let [x] = one_arg(name, &args)?;
                let mut seen = HashSet::new();
                for value in x.elements() {
                    seen.insert(DistinctKey::try_from(value)?);
                }
                Ok(Value::from(seen.len()))
            }
            _ => Err(EvalError::UnknownFunction(name.to_string())),
        }
    }
}

impl Evaluator for Interpreter {
    type Expr = Expr;
    type Error = EvalError;

    fn eval(&self, expr: &Expr, scope: &Scope) -> EvalResult<Value> {
        self.eval_expr(expr, scope)
    }
}

fn lookup(scope: &Scope, name: &str) -> EvalResult<Value> {
    scope
        .get(name)?
        .ok_or_else(|| EvalError::UndefinedVariable(name.to_string()))
}

fn expect_arity(name: &str, args: &[Value], expected: usize) -> EvalResult<()> {
    if args.len() != expected {
        return Err(EvalError::Arity {
            name: name.to_string(),
            expected,
            actual: args.len(),
        });
    }
    Ok(())
}

fn one_arg<'a>(name: &str, args: &'a [Value]) -> EvalResult<[&'a Value; 1]> {
    expect_arity(name, args, 1)?;
    Ok([&args[0]])
}

fn coerce_number(value: &Value) -> EvalResult<f64> {
    value
        .as_number()
        .ok_or_else(|| EvalError::Type(format!("expected a number, got {}", value.type_name())))
}

fn coerce_bool(value: &Value) -> EvalResult<bool> {
    match value {
        Value::Boolean(b) => Ok(*b),
        Value::Number(n) => Ok(*n != 0.0),
        other => Err(EvalError::Type(format!(
            "expected a boolean, got {}",
            other.type_name()
        ))),
    }
}

/// Numeric elements of `value`, or `None` if any element is null.
fn numbers(value: &Value) -> EvalResult<Option<Vec<f64>>> {
    let mut out = Vec::with_capacity(value.len());
    for element in value.elements() {
        if element.is_null() {
            return Ok(None);
        }
        out.push(coerce_number(element)?);
    }
    Ok(Some(out))
}

fn map_elements(value: &Value, f: impl Fn(&Value) -> EvalResult<Value>) -> EvalResult<Value> {
    match value {
        Value::Vector(items) => Ok(Value::from(
            items.iter().map(f).collect::<EvalResult<Vec<_>>>()?,
        )),
        Value::Null => Err(EvalError::Type("operand is null".into())),
        scalar => f(scalar),
    }
}

fn eval_binary(op: BinaryOp, left: &Value, right: &Value) -> EvalResult<Value> {
    if left.is_null() || right.is_null() {
        return Err(EvalError::Type(format!("{op:?} applied to null")));
    }
    let vectorized = matches!(left, Value::Vector(_)) || matches!(right, Value::Vector(_));
    let lhs: Vec<&Value> = left.elements().collect();
    let rhs: Vec<&Value> = right.elements().collect();
    let len = match (lhs.len(), rhs.len()) {
        (a, b) if a == b => a,
        (1, b) => b,
        (a, 1) => a,
        (a, b) => {
            return Err(EvalError::Type(format!(
                "{op:?}: operand lengths {a} and {b} are not compatible"
            )))
        }
    };

    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let l = lhs[if lhs.len() == 1 { 0 } else { i }];
        let r = rhs[if rhs.len() == 1 { 0 } else { i }];
        out.push(eval_scalar_binary(op, l, r)?);
    }

    if vectorized {
        Ok(Value::from(out))
    } else {
        Ok(out.pop().unwrap_or(Value::Null))
    }
}

fn eval_scalar_binary(op: BinaryOp, left: &Value, right: &Value) -> EvalResult<Value> {
    match op {
        BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide => {
            let l = coerce_number(left)?;
            let r = coerce_number(right)?;
            Ok(Value::from(match op {
                BinaryOp::Add => l + r,
                BinaryOp::Subtract => l - r,
                BinaryOp::Multiply => l * r,
                BinaryOp::Divide => l / r,
                _ => unreachable!(),
            }))
        }
        BinaryOp::And | BinaryOp::Or => {
            let l = coerce_bool(left)?;
            let r = coerce_bool(right)?;
            Ok(Value::from(match op {
                BinaryOp::And => l && r,
                _ => l || r,
            }))
        }
        BinaryOp::Equals
        | BinaryOp::NotEquals
        | BinaryOp::Less
        | BinaryOp::LessEquals
        | BinaryOp::Greater
        | BinaryOp::GreaterEquals => {
            let ordering = match (left, right) {
                (Value::Text(a), Value::Text(b)) => a.cmp(b),
                _ => {
                    let l = coerce_number(left)?;
                    let r = coerce_number(right)?;
                    l.partial_cmp(&r).ok_or_else(|| {
                        EvalError::Type("comparison with NaN is undefined".into())
                    })?
                }
            };
            Ok(Value::from(match op {
                BinaryOp::Equals => ordering.is_eq(),
                BinaryOp::NotEquals => ordering.is_ne(),
                BinaryOp::Less => ordering.is_lt(),
                BinaryOp::LessEquals => ordering.is_le(),
                BinaryOp::Greater => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DistinctKey {
    Null,
    Boolean(bool),
    Number(OrderedFloat<f64>),
    Text(Arc<str>),
}

impl TryFrom<&Value> for DistinctKey {
    type Error = EvalError;

    fn try_from(value: &Value) -> EvalResult<Self> {
        match value {
            Value::Null => Ok(DistinctKey::Null),
            Value::Boolean(b) => Ok(DistinctKey::Boolean(*b)),
            Value::Number(n) => Ok(DistinctKey::Number(OrderedFloat(*n))),
            Value::Text(s) => Ok(DistinctKey::Text(Arc::clone(s))),
            other => Err(EvalError::Type(format!(
                "n_distinct: unsupported element type {}",
                other.type_name()
            ))),
        }
    }
}
