//! Reference expression engine over `serde_json::Value`.
//!
//! [`Engine::build`] resolves every method name in a logic tree to a function
//! handle once, producing a [`Callable`] that evaluates per event without
//! further lookups. Methods come in three flavours:
//!
//! * **pure**: arguments are evaluated first, then the function runs;
//! * **lazy**: the function receives unevaluated arguments ([`LazyArgs`]) and
//!   decides what to evaluate, and against which datum (`and`, `if`, `each`);
//! * **async**: arguments are evaluated first, the function returns a future.
//!   Only usable through [`Engine::build_async`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use rv_lang::Logic;
use serde_json::Value;

use crate::bins::BinReducer;
use crate::error::{BuildError, EvalError};
use crate::stream::Subjects;
use crate::value::lookup_or_null;

mod builtins;

#[cfg(test)]
mod tests;

pub type EvalResult = Result<Value, EvalError>;

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Per-run evaluation scope: the host context (`$`), the innermost split
/// block's group key (`@group`) and the subjects `emit` stages publish to.
#[derive(Debug, Clone)]
pub struct Scope {
    context: Arc<Value>,
    group: Option<Value>,
    subjects: Subjects,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}

impl Scope {
    pub fn new(context: Value) -> Self {
        Self {
            context: Arc::new(context),
            group: None,
            subjects: Subjects::default(),
        }
    }

    pub fn with_subjects(mut self, subjects: Subjects) -> Self {
        self.subjects = subjects;
        self
    }

    pub fn with_group(&self, key: Value) -> Self {
        Self {
            context: Arc::clone(&self.context),
            group: Some(key),
            subjects: self.subjects.clone(),
        }
    }

    pub fn context(&self) -> &Value {
        &self.context
    }

    pub fn group(&self) -> Option<&Value> {
        self.group.as_ref()
    }

    pub fn subjects(&self) -> &Subjects {
        &self.subjects
    }
}

/// The datum `@` refers to, plus the enclosing data `@.^` ascends into.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub data: &'a Value,
    pub parent: Option<&'a Frame<'a>>,
}

impl<'a> Frame<'a> {
    pub fn root(data: &'a Value) -> Self {
        Self { data, parent: None }
    }

    fn ascend(&self, levels: usize) -> Option<&Value> {
        let mut frame = self;
        for _ in 0..levels {
            frame = frame.parent?;
        }
        Some(frame.data)
    }
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

type PureFn = dyn Fn(&[Value]) -> EvalResult + Send + Sync;
type LazyFn = dyn Fn(&LazyArgs<'_>) -> EvalResult + Send + Sync;
type AsyncFn = dyn Fn(Vec<Value>) -> BoxFuture<'static, EvalResult> + Send + Sync;

#[derive(Clone)]
pub enum Method {
    Pure(Arc<PureFn>),
    Lazy(Arc<LazyFn>),
    Async(Arc<AsyncFn>),
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Pure(_) => "Method::Pure",
            Method::Lazy(_) => "Method::Lazy",
            Method::Async(_) => "Method::Async",
        })
    }
}

/// Unevaluated arguments handed to a lazy method.
pub struct LazyArgs<'a> {
    nodes: &'a [Node],
    frame: &'a Frame<'a>,
    scope: &'a Scope,
}

impl LazyArgs<'_> {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Evaluate argument `i` against the current datum; missing arguments
    /// read as `null`.
    pub fn eval(&self, i: usize) -> EvalResult {
        match self.nodes.get(i) {
            Some(node) => node.eval(self.frame, self.scope),
            None => Ok(Value::Null),
        }
    }

    /// Evaluate argument `i` with `data` as `@`; the current datum becomes
    /// reachable as `@.^`.
    pub fn eval_in(&self, i: usize, data: &Value) -> EvalResult {
        let frame = Frame {
            data,
            parent: Some(self.frame),
        };
        match self.nodes.get(i) {
            Some(node) => node.eval(&frame, self.scope),
            None => Ok(Value::Null),
        }
    }

    pub fn scope(&self) -> &Scope {
        self.scope
    }
}

// ---------------------------------------------------------------------------
// Compiled tree
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Node {
    Const(Value),
    Var { ascend: usize, path: Vec<String> },
    Context(Vec<String>),
    Group,
    Call {
        name: String,
        method: Method,
        args: Vec<Node>,
    },
}

impl Node {
    fn eval(&self, frame: &Frame<'_>, scope: &Scope) -> EvalResult {
        match self {
            Node::Const(v) => Ok(v.clone()),
            Node::Var { ascend, path } => Ok(frame
                .ascend(*ascend)
                .map_or(Value::Null, |data| lookup_or_null(data, path))),
            Node::Context(path) => Ok(lookup_or_null(scope.context(), path)),
            Node::Group => Ok(scope.group().cloned().unwrap_or(Value::Null)),
            Node::Call { name, method, args } => match method {
                Method::Pure(f) => {
                    let values = args
                        .iter()
                        .map(|arg| arg.eval(frame, scope))
                        .collect::<Result<Vec<_>, _>>()?;
                    f(&values)
                }
                Method::Lazy(f) => f(&LazyArgs {
                    nodes: args,
                    frame,
                    scope,
                }),
                Method::Async(_) => Err(EvalError::method(
                    name,
                    "asynchronous method evaluated synchronously",
                )),
            },
        }
    }

    fn eval_async<'a>(&'a self, frame: &'a Frame<'a>, scope: &'a Scope) -> BoxFuture<'a, EvalResult> {
        async move {
            match self {
                Node::Call {
                    method: Method::Async(f),
                    args,
                    ..
                } => {
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(arg.eval_async(frame, scope).await?);
                    }
                    f(values).await
                }
                Node::Call {
                    method: Method::Pure(f),
                    args,
                    ..
                } => {
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(arg.eval_async(frame, scope).await?);
                    }
                    f(&values)
                }
                other => other.eval(frame, scope),
            }
        }
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// Callables
// ---------------------------------------------------------------------------

/// A built expression, evaluated synchronously per datum.
#[derive(Debug, Clone)]
pub struct Callable(Arc<Node>);

impl Callable {
    pub fn call(&self, data: &Value, scope: &Scope) -> EvalResult {
        self.0.eval(&Frame::root(data), scope)
    }
}

/// A built expression that may await asynchronous methods.
#[derive(Debug, Clone)]
pub struct AsyncCallable(Arc<Node>);

impl AsyncCallable {
    pub fn call(&self, data: Value, scope: Scope) -> BoxFuture<'static, EvalResult> {
        let node = Arc::clone(&self.0);
        async move {
            let frame = Frame::root(&data);
            node.eval_async(&frame, &scope).await
        }
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Engine {
    methods: HashMap<String, Method>,
}

impl Engine {
    /// An engine with no methods at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine with the standard method set installed.
    pub fn with_builtins() -> Self {
        let mut engine = Self::new();
        builtins::install(&mut engine);
        engine
    }

    /// Register (or replace) a method.
    pub fn add_method(&mut self, name: impl Into<String>, method: Method) -> &mut Self {
        self.methods.insert(name.into(), method);
        self
    }

    pub fn add_pure<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&[Value]) -> EvalResult + Send + Sync + 'static,
    {
        self.add_method(name, Method::Pure(Arc::new(f)))
    }

    pub fn add_lazy<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&LazyArgs<'_>) -> EvalResult + Send + Sync + 'static,
    {
        self.add_method(name, Method::Lazy(Arc::new(f)))
    }

    pub fn add_async<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> BoxFuture<'static, EvalResult> + Send + Sync + 'static,
    {
        self.add_method(name, Method::Async(Arc::new(f)))
    }

    /// Install `name(aggregate, {x, y}, limit?)` backed by `reducer`,
    /// replacing any method of that name.
    pub fn add_bin_reducer(&mut self, name: impl Into<String>, reducer: BinReducer) -> &mut Self {
        let name = name.into();
        let method = builtins::bin_method(&name, reducer);
        self.add_method(name, method)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Build a synchronous callable. Asynchronous methods are rejected.
    pub fn build(&self, logic: &Logic) -> Result<Callable, BuildError> {
        Ok(Callable(Arc::new(self.compile(logic, false, None)?)))
    }

    /// Build a callable that may await asynchronous methods. Asynchronous
    /// methods may not appear underneath a lazy method.
    pub fn build_async(&self, logic: &Logic) -> Result<AsyncCallable, BuildError> {
        Ok(AsyncCallable(Arc::new(self.compile(logic, true, None)?)))
    }

    /// Build and evaluate once against `data` with an empty scope.
    pub fn run(&self, logic: &Logic, data: &Value) -> Result<Value, BuildError> {
        Ok(self.build(logic)?.call(data, &Scope::default())?)
    }

    fn compile(
        &self,
        logic: &Logic,
        asynchronous: bool,
        within_lazy: Option<&str>,
    ) -> Result<Node, BuildError> {
        Ok(match logic {
            Logic::Number(n) => Node::Const(crate::value::num(*n)),
            Logic::Str(s) => Node::Const(Value::String(s.clone())),
            Logic::Bool(b) => Node::Const(Value::Bool(*b)),
            Logic::Null | Logic::Undefined => Node::Const(Value::Null),
            Logic::Var(var) => Node::Var {
                ascend: var.ascend,
                path: var.path.clone(),
            },
            Logic::Context(path) => Node::Context(path.clone()),
            Logic::Group => Node::Group,
            Logic::Call { name, args } => {
                let method = self
                    .methods
                    .get(name)
                    .cloned()
                    .ok_or_else(|| BuildError::UnknownMethod { name: name.clone() })?;
                if let Method::Async(_) = method {
                    if !asynchronous {
                        return Err(BuildError::AsyncMethod { name: name.clone() });
                    }
                    if let Some(within) = within_lazy {
                        return Err(BuildError::AsyncInLazy {
                            name: name.clone(),
                            within: within.to_string(),
                        });
                    }
                }
                let lazy = match (&method, within_lazy) {
                    (Method::Lazy(_), None) => Some(name.as_str()),
                    (_, outer) => outer,
                };
                let args = args
                    .iter()
                    .map(|arg| self.compile(arg, asynchronous, lazy))
                    .collect::<Result<Vec<_>, _>>()?;
                Node::Call {
                    name: name.clone(),
                    method,
                    args,
                }
            }
        })
    }
}
