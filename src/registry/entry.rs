use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;

use crate::compile::CompileState;
use crate::execute::FunctionContext;
use crate::types::{Ast, CallNode, CompileError, CustomNode, FunctionError, Value};

pub type ValueFuture = BoxFuture<'static, Result<Value, FunctionError>>;
pub type StatementFuture = BoxFuture<'static, Result<(), FunctionError>>;

pub type AsyncFunction = Arc<dyn Fn(FunctionContext, Vec<Value>) -> ValueFuture + Send + Sync>;
pub type SyncFunction =
    Arc<dyn Fn(&FunctionContext, &[Value]) -> Result<Value, FunctionError> + Send + Sync>;
pub type StatementFunction =
    Arc<dyn Fn(FunctionContext, Vec<Value>) -> StatementFuture + Send + Sync>;
pub type CustomTransform =
    Arc<dyn Fn(&CustomNode, &mut CompileState) -> Result<Ast, CompileError> + Send + Sync>;
pub type CallTransform = Arc<dyn Fn(&CallNode) -> Result<Ast, CompileError> + Send + Sync>;

/// The callable behind a catalog entry, tagged at registration time.
#[derive(Clone)]
pub enum FunctionKind {
    /// A value function that may suspend.
    Async(AsyncFunction),
    /// A value function that completes immediately.
    Sync(SyncFunction),
    /// A side-effecting statement attached to a statement feature.
    Statement {
        feature: String,
        func: StatementFunction,
    },
    /// Compile-time hook for custom call syntax.
    Custom(CustomTransform),
    /// Compile-time rewrite of a normal call site.
    Transform(CallTransform),
}

impl fmt::Debug for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionKind::Async(_) => write!(f, "Async"),
            FunctionKind::Sync(_) => write!(f, "Sync"),
            FunctionKind::Statement { feature, .. } => write!(f, "Statement({feature})"),
            FunctionKind::Custom(_) => write!(f, "Custom"),
            FunctionKind::Transform(_) => write!(f, "Transform"),
        }
    }
}

/// Shape of one declared argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    /// Any expression.
    Any,
    /// A literal value known at compile time.
    Constant,
    /// A direct feature reference.
    Feature,
}

/// Declared argument shape, checked against call sites at compile time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgSpec {
    required: Vec<ArgType>,
    optional: Vec<ArgType>,
    variadic: Option<ArgType>,
}

impl ArgSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn required(mut self, arg: ArgType) -> Self {
        self.required.push(arg);
        self
    }

    #[must_use]
    pub fn optional(mut self, arg: ArgType) -> Self {
        self.optional.push(arg);
        self
    }

    #[must_use]
    pub fn variadic(mut self, arg: ArgType) -> Self {
        self.variadic = Some(arg);
        self
    }

    /// Validate a call site's arguments against this shape.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::ArgumentMismatch`] naming the first problem.
    pub fn check(&self, function: &str, args: &[Ast]) -> Result<(), CompileError> {
        let mismatch = |message: String| CompileError::ArgumentMismatch {
            function: function.to_owned(),
            message,
        };

        if let Some(message) = self.count_mismatch(args.len()) {
            return Err(mismatch(message));
        }
        let max = self.required.len() + self.optional.len();

        let declared = self
            .required
            .iter()
            .chain(&self.optional)
            .copied()
            .chain(std::iter::repeat_n(
                self.variadic.unwrap_or(ArgType::Any),
                args.len().saturating_sub(max),
            ));
        for (position, (arg, expected)) in args.iter().zip(declared).enumerate() {
            let ok = match expected {
                ArgType::Any => true,
                ArgType::Constant => arg.is_constant(),
                ArgType::Feature => matches!(arg, Ast::Feature(_)),
            };
            if !ok {
                return Err(mismatch(format!(
                    "argument {} must be a {}, got `{arg}`",
                    position + 1,
                    expected
                )));
            }
        }
        Ok(())
    }

    /// Why `count` arguments do not fit this shape, if they do not.
    pub(crate) fn count_mismatch(&self, count: usize) -> Option<String> {
        let min = self.required.len();
        let max = min + self.optional.len();
        if count < min {
            Some(format!("expected at least {min} arguments, got {count}"))
        } else if self.variadic.is_none() && count > max {
            Some(format!("expected at most {max} arguments, got {count}"))
        } else {
            None
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgType::Any => write!(f, "any"),
            ArgType::Constant => write!(f, "constant"),
            ArgType::Feature => write!(f, "feature"),
        }
    }
}

impl fmt::Display for ArgSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.required.iter().map(ToString::to_string).collect();
        parts.extend(self.optional.iter().map(|a| format!("[{a}]")));
        if let Some(v) = self.variadic {
            parts.push(format!("{v}..."));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// Registration options shared by all `register*` operations.
#[derive(Debug, Clone, Default)]
pub struct FunctionOptions {
    pub allow_null: bool,
    pub allow_sqrl_objects: bool,
    pub pure: bool,
    pub args: Option<ArgSpec>,
    pub argstring: Option<String>,
    pub docstring: Option<String>,
}

impl FunctionOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke the function even when an argument is null.
    #[must_use]
    pub fn allow_null(mut self) -> Self {
        self.allow_null = true;
        self
    }

    /// Pass entities through without unwrapping them to their keys.
    #[must_use]
    pub fn allow_sqrl_objects(mut self) -> Self {
        self.allow_sqrl_objects = true;
        self
    }

    /// Declare the function side-effect free.
    #[must_use]
    pub fn pure(mut self) -> Self {
        self.pure = true;
        self
    }

    #[must_use]
    pub fn args(mut self, args: ArgSpec) -> Self {
        self.args = Some(args);
        self
    }

    #[must_use]
    pub fn argstring(mut self, argstring: &str) -> Self {
        self.argstring = Some(argstring.to_owned());
        self
    }

    #[must_use]
    pub fn docstring(mut self, docstring: &str) -> Self {
        self.docstring = Some(docstring.to_owned());
        self
    }
}

/// A catalog entry.
#[derive(Debug, Clone)]
pub struct FunctionEntry {
    pub name: String,
    pub package: Option<String>,
    pub kind: FunctionKind,
    pub allow_null: bool,
    pub allow_sqrl_objects: bool,
    pub pure: bool,
    pub args: Option<ArgSpec>,
    pub argstring: String,
    pub docstring: String,
}

impl FunctionEntry {
    pub(crate) fn new(
        name: &str,
        package: Option<&str>,
        kind: FunctionKind,
        options: FunctionOptions,
    ) -> Self {
        let argstring = options
            .argstring
            .or_else(|| options.args.as_ref().map(ToString::to_string))
            .unwrap_or_default();
        Self {
            name: name.to_owned(),
            package: package.map(str::to_owned),
            kind,
            allow_null: options.allow_null,
            allow_sqrl_objects: options.allow_sqrl_objects,
            pure: options.pure,
            args: options.args,
            argstring,
            docstring: options.docstring.unwrap_or_default(),
        }
    }

    /// `package.name` for package entries, `name` otherwise.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        match &self.package {
            Some(package) => format!("{package}.{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Graphs built outside the compiler reach the engine without call site
    /// checks, so the declared arity is enforced again before each call.
    ///
    /// # Errors
    ///
    /// Returns a [`FunctionError`] when `count` does not fit the declared
    /// [`ArgSpec`].
    pub fn check_arity(&self, count: usize) -> Result<(), FunctionError> {
        match self.args.as_ref().and_then(|spec| spec.count_mismatch(count)) {
            Some(message) => Err(FunctionError::new(message)),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(
            self.kind,
            FunctionKind::Async(_) | FunctionKind::Statement { .. }
        )
    }

    #[must_use]
    pub fn is_statement(&self) -> bool {
        matches!(self.kind, FunctionKind::Statement { .. })
    }

    #[must_use]
    pub fn is_transform(&self) -> bool {
        matches!(self.kind, FunctionKind::Custom(_) | FunctionKind::Transform(_))
    }

    #[must_use]
    pub fn summary(&self) -> FunctionSummary {
        FunctionSummary {
            name: self.name.clone(),
            argstring: self.argstring.clone(),
            docstring: self.docstring.clone(),
            package: self.package.clone(),
        }
    }
}

/// Public listing of a catalog entry, as returned by
/// [`FunctionRegistry::list_functions`](super::FunctionRegistry::list_functions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionSummary {
    pub name: String,
    pub argstring: String,
    pub docstring: String,
    pub package: Option<String>,
}
