//! Compiled rule graphs with a lazy, memoized async execution engine.
//!
//! Rule source is parsed into a [`Program`], compiled against a
//! [`FunctionRegistry`] into an immutable [`Executable`], and run once per
//! event as an [`Execution`]. Features are computed on demand, at most once
//! per execution. Statements never act directly: they queue callbacks on the
//! execution's [`Manipulator`], which the host drains when it is ready.
//!
//! ```
//! use std::sync::Arc;
//! use sqrl::{Context, ExecuteOptions, Executable, FunctionRegistry, SimpleManipulator, Value};
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
//! # rt.block_on(async {
//! let registry = FunctionRegistry::with_stdlib().unwrap();
//! let exe = Executable::from_source(
//!     r#"
//!     LET Amount := input();
//!     LET Large := not(eq(Amount, 0));
//!     WHEN Large THEN log("large amount {}", Amount);
//!     "#,
//!     &registry,
//! )
//! .unwrap();
//!
//! let manipulator = Arc::new(SimpleManipulator::new());
//! let execution = exe
//!     .execute(
//!         Context::new(),
//!         ExecuteOptions::new()
//!             .input("Amount", 500_i64)
//!             .manipulator(manipulator.clone()),
//!     )
//!     .unwrap();
//! assert_eq!(execution.fetch_feature("Large").await, Ok(Value::Bool(true)));
//! execution.run_statements().await.unwrap();
//! assert_eq!(manipulator.pending_callbacks(), 1);
//! # });
//! ```

mod compile;
mod config;
mod error;
mod execute;
mod log;
mod manipulator;
mod parse;
mod registry;
#[cfg(feature = "binary-cache")]
pub mod serial;
mod types;

pub use compile::CompileState;
pub use config::{ConfigError, DEFAULT_MAX_TRANSFORM_DEPTH, EngineConfig, UnknownInputPolicy};
pub use error::SqrlError;
pub use execute::{Execution, FunctionContext};
pub use log::{LogLevel, LogProps, LogRecord, LogSink, TracingSink, format_message};
pub use manipulator::{
    Callback, CallbackPolicy, ErrorProps, Manipulator, ManipulatorError, RecordedError,
    SimpleManipulator, callback,
};
pub use parse::{ParseError, parse};
pub use registry::{
    ArgSpec, ArgType, AsyncFunction, CallTransform, CustomTransform, FunctionEntry, FunctionKind,
    FunctionOptions, FunctionRegistry, FunctionSummary, LOG_STATEMENTS, PackageModule,
    RESERVED_PREFIX, RegisterHook, StatementFunction, StatementFuture, SyncFunction, ValueFuture,
};
pub use types::{
    Ast, CallNode, CompileError, CompiledGraph, Context, CustomNode, Definition, Entity,
    Executable, ExecuteOptions, ExecutionError, ExecutionReport, FunctionError, Program,
    ProgramBuilder, RegistryError, Slot, SlotExpr, SlotKind, SourcePrinter, SqrlKey, Value, call,
    constant, custom, feature, list,
};
