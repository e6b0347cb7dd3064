//! The side-effect boundary of an execution.
//!
//! Statements never perform visible effects directly: they enqueue
//! callbacks and record errors on the execution's [`Manipulator`]. The host
//! decides when effects happen by calling [`Manipulator::mutate`] and whether
//! the event failed by calling [`Manipulator::throw_first_error`].

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::{error, fmt};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{Context, FunctionError, SqrlKey};

/// A deferred action run by [`Manipulator::mutate`].
pub type Callback =
    Box<dyn FnOnce(Context) -> BoxFuture<'static, Result<(), FunctionError>> + Send>;

/// Box an async closure as a [`Callback`].
pub fn callback<F, Fut>(f: F) -> Callback
where
    F: FnOnce(Context) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), FunctionError>> + Send + 'static,
{
    Box::new(move |ctx: Context| -> BoxFuture<'static, Result<(), FunctionError>> {
        Box::pin(f(ctx))
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManipulatorError {
    #[error("fatal error{}: {message}", in_function(function_name.as_deref()))]
    Fatal {
        function_name: Option<String>,
        message: String,
    },
}

fn in_function(name: Option<&str>) -> String {
    name.map(|n| format!(" in '{n}'")).unwrap_or_default()
}

/// Flags attached to [`Manipulator::log_error`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorProps {
    pub function_name: Option<String>,
    pub fatal: bool,
}

impl ErrorProps {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn function_name(mut self, name: &str) -> Self {
        self.function_name = Some(name.to_owned());
        self
    }

    #[must_use]
    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

/// An error as recorded by a manipulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedError {
    pub message: String,
    pub function_name: Option<String>,
    pub fatal: bool,
}

impl RecordedError {
    fn to_error(&self) -> ManipulatorError {
        ManipulatorError::Fatal {
            function_name: self.function_name.clone(),
            message: self.message.clone(),
        }
    }
}

/// Execution-scoped effect sink, implemented per host.
#[async_trait]
pub trait Manipulator: Send + Sync {
    /// Snapshot of the output accumulated so far. The shape is up to the
    /// implementation.
    fn current_human_output(&self) -> serde_json::Value;

    /// Enqueue a deferred action. Callbacks run in enqueue order, including
    /// callbacks added while `mutate` is running.
    fn add_callback(&self, callback: Callback);

    /// Run every enqueued callback to completion, in order. Callback
    /// failures must be recorded through [`log_error`](Self::log_error).
    async fn mutate(&self, ctx: &Context) -> Result<(), ManipulatorError>;

    /// Record an error. Does not stop execution by itself.
    fn log_error(&self, err: &(dyn error::Error + Send + Sync), props: ErrorProps);

    /// Fail with the first recorded fatal error, if there is one.
    fn throw_first_error(&self) -> Result<(), ManipulatorError>;

    /// Observe an entity key passed to a statement.
    fn track_sqrl_key(&self, _key: &SqrlKey) {}
}

/// What [`SimpleManipulator::mutate`] does when a callback fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallbackPolicy {
    /// Record the failure and run the remaining callbacks.
    #[default]
    Continue,
    /// Record the failure as fatal and return it. Remaining callbacks stay
    /// queued.
    Halt,
}

/// In-memory [`Manipulator`] suitable for tests and simple hosts.
#[derive(Default)]
pub struct SimpleManipulator {
    policy: CallbackPolicy,
    callbacks: Mutex<VecDeque<Callback>>,
    errors: Mutex<Vec<RecordedError>>,
    warnings: Mutex<Vec<String>>,
    tracked: Mutex<Vec<SqrlKey>>,
    completed: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimpleManipulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_policy(policy: CallbackPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn add_warning(&self, message: impl Into<String>) {
        lock(&self.warnings).push(message.into());
    }

    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        lock(&self.warnings).clone()
    }

    #[must_use]
    pub fn errors(&self) -> Vec<RecordedError> {
        lock(&self.errors).clone()
    }

    #[must_use]
    pub fn tracked_keys(&self) -> Vec<SqrlKey> {
        lock(&self.tracked).clone()
    }

    #[must_use]
    pub fn pending_callbacks(&self) -> usize {
        lock(&self.callbacks).len()
    }

    /// Callbacks that have run successfully.
    #[must_use]
    pub fn completed_callbacks(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for SimpleManipulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleManipulator")
            .field("policy", &self.policy)
            .field("pending_callbacks", &self.pending_callbacks())
            .field("errors", &self.errors())
            .field("warnings", &self.warnings())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Manipulator for SimpleManipulator {
    fn current_human_output(&self) -> serde_json::Value {
        let tracked: Vec<String> = self.tracked_keys().iter().map(ToString::to_string).collect();
        json!({
            "errors": self.errors(),
            "warnings": self.warnings(),
            "tracked_keys": tracked,
            "callbacks": {
                "pending": self.pending_callbacks(),
                "completed": self.completed_callbacks(),
            },
        })
    }

    fn add_callback(&self, callback: Callback) {
        lock(&self.callbacks).push_back(callback);
    }

    async fn mutate(&self, ctx: &Context) -> Result<(), ManipulatorError> {
        loop {
            let next = lock(&self.callbacks).pop_front();
            let Some(callback) = next else {
                break;
            };
            match callback(ctx.clone()).await {
                Ok(()) => {
                    self.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => match self.policy {
                    CallbackPolicy::Continue => {
                        warn!(error = %err, "callback failed, continuing");
                        self.log_error(&err, ErrorProps::new());
                    }
                    CallbackPolicy::Halt => {
                        warn!(error = %err, "callback failed, halting mutate");
                        self.log_error(&err, ErrorProps::new().fatal());
                        return Err(ManipulatorError::Fatal {
                            function_name: None,
                            message: err.to_string(),
                        });
                    }
                },
            }
        }
        debug!(completed = self.completed_callbacks(), "mutate finished");
        Ok(())
    }

    fn log_error(&self, err: &(dyn error::Error + Send + Sync), props: ErrorProps) {
        lock(&self.errors).push(RecordedError {
            message: err.to_string(),
            function_name: props.function_name,
            fatal: props.fatal,
        });
    }

    fn throw_first_error(&self) -> Result<(), ManipulatorError> {
        match lock(&self.errors).iter().find(|e| e.fatal) {
            Some(first) => Err(first.to_error()),
            None => Ok(()),
        }
    }

    fn track_sqrl_key(&self, key: &SqrlKey) {
        lock(&self.tracked).push(key.clone());
    }
}
