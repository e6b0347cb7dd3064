//! Lazy, memoized evaluation of a compiled graph for one event.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_recursion::async_recursion;
use futures::future::join_all;
use tokio::sync::OnceCell;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace, warn};

use crate::log::{LogLevel, LogProps, LogRecord, LogSink};
use crate::manipulator::{ErrorProps, Manipulator};
use crate::registry::{FunctionEntry, FunctionKind};
use crate::types::{
    CompiledGraph, Context, Executable, ExecutionError, ExecutionReport, FunctionError, SlotExpr,
    SlotKind, SourcePrinter, Value,
};

type SlotResult = Result<Value, ExecutionError>;

/// One run of an [`Executable`] against one event's inputs.
///
/// Slots are computed on first request and memoized, values and errors
/// alike. Concurrent requests for the same slot share one computation.
/// Cloning is cheap and yields a handle to the same execution.
#[derive(Clone)]
pub struct Execution {
    inner: Arc<ExecutionInner>,
}

struct ExecutionInner {
    executable: Executable,
    context: Context,
    inputs: HashMap<String, Value>,
    manipulator: Option<Arc<dyn Manipulator>>,
    log_sink: Arc<dyn LogSink>,
    clock_ms: i64,
    memo: Vec<OnceCell<SlotResult>>,
    /// For each slot being computed, the slots its computation is waiting on.
    waiting: Mutex<Vec<Vec<usize>>>,
    started: Instant,
    deadline: Option<Instant>,
    timeout_ms: u64,
    timed_out: AtomicBool,
}

impl Execution {
    pub(crate) fn new(
        executable: Executable,
        context: Context,
        inputs: HashMap<String, Value>,
        manipulator: Option<Arc<dyn Manipulator>>,
        log_sink: Arc<dyn LogSink>,
        clock_ms: i64,
        feature_timeout: Option<Duration>,
    ) -> Self {
        let started = Instant::now();
        let slots = executable.graph().len();
        let memo = (0..slots).map(|_| OnceCell::new()).collect();
        Self {
            inner: Arc::new(ExecutionInner {
                executable,
                context,
                inputs,
                manipulator,
                log_sink,
                clock_ms,
                memo,
                waiting: Mutex::new(vec![Vec::new(); slots]),
                started,
                deadline: feature_timeout.and_then(|t| started.checked_add(t)),
                timeout_ms: feature_timeout
                    .map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
                timed_out: AtomicBool::new(false),
            }),
        }
    }

    /// The value of a slot in its domain form.
    ///
    /// # Errors
    ///
    /// Returns the slot's memoized failure, [`ExecutionError::UnknownFeature`]
    /// for names not in the graph, [`ExecutionError::CyclicDependency`] for
    /// slots that depend on themselves, or [`ExecutionError::FeatureTimeout`]
    /// once the feature deadline has passed. Input slots need no computation
    /// and are readable after the deadline.
    pub async fn fetch_feature(&self, name: &str) -> SlotResult {
        let index = self.index_of(name)?;
        self.resolve(index, Vec::new()).await
    }

    /// Like [`fetch_feature`](Self::fetch_feature), with entities unwrapped
    /// to their plain keys.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_feature`](Self::fetch_feature).
    pub async fn fetch_value(&self, name: &str) -> SlotResult {
        self.fetch_feature(name).await.map(Value::unwrap_sqrl)
    }

    /// Fetch several slots concurrently, returning values in request order.
    ///
    /// # Errors
    ///
    /// The first failure in request order.
    pub async fn fetch_features(&self, names: &[&str]) -> Result<Vec<Value>, ExecutionError> {
        join_all(names.iter().map(|name| self.fetch_feature(name)))
            .await
            .into_iter()
            .collect()
    }

    /// Resolve every statement feature. Statement function failures are
    /// recorded on the manipulator and do not fail this call.
    ///
    /// # Errors
    ///
    /// Engine failures such as [`ExecutionError::MissingManipulator`] or
    /// [`ExecutionError::FeatureTimeout`].
    pub async fn run_statements(&self) -> Result<(), ExecutionError> {
        let groups = self
            .graph()
            .slots()
            .enumerate()
            .filter(|(_, slot)| matches!(slot.kind, SlotKind::StatementGroup))
            .map(|(index, _)| self.resolve(index, Vec::new()));
        join_all(groups)
            .await
            .into_iter()
            .try_for_each(|result| result.map(drop))
    }

    /// Logical event time in milliseconds since the Unix epoch, fixed when
    /// the execution was created.
    #[must_use]
    pub fn clock_ms(&self) -> i64 {
        self.inner.clock_ms
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    #[must_use]
    pub fn manipulator(&self) -> Option<&Arc<dyn Manipulator>> {
        self.inner.manipulator.as_ref()
    }

    #[must_use]
    pub fn executable(&self) -> &Executable {
        &self.inner.executable
    }

    #[must_use]
    pub fn source_printer(&self) -> SourcePrinter {
        self.inner.executable.source_printer()
    }

    /// Which slots have been memoized so far, and how.
    #[must_use]
    pub fn report(&self) -> ExecutionReport {
        let graph = self.graph();
        let mut resolved = Vec::new();
        let mut failed = Vec::new();
        for (index, cell) in self.inner.memo.iter().enumerate() {
            let name = graph.slot(index).name.clone();
            match cell.get() {
                Some(Ok(_)) => resolved.push(name),
                Some(Err(err)) => failed.push((name, err.clone())),
                None => {}
            }
        }
        ExecutionReport::new(
            resolved,
            failed,
            self.inner.started.elapsed(),
            self.inner.timed_out.load(Ordering::Acquire),
        )
    }

    /// Send a record to the log sink. `props` are merged over the host
    /// context's properties.
    pub fn log(&self, level: LogLevel, props: LogProps, format: &str, params: Vec<Value>) {
        self.inner.log_sink.log(LogRecord {
            level,
            props: self.inner.context.log_props(props),
            format: format.to_owned(),
            params,
        });
    }

    pub fn trace(&self, props: LogProps, format: &str, params: Vec<Value>) {
        self.log(LogLevel::Trace, props, format, params);
    }

    pub fn debug(&self, props: LogProps, format: &str, params: Vec<Value>) {
        self.log(LogLevel::Debug, props, format, params);
    }

    pub fn info(&self, props: LogProps, format: &str, params: Vec<Value>) {
        self.log(LogLevel::Info, props, format, params);
    }

    pub fn warn(&self, props: LogProps, format: &str, params: Vec<Value>) {
        self.log(LogLevel::Warn, props, format, params);
    }

    pub fn error(&self, props: LogProps, format: &str, params: Vec<Value>) {
        self.log(LogLevel::Error, props, format, params);
    }

    pub fn fatal(&self, props: LogProps, format: &str, params: Vec<Value>) {
        self.log(LogLevel::Fatal, props, format, params);
    }

    fn graph(&self) -> &CompiledGraph {
        self.inner.executable.graph()
    }

    fn index_of(&self, name: &str) -> Result<usize, ExecutionError> {
        self.graph()
            .index_of(name)
            .ok_or_else(|| ExecutionError::UnknownFeature {
                name: name.to_owned(),
            })
    }

    fn entry(&self, function: &str) -> Result<Arc<FunctionEntry>, ExecutionError> {
        self.inner
            .executable
            .function(function)
            .cloned()
            .ok_or_else(|| ExecutionError::UnknownFunction {
                name: function.to_owned(),
            })
    }

    /// Memoized, single-flight resolution of one slot. `path` holds the
    /// slots whose computation is waiting on this request.
    #[async_recursion]
    pub(crate) async fn resolve(&self, index: usize, path: Vec<usize>) -> SlotResult {
        let cell = &self.inner.memo[index];
        if let Some(result) = cell.get() {
            return result.clone();
        }

        // Waiting on a cell this request is itself computing would never
        // complete.
        let graph = self.graph();
        if let Some(cycle) = graph.cycle_through(index) {
            return Err(ExecutionError::CyclicDependency {
                path: cycle.to_vec(),
            });
        }
        if let Some(pos) = path.iter().position(|&i| i == index) {
            let mut cycle: Vec<String> = path[pos..]
                .iter()
                .map(|&i| graph.slot(i).name.clone())
                .collect();
            cycle.push(graph.slot(index).name.clone());
            return Err(ExecutionError::CyclicDependency { path: cycle });
        }

        // A computing slot that waits on another must not close a loop of
        // waits, even when the other side was started by a separate request.
        let _edge = match path.last() {
            Some(&requester) => Some(self.wait_on(requester, index, &path)?),
            None => None,
        };
        cell.get_or_init(|| self.compute_within_deadline(index, path))
            .await
            .clone()
    }

    /// Record that `requester` waits on `target`, unless `target` is already
    /// waiting, directly or transitively, on a slot in `path`.
    fn wait_on(
        &self,
        requester: usize,
        target: usize,
        path: &[usize],
    ) -> Result<WaitEdge<'_>, ExecutionError> {
        let mut waiting = lock(&self.inner.waiting);
        if let Some(chain) = wait_chain(&waiting, target, path) {
            let graph = self.graph();
            let start = path.iter().position(|i| chain.last() == Some(i)).unwrap_or(0);
            let cycle = path[start..]
                .iter()
                .chain(&chain)
                .map(|&i| graph.slot(i).name.clone())
                .collect();
            return Err(ExecutionError::CyclicDependency { path: cycle });
        }
        waiting[requester].push(target);
        Ok(WaitEdge {
            waiting: &self.inner.waiting,
            requester,
            target,
        })
    }

    async fn compute_within_deadline(&self, index: usize, path: Vec<usize>) -> SlotResult {
        let deadline = match (self.inner.deadline, &self.graph().slot(index).kind) {
            (Some(deadline), kind) if !matches!(kind, SlotKind::Input) => deadline,
            _ => return self.compute(index, path).await,
        };
        if Instant::now() >= deadline {
            return Err(self.timeout_error(index));
        }
        match timeout_at(deadline, self.compute(index, path)).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error(index)),
        }
    }

    fn timeout_error(&self, index: usize) -> ExecutionError {
        let feature = self.graph().slot(index).name.clone();
        if !self.inner.timed_out.swap(true, Ordering::AcqRel) {
            warn!(
                feature = %feature,
                timeout_ms = self.inner.timeout_ms,
                "feature timeout exceeded, aborting remaining work"
            );
        }
        ExecutionError::FeatureTimeout {
            feature,
            timeout_ms: self.inner.timeout_ms,
        }
    }

    async fn compute(&self, index: usize, mut path: Vec<usize>) -> SlotResult {
        let slot = self.graph().slot(index);
        path.push(index);

        let result = match &slot.kind {
            SlotKind::Input => Ok(self
                .inner
                .inputs
                .get(&slot.name)
                .cloned()
                .unwrap_or_default()),
            SlotKind::Feature(expr) => match self.prefetch(&slot.deps, &path).await {
                Ok(()) => self.eval(expr, &path).await,
                Err(err) => Err(err),
            },
            SlotKind::Statement {
                condition, call, ..
            } => {
                self.run_statement(&slot.name, condition.as_ref(), call, &path)
                    .await
            }
            SlotKind::StatementGroup => self.run_group(index, &path).await,
        };

        match &result {
            Ok(_) => trace!(slot = %slot.name, "slot resolved"),
            Err(err) => debug!(slot = %slot.name, error = %err, "slot failed"),
        }
        result
    }

    /// Resolve the named slots concurrently so that evaluation afterwards
    /// only reads memoized values.
    async fn prefetch(&self, names: &[String], path: &[usize]) -> Result<(), ExecutionError> {
        let pending = names.iter().map(|name| async move {
            let index = self.index_of(name)?;
            self.resolve(index, path.to_vec()).await
        });
        join_all(pending)
            .await
            .into_iter()
            .try_for_each(|result| result.map(drop))
    }

    #[async_recursion]
    async fn eval(&self, expr: &SlotExpr, path: &[usize]) -> SlotResult {
        match expr {
            SlotExpr::Constant(value) => Ok(value.clone()),
            SlotExpr::Feature(name) => {
                let index = self.index_of(name)?;
                self.resolve(index, path.to_vec()).await
            }
            SlotExpr::List(items) => Ok(Value::List(self.eval_all(items, path).await?)),
            SlotExpr::Call { function, args } => {
                let args = self.eval_all(args, path).await?;
                self.call_value(function, args, path).await
            }
        }
    }

    async fn eval_all(&self, exprs: &[SlotExpr], path: &[usize]) -> Result<Vec<Value>, ExecutionError> {
        join_all(exprs.iter().map(|expr| self.eval(expr, path)))
            .await
            .into_iter()
            .collect()
    }

    async fn call_value(&self, function: &str, args: Vec<Value>, path: &[usize]) -> SlotResult {
        let entry = self.entry(function)?;
        entry
            .check_arity(args.len())
            .map_err(|source| ExecutionError::Function {
                function: entry.qualified_name(),
                source,
            })?;
        let Some(args) = apply_arg_policy(&entry, args) else {
            return Ok(Value::Null);
        };
        let ctx = FunctionContext::new(self.clone(), &entry, path.to_vec());
        let result = match &entry.kind {
            FunctionKind::Sync(func) => func(&ctx, &args),
            FunctionKind::Async(func) => func(ctx, args).await,
            FunctionKind::Statement { .. } | FunctionKind::Custom(_) | FunctionKind::Transform(_) => {
                return Err(ExecutionError::UnknownFunction {
                    name: function.to_owned(),
                });
            }
        };
        result.map_err(|source| ExecutionError::Function {
            function: entry.qualified_name(),
            source,
        })
    }

    async fn run_statement(
        &self,
        statement: &str,
        condition: Option<&SlotExpr>,
        call: &SlotExpr,
        path: &[usize],
    ) -> SlotResult {
        let Some(manipulator) = self.inner.manipulator.clone() else {
            return Err(ExecutionError::MissingManipulator {
                statement: statement.to_owned(),
            });
        };

        if let Some(condition) = condition {
            let mut refs = Vec::new();
            condition.collect_feature_refs(&mut refs);
            self.prefetch(&refs, path).await?;
            if !self.eval(condition, path).await?.is_truthy() {
                trace!(statement, "condition not met");
                return Ok(Value::Null);
            }
        }

        let SlotExpr::Call { function, args } = call else {
            return self.eval(call, path).await;
        };
        let mut refs = Vec::new();
        call.collect_feature_refs(&mut refs);
        self.prefetch(&refs, path).await?;
        let args = self.eval_all(args, path).await?;

        let entry = self.entry(function)?;
        let FunctionKind::Statement { func, .. } = &entry.kind else {
            return Err(ExecutionError::UnknownFunction {
                name: function.clone(),
            });
        };
        if let Err(source) = entry.check_arity(args.len()) {
            return Err(statement_failed(statement, &entry, &*manipulator, source));
        }
        for arg in &args {
            if let Value::Entity(entity) = arg {
                manipulator.track_sqrl_key(&entity.sqrl_key(self.clock_ms()));
            }
        }
        let Some(args) = apply_arg_policy(&entry, args) else {
            return Ok(Value::Null);
        };

        let ctx = FunctionContext::new(self.clone(), &entry, path.to_vec());
        match func(ctx, args).await {
            Ok(()) => Ok(Value::Null),
            Err(source) => Err(statement_failed(statement, &entry, &*manipulator, source)),
        }
    }

    /// A statement group runs all of its statements. Their function errors
    /// are already on the manipulator; anything else fails the group.
    async fn run_group(&self, index: usize, path: &[usize]) -> SlotResult {
        let statements = self.graph().dependencies(index);
        let results = join_all(
            statements
                .iter()
                .map(|&statement| self.resolve(statement, path.to_vec())),
        )
        .await;
        for result in results {
            match result {
                Ok(_) | Err(ExecutionError::Function { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(Value::Null)
    }
}

/// Statement failures are recorded on the manipulator before they fail the
/// statement slot.
fn statement_failed(
    statement: &str,
    entry: &FunctionEntry,
    manipulator: &dyn Manipulator,
    source: FunctionError,
) -> ExecutionError {
    warn!(statement, function = %entry.name, error = %source, "statement failed");
    manipulator.log_error(&source, ErrorProps::new().function_name(&entry.name));
    ExecutionError::Function {
        function: entry.qualified_name(),
        source,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Follow wait edges from `from`. Returns the slots visited up to and
/// including the first one in `path`.
fn wait_chain(waiting: &[Vec<usize>], from: usize, path: &[usize]) -> Option<Vec<usize>> {
    let mut stack = vec![vec![from]];
    let mut seen = vec![false; waiting.len()];
    while let Some(chain) = stack.pop() {
        let &slot = chain.last()?;
        if path.contains(&slot) {
            return Some(chain);
        }
        if std::mem::replace(&mut seen[slot], true) {
            continue;
        }
        for &next in &waiting[slot] {
            let mut longer = chain.clone();
            longer.push(next);
            stack.push(longer);
        }
    }
    None
}

/// A registered wait, removed when the waiting future completes or is
/// dropped.
struct WaitEdge<'a> {
    waiting: &'a Mutex<Vec<Vec<usize>>>,
    requester: usize,
    target: usize,
}

impl Drop for WaitEdge<'_> {
    fn drop(&mut self) {
        let mut waiting = lock(self.waiting);
        let edges = &mut waiting[self.requester];
        if let Some(pos) = edges.iter().position(|&t| t == self.target) {
            edges.swap_remove(pos);
        }
    }
}

/// `None` when a null argument short-circuits the call.
fn apply_arg_policy(entry: &FunctionEntry, args: Vec<Value>) -> Option<Vec<Value>> {
    if !entry.allow_null && args.iter().any(Value::is_null) {
        return None;
    }
    if entry.allow_sqrl_objects {
        Some(args)
    } else {
        Some(args.into_iter().map(Value::unwrap_sqrl).collect())
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("slots", &self.inner.memo.len())
            .field("clock_ms", &self.inner.clock_ms)
            .field("context", &self.inner.context)
            .field("manipulator", &self.inner.manipulator.is_some())
            .field("timed_out", &self.inner.timed_out.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// What a registered function sees of the execution invoking it.
#[derive(Clone)]
pub struct FunctionContext {
    execution: Execution,
    function: String,
    path: Vec<usize>,
}

impl FunctionContext {
    fn new(execution: Execution, entry: &FunctionEntry, path: Vec<usize>) -> Self {
        Self {
            execution,
            function: entry.qualified_name(),
            path,
        }
    }

    #[must_use]
    pub fn execution(&self) -> &Execution {
        &self.execution
    }

    /// Qualified name of the function being invoked.
    #[must_use]
    pub fn function_name(&self) -> &str {
        &self.function
    }

    #[must_use]
    pub fn clock_ms(&self) -> i64 {
        self.execution.clock_ms()
    }

    #[must_use]
    pub fn manipulator(&self) -> Option<&Arc<dyn Manipulator>> {
        self.execution.manipulator()
    }

    /// Fetch a slot from inside a function. Requests that lead back to the
    /// slot being computed fail with [`ExecutionError::CyclicDependency`].
    ///
    /// # Errors
    ///
    /// Same as [`Execution::fetch_feature`].
    pub async fn fetch_feature(&self, name: &str) -> SlotResult {
        let index = self.execution.index_of(name)?;
        self.execution.resolve(index, self.path.clone()).await
    }

    /// # Errors
    ///
    /// Same as [`Execution::fetch_feature`].
    pub async fn fetch_value(&self, name: &str) -> SlotResult {
        self.fetch_feature(name).await.map(Value::unwrap_sqrl)
    }

    /// Log through the execution, tagged with this function's name.
    pub fn log(&self, level: LogLevel, format: &str, params: Vec<Value>) {
        let mut props = LogProps::new();
        props.insert("function".to_owned(), self.function.clone());
        self.execution.log(level, props, format, params);
    }
}

impl fmt::Debug for FunctionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionContext")
            .field("function", &self.function)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
