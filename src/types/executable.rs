use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use super::context::Context;
use super::error::ExecutionError;
use super::graph::CompiledGraph;
use super::options::ExecuteOptions;
use super::printer::SourcePrinter;
use super::slot::SlotKind;
use crate::config::{EngineConfig, UnknownInputPolicy};
use crate::execute::Execution;
use crate::log::{LogSink, TracingSink};
use crate::registry::{FunctionEntry, FunctionRegistry};

/// A compiled, immutable rule graph bound to a function registry.
///
/// Cheap to clone and safe to share across threads: every
/// [`execute`](Self::execute) call creates an independent [`Execution`] that
/// shares only the graph and the sealed registry.
#[derive(Debug, Clone)]
pub struct Executable {
    inner: Arc<ExecutableInner>,
}

#[derive(Debug, Clone)]
struct ExecutableInner {
    graph: Arc<CompiledGraph>,
    registry: FunctionRegistry,
    /// Catalog entries for every function the graph calls, keyed by the
    /// name used in the graph.
    functions: HashMap<String, Arc<FunctionEntry>>,
    config: EngineConfig,
}

impl Executable {
    /// Bind a graph to a registry. Function names the registry cannot
    /// resolve fail at run time with [`ExecutionError::UnknownFunction`].
    #[must_use]
    pub fn new(graph: CompiledGraph, registry: FunctionRegistry) -> Self {
        let mut functions = HashMap::new();
        for slot in graph.slots() {
            let mut names = Vec::new();
            match &slot.kind {
                SlotKind::Feature(expr) => expr.collect_functions(&mut names),
                SlotKind::Statement {
                    condition, call, ..
                } => {
                    if let Some(condition) = condition {
                        condition.collect_functions(&mut names);
                    }
                    call.collect_functions(&mut names);
                }
                SlotKind::Input | SlotKind::StatementGroup => {}
            }
            for name in names {
                if !functions.contains_key(name)
                    && let Some(entry) = registry.get(name)
                {
                    functions.insert(name.to_owned(), entry);
                }
            }
        }

        Self {
            inner: Arc::new(ExecutableInner {
                graph: Arc::new(graph),
                registry,
                functions,
                config: EngineConfig::default(),
            }),
        }
    }

    /// Replace the engine defaults used by [`execute`](Self::execute).
    #[must_use]
    pub fn with_config(self, config: EngineConfig) -> Self {
        let inner = Arc::unwrap_or_clone(self.inner);
        Self {
            inner: Arc::new(ExecutableInner { config, ..inner }),
        }
    }

    /// Parse rule source and compile it against `registry`.
    ///
    /// This is a convenience method combining [`parse`](crate::parse::parse)
    /// and [`Program::compile()`](crate::Program::compile).
    ///
    /// # Errors
    ///
    /// Returns [`SqrlError`](crate::SqrlError) on parse or compile failure.
    pub fn from_source(source: &str, registry: &FunctionRegistry) -> Result<Self, crate::SqrlError> {
        Self::from_source_with_config(source, registry, EngineConfig::default())
    }

    /// Like [`from_source`](Self::from_source), compiling and executing with
    /// `config`. The config's `functions` block is not applied to the
    /// registry; pass it to [`FunctionRegistry::with_config`] when building
    /// the registry.
    ///
    /// # Errors
    ///
    /// Returns [`SqrlError`](crate::SqrlError) on parse or compile failure.
    pub fn from_source_with_config(
        source: &str,
        registry: &FunctionRegistry,
        config: EngineConfig,
    ) -> Result<Self, crate::SqrlError> {
        let program = crate::parse::parse(source)?;
        Ok(program.compile_with_config(registry, config)?)
    }

    /// Read a rule file and compile it.
    ///
    /// # Errors
    ///
    /// Returns [`SqrlError`](crate::SqrlError) on I/O, parse, or compile failure.
    pub fn from_file(
        path: impl AsRef<std::path::Path>,
        registry: &FunctionRegistry,
    ) -> Result<Self, crate::SqrlError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_source(&source, registry)
    }

    /// Start an execution for one event.
    ///
    /// Input keys that name no input slot are dropped, or rejected when the
    /// unknown-input policy is [`UnknownInputPolicy::Reject`].
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::UnknownInput`] under the reject policy.
    pub fn execute(
        &self,
        context: Context,
        options: ExecuteOptions,
    ) -> Result<Execution, ExecutionError> {
        let config = &self.inner.config;
        let policy = options.unknown_inputs.unwrap_or(config.unknown_inputs);

        let mut inputs = HashMap::with_capacity(options.inputs.len());
        for (name, value) in options.inputs {
            let is_input = self
                .inner
                .graph
                .get(&name)
                .is_some_and(|slot| matches!(slot.kind, SlotKind::Input));
            if is_input {
                inputs.insert(name, value);
                continue;
            }
            match policy {
                UnknownInputPolicy::Ignore => debug!(input = %name, "ignoring unknown input"),
                UnknownInputPolicy::Reject => return Err(ExecutionError::UnknownInput { name }),
            }
        }

        let clock_ms = options
            .clock_ms
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        let log_sink = options
            .log_sink
            .unwrap_or_else(|| Arc::new(TracingSink) as Arc<dyn LogSink>);

        Ok(Execution::new(
            self.clone(),
            context,
            inputs,
            options.manipulator,
            log_sink,
            clock_ms,
            options.feature_timeout.or(config.feature_timeout),
        ))
    }

    /// Declared slot names in graph order: inputs, features and statement
    /// features. Individual statements are not listed.
    #[must_use]
    pub fn features(&self) -> Vec<&str> {
        self.inner
            .graph
            .slots()
            .filter(|slot| !matches!(slot.kind, SlotKind::Statement { .. }))
            .map(|slot| slot.name.as_str())
            .collect()
    }

    /// Names of the inputs the host is expected to supply.
    #[must_use]
    pub fn required_features(&self) -> Vec<&str> {
        self.inner.graph.inputs()
    }

    /// Names of the statement features, i.e. the slots
    /// [`Execution::run_statements`] resolves.
    #[must_use]
    pub fn statement_features(&self) -> Vec<&str> {
        self.inner
            .graph
            .slots()
            .filter(|slot| matches!(slot.kind, SlotKind::StatementGroup))
            .map(|slot| slot.name.as_str())
            .collect()
    }

    /// Names of the slots a given slot reads. Empty for unknown names.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.inner
            .graph
            .get(name)
            .map(|slot| slot.deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn source_printer(&self) -> SourcePrinter {
        SourcePrinter::new(Arc::clone(&self.inner.graph))
    }

    #[must_use]
    pub fn graph(&self) -> &CompiledGraph {
        &self.inner.graph
    }

    #[must_use]
    pub fn registry(&self) -> &FunctionRegistry {
        &self.inner.registry
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub(crate) fn function(&self, name: &str) -> Option<&Arc<FunctionEntry>> {
        self.inner.functions.get(name)
    }
}

#[cfg(feature = "binary-cache")]
impl Executable {
    /// Serialize the compiled graph to a byte vector.
    ///
    /// The optional `source_text` is hashed (BLAKE3) and embedded in the
    /// payload metadata, so callers can tell when the cache is stale.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`](crate::serial::SerializeError) if encoding fails.
    pub fn to_bytes(
        &self,
        source_text: Option<&str>,
    ) -> Result<Vec<u8>, crate::serial::SerializeError> {
        crate::serial::encode(self.graph(), source_text)
    }

    /// Rebuild an executable from bytes produced by
    /// [`to_bytes`](Self::to_bytes), binding it to `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`](crate::serial::DeserializeError) on
    /// format, integrity, or validation failure.
    pub fn from_bytes(
        bytes: &[u8],
        registry: &FunctionRegistry,
    ) -> Result<Self, crate::serial::DeserializeError> {
        let graph = crate::serial::decode(bytes, registry)?;
        registry.seal();
        Ok(Self::new(graph, registry.clone()))
    }

    /// Serialize and write to a file.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`](crate::serial::SerializeError) on
    /// encoding or I/O failure.
    pub fn to_binary_file(
        &self,
        path: impl AsRef<std::path::Path>,
        source_text: Option<&str>,
    ) -> Result<(), crate::serial::SerializeError> {
        let bytes = self.to_bytes(source_text)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Read a file written by [`to_binary_file`](Self::to_binary_file).
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`](crate::serial::DeserializeError) on
    /// I/O, format, integrity, or validation failure.
    pub fn from_binary_file(
        path: impl AsRef<std::path::Path>,
        registry: &FunctionRegistry,
    ) -> Result<Self, crate::serial::DeserializeError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes, registry)
    }
}

impl fmt::Display for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Executable({} slots, {} inputs, {} statement features)",
            self.inner.graph.len(),
            self.required_features().len(),
            self.statement_features().len(),
        )
    }
}
