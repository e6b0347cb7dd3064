use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::value::Value;
use crate::config::UnknownInputPolicy;
use crate::log::LogSink;
use crate::manipulator::Manipulator;

/// Per-execution settings passed to [`Executable::execute`](crate::Executable::execute).
///
/// Anything left unset falls back to the executable's
/// [`EngineConfig`](crate::EngineConfig).
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    pub(crate) manipulator: Option<Arc<dyn Manipulator>>,
    pub(crate) inputs: HashMap<String, Value>,
    pub(crate) feature_timeout: Option<Duration>,
    pub(crate) clock_ms: Option<i64>,
    pub(crate) log_sink: Option<Arc<dyn LogSink>>,
    pub(crate) unknown_inputs: Option<UnknownInputPolicy>,
}

impl ExecuteOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Side-effect sink for statements. Required only if statements run.
    #[must_use]
    pub fn manipulator(mut self, manipulator: Arc<dyn Manipulator>) -> Self {
        self.manipulator = Some(manipulator);
        self
    }

    /// Supply the value of one input slot.
    #[must_use]
    pub fn input(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.inputs.insert(name.to_owned(), value.into());
        self
    }

    #[must_use]
    pub fn inputs<I, K, V>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.inputs
            .extend(inputs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Bound on the total time spent computing features.
    #[must_use]
    pub fn feature_timeout(mut self, timeout: Duration) -> Self {
        self.feature_timeout = Some(timeout);
        self
    }

    /// Logical event time in milliseconds since the Unix epoch. Defaults to
    /// the current time.
    #[must_use]
    pub fn clock_ms(mut self, clock_ms: i64) -> Self {
        self.clock_ms = Some(clock_ms);
        self
    }

    #[must_use]
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    #[must_use]
    pub fn unknown_inputs(mut self, policy: UnknownInputPolicy) -> Self {
        self.unknown_inputs = Some(policy);
        self
    }
}

impl fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("manipulator", &self.manipulator.is_some())
            .field("inputs", &self.inputs)
            .field("feature_timeout", &self.feature_timeout)
            .field("clock_ms", &self.clock_ms)
            .field("log_sink", &self.log_sink.is_some())
            .field("unknown_inputs", &self.unknown_inputs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let opts = ExecuteOptions::new()
            .input("Amount", 10_i64)
            .inputs([("User", "alice"), ("Ip", "10.0.0.1")])
            .feature_timeout(Duration::from_millis(5))
            .clock_ms(1_000)
            .unknown_inputs(UnknownInputPolicy::Reject);

        assert_eq!(opts.inputs.len(), 3);
        assert_eq!(opts.inputs["Amount"], Value::Int(10));
        assert_eq!(opts.feature_timeout, Some(Duration::from_millis(5)));
        assert_eq!(opts.clock_ms, Some(1_000));
        assert_eq!(opts.unknown_inputs, Some(UnknownInputPolicy::Reject));
        assert!(opts.manipulator.is_none());
    }

    #[test]
    fn later_input_overwrites() {
        let opts = ExecuteOptions::new().input("A", 1_i64).input("A", 2_i64);
        assert_eq!(opts.inputs["A"], Value::Int(2));
    }
}
