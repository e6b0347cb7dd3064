//! Leveled log records emitted by executions and the sinks that receive them.

use std::collections::BTreeMap;
use std::fmt;

use strum::{Display, EnumString};
use tracing::{debug, error, info, trace, warn};

use crate::types::Value;

/// Structured properties attached to a log record.
pub type LogProps = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// One log call made through an [`Execution`](crate::Execution) or a
/// [`FunctionContext`](crate::FunctionContext).
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    /// Caller properties merged over the execution's host context.
    pub props: LogProps,
    pub format: String,
    pub params: Vec<Value>,
}

impl LogRecord {
    /// The format string with its `{}` placeholders filled in.
    #[must_use]
    pub fn message(&self) -> String {
        format_message(&self.format, &self.params)
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message())
    }
}

/// Receiver of execution log records.
pub trait LogSink: Send + Sync {
    fn log(&self, record: LogRecord);
}

/// Forwards records to `tracing` under the `sqrl::rules` target. `Fatal`
/// maps to an `error` event with `fatal = true`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, record: LogRecord) {
        let message = record.message();
        let props = format!("{:?}", record.props);
        match record.level {
            LogLevel::Trace => trace!(target: "sqrl::rules", props = %props, "{message}"),
            LogLevel::Debug => debug!(target: "sqrl::rules", props = %props, "{message}"),
            LogLevel::Info => info!(target: "sqrl::rules", props = %props, "{message}"),
            LogLevel::Warn => warn!(target: "sqrl::rules", props = %props, "{message}"),
            LogLevel::Error => error!(target: "sqrl::rules", props = %props, "{message}"),
            LogLevel::Fatal => error!(target: "sqrl::rules", props = %props, fatal = true, "{message}"),
        }
    }
}

/// Replace each `{}` in `format` with the next parameter. Parameters left
/// over are appended separated by spaces; placeholders without a parameter
/// are kept as `{}`.
#[must_use]
pub fn format_message(format: &str, params: &[Value]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut params = params.iter();
    let mut rest = format;
    while let Some(pos) = rest.find("{}") {
        out.push_str(&rest[..pos]);
        match params.next() {
            Some(param) => out.push_str(&param.to_plain_string()),
            None => out.push_str("{}"),
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    for param in params {
        out.push(' ');
        out.push_str(&param.to_plain_string());
    }
    out
}
