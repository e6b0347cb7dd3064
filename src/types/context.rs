use std::collections::BTreeMap;

/// Host trace context for one event.
///
/// Passed to [`Executable::execute`](crate::Executable::execute) and to
/// manipulator callbacks. Its request id and properties are merged into every
/// log record the execution emits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    request_id: Option<String>,
    props: BTreeMap<String, String>,
}

impl Context {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: &str) -> Self {
        self.request_id = Some(request_id.to_owned());
        self
    }

    /// Set a property, replacing any previous value for `key`.
    #[must_use]
    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a property (mutable reference version).
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.props.insert(key.to_owned(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    #[must_use]
    pub fn props(&self) -> &BTreeMap<String, String> {
        &self.props
    }

    /// Context properties (and the request id under `request_id`) overlaid
    /// with `overrides`.
    #[must_use]
    pub fn log_props(&self, overrides: BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut props = self.props.clone();
        if let Some(id) = &self.request_id {
            props.insert("request_id".to_owned(), id.clone());
        }
        props.extend(overrides);
        props
    }
}
