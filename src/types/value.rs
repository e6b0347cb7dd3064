use std::cmp::Ordering;
use std::fmt;

/// Values flowing through a compiled graph.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// The absence of a value. Missing inputs resolve to `Null`.
    #[default]
    Null,
    /// A boolean value.
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit floating-point number.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A domain-wrapped object. Functions only see it unwrapped unless they
    /// are registered with `allow_sqrl_objects`.
    Entity(Entity),
}

/// A typed, keyed domain object, e.g. `User/"alice"` or `Ip/"10.0.0.1"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entity {
    entity_type: String,
    key: String,
}

/// Opaque identifier a [`Manipulator`](crate::Manipulator) may track for
/// auditing. Derived from an [`Entity`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqrlKey {
    entity_type: String,
    key: String,
    clock_ms: i64,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            key: key.into(),
        }
    }

    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The tracking key for this entity at the given event time.
    #[must_use]
    pub fn sqrl_key(&self, clock_ms: i64) -> SqrlKey {
        SqrlKey {
            entity_type: self.entity_type.clone(),
            key: self.key.clone(),
            clock_ms,
        }
    }
}

impl SqrlKey {
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn clock_ms(&self) -> i64 {
        self.clock_ms
    }
}

impl fmt::Display for SqrlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.entity_type, self.key, self.clock_ms)
    }
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value is, or contains, a domain-wrapped object.
    #[must_use]
    pub fn is_sqrl_object(&self) -> bool {
        match self {
            Value::Entity(_) => true,
            Value::List(items) => items.iter().any(Value::is_sqrl_object),
            _ => false,
        }
    }

    /// Replace every entity (also inside lists) with its plain string key.
    #[must_use]
    pub fn unwrap_sqrl(self) -> Value {
        match self {
            Value::Entity(entity) => Value::String(entity.key),
            Value::List(items) => Value::List(items.into_iter().map(Value::unwrap_sqrl).collect()),
            other => other,
        }
    }

    /// Rule-language truthiness: null, false, zero, empty strings and empty
    /// lists are falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Entity(_) => true,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Compare two values, with ints and floats comparing numerically.
    /// Returns `None` for incompatible types.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Entity(a), Value::Entity(b)) if a.entity_type == b.entity_type => {
                a.key.partial_cmp(&b.key)
            }
            _ => None,
        }
    }

    /// Text used when interpolating a value into a message: strings appear
    /// without quotes.
    #[must_use]
    pub fn to_plain_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Entity(e) => e.key.clone(),
            other => other.to_string(),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Entity> for Value {
    fn from(v: Entity) -> Self {
        Value::Entity(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            Value::Entity(e) => serde_json::json!({ "type": e.entity_type, "key": e.key }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Entity(e) => write!(f, "entity({:?}, {:?})", e.entity_type, e.key),
        }
    }
}
