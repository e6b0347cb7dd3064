//! Binary serialization of compiled graphs.
//!
//! A compiled [`Executable`](crate::Executable) can be cached as bytes and
//! rebuilt later against a registry that provides the same functions. The
//! format is a 32-byte fixed header followed by a bincode-encoded payload.
//!
//! ## Wire Format
//!
//! ```text
//! Offset  Size  Field
//! 0       4     Magic bytes: b"SQRL"
//! 4       2     Format version (u16, little-endian)
//! 6       2     Engine version (u16, little-endian)
//! 8       4     Flags (u32, reserved)
//! 12      4     Payload length in bytes (u32, little-endian)
//! 16      16    BLAKE3 hash of the payload (truncated to 16 bytes)
//! 32..    var   Bincode-encoded payload
//! ```
//!
//! The format version must match exactly. Functions are stored by name only:
//! decoding fails unless every call resolves in the supplied registry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::FunctionRegistry;
use crate::types::{CompiledGraph, Entity, FunctionError, Slot, SlotExpr, SlotKind, Value};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAGIC: &[u8; 4] = b"SQRL";
const FORMAT_VERSION: u16 = 1;
const ENGINE_VERSION: u16 = 1;
const HEADER_SIZE: usize = 32;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when serializing an executable to bytes.
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("failed to encode graph: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("payload of {0} bytes exceeds the format limit")]
    TooLarge(usize),

    #[error("I/O error during serialization: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when rebuilding an executable from bytes.
#[derive(Debug, Error)]
pub enum DeserializeError {
    #[error("not a sqrl binary: invalid magic bytes")]
    BadMagic,

    #[error("incompatible format version: blob is v{blob}, engine supports v{supported}")]
    IncompatibleVersion { blob: u16, supported: u16 },

    #[error("integrity check failed: BLAKE3 checksum mismatch")]
    ChecksumMismatch,

    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("failed to decode payload: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("I/O error during deserialization: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Serialized type hierarchy
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct SerializedGraph {
    slot_count: usize,
    source_digest: Option<[u8; 32]>,
    slots: Vec<SerializedSlot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedSlot {
    name: String,
    kind: SerializedKind,
    deps: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
enum SerializedKind {
    Input,
    Feature(SerializedExpr),
    Statement {
        feature: String,
        condition: Option<SerializedExpr>,
        call: SerializedExpr,
    },
    StatementGroup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum SerializedExpr {
    Constant(SerializedValue),
    Feature(String),
    List(Vec<SerializedExpr>),
    Call {
        function: String,
        args: Vec<SerializedExpr>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum SerializedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<SerializedValue>),
    Entity { entity_type: String, key: String },
}

// ---------------------------------------------------------------------------
// CompiledGraph -> SerializedGraph
// ---------------------------------------------------------------------------

fn serialize_value(value: &Value) -> SerializedValue {
    match value {
        Value::Null => SerializedValue::Null,
        Value::Bool(v) => SerializedValue::Bool(*v),
        Value::Int(v) => SerializedValue::Int(*v),
        Value::Float(v) => SerializedValue::Float(*v),
        Value::String(v) => SerializedValue::Str(v.clone()),
        Value::List(items) => SerializedValue::List(items.iter().map(serialize_value).collect()),
        Value::Entity(e) => SerializedValue::Entity {
            entity_type: e.entity_type().to_owned(),
            key: e.key().to_owned(),
        },
    }
}

fn serialize_expr(expr: &SlotExpr) -> SerializedExpr {
    match expr {
        SlotExpr::Constant(v) => SerializedExpr::Constant(serialize_value(v)),
        SlotExpr::Feature(name) => SerializedExpr::Feature(name.clone()),
        SlotExpr::List(items) => SerializedExpr::List(items.iter().map(serialize_expr).collect()),
        SlotExpr::Call { function, args } => SerializedExpr::Call {
            function: function.clone(),
            args: args.iter().map(serialize_expr).collect(),
        },
    }
}

fn serialize_slot(slot: &Slot) -> SerializedSlot {
    let kind = match &slot.kind {
        SlotKind::Input => SerializedKind::Input,
        SlotKind::Feature(expr) => SerializedKind::Feature(serialize_expr(expr)),
        SlotKind::Statement {
            feature,
            condition,
            call,
        } => SerializedKind::Statement {
            feature: feature.clone(),
            condition: condition.as_ref().map(serialize_expr),
            call: serialize_expr(call),
        },
        SlotKind::StatementGroup => SerializedKind::StatementGroup,
    };
    SerializedSlot {
        name: slot.name.clone(),
        kind,
        deps: slot.deps.clone(),
    }
}

fn graph_to_serialized(graph: &CompiledGraph, source_text: Option<&str>) -> SerializedGraph {
    SerializedGraph {
        slot_count: graph.len(),
        source_digest: source_text.map(|s| *blake3::hash(s.as_bytes()).as_bytes()),
        slots: graph.slots().map(serialize_slot).collect(),
    }
}

// ---------------------------------------------------------------------------
// SerializedGraph -> CompiledGraph
// ---------------------------------------------------------------------------

fn deserialize_value(value: SerializedValue) -> Value {
    match value {
        SerializedValue::Null => Value::Null,
        SerializedValue::Bool(v) => Value::Bool(v),
        SerializedValue::Int(v) => Value::Int(v),
        SerializedValue::Float(v) => Value::Float(v),
        SerializedValue::Str(v) => Value::String(v),
        SerializedValue::List(items) => {
            Value::List(items.into_iter().map(deserialize_value).collect())
        }
        SerializedValue::Entity { entity_type, key } => Value::Entity(Entity::new(entity_type, key)),
    }
}

fn deserialize_expr(expr: SerializedExpr) -> SlotExpr {
    match expr {
        SerializedExpr::Constant(v) => SlotExpr::Constant(deserialize_value(v)),
        SerializedExpr::Feature(name) => SlotExpr::Feature(name),
        SerializedExpr::List(items) => {
            SlotExpr::List(items.into_iter().map(deserialize_expr).collect())
        }
        SerializedExpr::Call { function, args } => SlotExpr::Call {
            function,
            args: args.into_iter().map(deserialize_expr).collect(),
        },
    }
}

fn deserialize_slot(slot: SerializedSlot) -> Slot {
    let kind = match slot.kind {
        SerializedKind::Input => SlotKind::Input,
        SerializedKind::Feature(expr) => SlotKind::Feature(deserialize_expr(expr)),
        SerializedKind::Statement {
            feature,
            condition,
            call,
        } => SlotKind::Statement {
            feature,
            condition: condition.map(deserialize_expr),
            call: deserialize_expr(call),
        },
        SerializedKind::StatementGroup => SlotKind::StatementGroup,
    };
    Slot {
        name: slot.name,
        kind,
        deps: slot.deps,
    }
}

fn serialized_to_graph(
    ser: SerializedGraph,
    registry: &FunctionRegistry,
) -> Result<CompiledGraph, DeserializeError> {
    if ser.slot_count != ser.slots.len() {
        return Err(DeserializeError::Validation(format!(
            "metadata says {} slots but payload has {}",
            ser.slot_count,
            ser.slots.len()
        )));
    }

    let slots: Vec<Slot> = ser.slots.into_iter().map(deserialize_slot).collect();
    for slot in &slots {
        validate_functions(slot, registry)?;
    }

    let graph = CompiledGraph::from_slots(slots)
        .map_err(|err| DeserializeError::Validation(err.to_string()))?;
    if !graph.is_acyclic() {
        return Err(DeserializeError::Validation(
            "graph contains a dependency cycle".to_owned(),
        ));
    }
    Ok(graph)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Every call in `slot` must name a function the registry can run in that
/// position, with an argument count it accepts.
fn validate_functions(slot: &Slot, registry: &FunctionRegistry) -> Result<(), DeserializeError> {
    let mut values = Vec::new();
    let mut statement = None;
    match &slot.kind {
        SlotKind::Input | SlotKind::StatementGroup => {}
        SlotKind::Feature(expr) => expr.collect_calls(&mut values),
        SlotKind::Statement {
            condition, call, ..
        } => {
            if let Some(condition) = condition {
                condition.collect_calls(&mut values);
            }
            match call {
                SlotExpr::Call { function, args } => {
                    statement = Some((function.as_str(), args.len()));
                    args.iter().for_each(|arg| arg.collect_calls(&mut values));
                }
                other => other.collect_calls(&mut values),
            }
        }
    }

    let missing = |name: &str| {
        DeserializeError::Validation(format!(
            "slot '{}' calls '{name}', which is not registered",
            slot.name
        ))
    };
    let arity = |name: &str, err: FunctionError| {
        DeserializeError::Validation(format!("slot '{}' calls '{name}': {err}", slot.name))
    };
    for (name, count) in values {
        let entry = registry.get(name).ok_or_else(|| missing(name))?;
        if entry.is_statement() || entry.is_transform() {
            return Err(DeserializeError::Validation(format!(
                "slot '{}' calls '{name}', which is not a value function",
                slot.name
            )));
        }
        entry.check_arity(count).map_err(|err| arity(name, err))?;
    }
    if let Some((name, count)) = statement {
        let entry = registry.get(name).ok_or_else(|| missing(name))?;
        if !entry.is_statement() {
            return Err(DeserializeError::Validation(format!(
                "slot '{}' calls '{name}', which is not a statement",
                slot.name
            )));
        }
        entry.check_arity(count).map_err(|err| arity(name, err))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Header I/O
// ---------------------------------------------------------------------------

fn write_header(buf: &mut Vec<u8>, payload: &[u8]) -> Result<(), SerializeError> {
    let payload_len =
        u32::try_from(payload.len()).map_err(|_| SerializeError::TooLarge(payload.len()))?;
    let hash = blake3::hash(payload);

    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&ENGINE_VERSION.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&hash.as_bytes()[..16]);
    Ok(())
}

struct Header {
    format_version: u16,
    payload_len: usize,
    hash: [u8; 16],
}

fn read_header(bytes: &[u8]) -> Result<Header, DeserializeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DeserializeError::LengthMismatch {
            expected: HEADER_SIZE,
            actual: bytes.len(),
        });
    }
    if &bytes[0..4] != MAGIC {
        return Err(DeserializeError::BadMagic);
    }

    // bytes[6..12] hold the engine version and reserved flags
    let format_version = u16::from_le_bytes([bytes[4], bytes[5]]);
    let payload_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
    let mut hash = [0u8; 16];
    hash.copy_from_slice(&bytes[16..32]);

    Ok(Header {
        format_version,
        payload_len: payload_len as usize,
        hash,
    })
}

// ---------------------------------------------------------------------------
// Public encode/decode
// ---------------------------------------------------------------------------

pub(crate) fn encode(
    graph: &CompiledGraph,
    source_text: Option<&str>,
) -> Result<Vec<u8>, SerializeError> {
    let serialized = graph_to_serialized(graph, source_text);
    let payload = bincode::serde::encode_to_vec(&serialized, bincode::config::standard())?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    write_header(&mut buf, &payload)?;
    buf.extend_from_slice(&payload);
    Ok(buf)
}

pub(crate) fn decode(
    bytes: &[u8],
    registry: &FunctionRegistry,
) -> Result<CompiledGraph, DeserializeError> {
    let header = read_header(bytes)?;
    if header.format_version != FORMAT_VERSION {
        return Err(DeserializeError::IncompatibleVersion {
            blob: header.format_version,
            supported: FORMAT_VERSION,
        });
    }

    let payload = bytes
        .get(HEADER_SIZE..HEADER_SIZE + header.payload_len)
        .ok_or(DeserializeError::LengthMismatch {
            expected: header.payload_len,
            actual: bytes.len() - HEADER_SIZE,
        })?;
    if blake3::hash(payload).as_bytes()[..16] != header.hash {
        return Err(DeserializeError::ChecksumMismatch);
    }

    let (serialized, _): (SerializedGraph, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
    serialized_to_graph(serialized, registry)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FunctionOptions, ProgramBuilder, call, constant, feature};

    fn graph() -> CompiledGraph {
        CompiledGraph::from_slots(vec![
            Slot::input("User"),
            Slot::feature(
                "Tagged",
                SlotExpr::call(
                    "list",
                    vec![
                        SlotExpr::feature("User"),
                        SlotExpr::constant(Value::Entity(Entity::new("Ip", "10.0.0.1"))),
                        SlotExpr::constant(Value::Null),
                    ],
                ),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn graph_round_trip() {
        let registry = FunctionRegistry::with_stdlib().unwrap();
        let original = graph();
        let bytes = encode(&original, Some("source")).unwrap();
        let restored = decode(&bytes, &registry).unwrap();
        assert_eq!(
            restored.slots().collect::<Vec<_>>(),
            original.slots().collect::<Vec<_>>()
        );
    }

    #[test]
    fn compiled_statements_round_trip() {
        let registry = FunctionRegistry::with_stdlib().unwrap();
        let exe = ProgramBuilder::new()
            .input("A")
            .when(feature("A"), vec![call("log", vec![constant("a={}"), feature("A")])])
            .compile(&registry)
            .unwrap();
        let bytes = encode(exe.graph(), None).unwrap();
        let restored = decode(&bytes, &registry).unwrap();
        assert_eq!(restored.len(), exe.graph().len());
        assert!(restored.get("SqrlLogStatements").is_some());
    }

    #[test]
    fn unknown_functions_are_rejected() {
        let bytes = encode(&graph(), None).unwrap();
        let result = decode(&bytes, &FunctionRegistry::new());
        assert!(matches!(result, Err(DeserializeError::Validation(msg)) if msg.contains("'list'")));
    }

    #[test]
    fn statement_position_requires_a_statement() {
        let registry = FunctionRegistry::new();
        registry
            .register_sync("plain", |_, _| Ok(Value::Null), FunctionOptions::new())
            .unwrap();
        let graph = CompiledGraph::from_slots(vec![Slot::statement(
            "S#0",
            "S",
            None,
            SlotExpr::call("plain", vec![]),
        )])
        .unwrap();
        let bytes = encode(&graph, None).unwrap();
        assert!(matches!(
            decode(&bytes, &registry),
            Err(DeserializeError::Validation(msg)) if msg.contains("not a statement")
        ));
    }

    #[test]
    fn call_arity_is_checked_on_load() {
        let registry = FunctionRegistry::with_stdlib().unwrap();
        let graph = CompiledGraph::from_slots(vec![Slot::feature(
            "Negated",
            SlotExpr::call("not", vec![]),
        )])
        .unwrap();
        let bytes = encode(&graph, None).unwrap();
        assert!(matches!(
            decode(&bytes, &registry),
            Err(DeserializeError::Validation(msg))
                if msg == "slot 'Negated' calls 'not': expected at least 1 arguments, got 0"
        ));
    }

    #[test]
    fn cyclic_payload_is_rejected() {
        let registry = FunctionRegistry::with_stdlib().unwrap();
        let graph = CompiledGraph::from_slots(vec![
            Slot::feature("A", SlotExpr::call("not", vec![SlotExpr::feature("B")])),
            Slot::feature("B", SlotExpr::call("not", vec![SlotExpr::feature("A")])),
        ])
        .unwrap();
        let bytes = encode(&graph, None).unwrap();
        assert!(matches!(
            decode(&bytes, &registry),
            Err(DeserializeError::Validation(_))
        ));
    }

    #[test]
    fn header_round_trip() {
        let payload = b"test payload data";
        let mut buf = Vec::new();
        write_header(&mut buf, payload).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);

        let header = read_header(&buf).unwrap();
        assert_eq!(header.format_version, FORMAT_VERSION);
        assert_eq!(header.payload_len, payload.len());
        assert_eq!(&header.hash, &blake3::hash(payload).as_bytes()[..16]);
    }

    #[test]
    fn header_bad_magic() {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(b"BAAD");
        assert!(matches!(read_header(&buf), Err(DeserializeError::BadMagic)));
    }

    #[test]
    fn header_too_short() {
        assert!(matches!(
            read_header(&[0u8; 10]),
            Err(DeserializeError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut bytes = encode(&graph(), None).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let registry = FunctionRegistry::with_stdlib().unwrap();
        assert!(matches!(
            decode(&bytes, &registry),
            Err(DeserializeError::ChecksumMismatch)
        ));
    }

    #[test]
    fn truncated_payload_is_a_length_mismatch() {
        let bytes = encode(&graph(), None).unwrap();
        let registry = FunctionRegistry::with_stdlib().unwrap();
        assert!(matches!(
            decode(&bytes[..bytes.len() - 2], &registry),
            Err(DeserializeError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn version_mismatch_is_reported() {
        let mut bytes = encode(&graph(), None).unwrap();
        bytes[4] = 9;
        let registry = FunctionRegistry::with_stdlib().unwrap();
        assert!(matches!(
            decode(&bytes, &registry),
            Err(DeserializeError::IncompatibleVersion { blob: 9, supported: 1 })
        ));
    }
}
