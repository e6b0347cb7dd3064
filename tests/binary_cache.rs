#![cfg(feature = "binary-cache")]

use std::sync::Arc;

use pretty_assertions::assert_eq;
use sqrl::serial::DeserializeError;
use sqrl::{
    Context, ExecuteOptions, Executable, FunctionOptions, FunctionRegistry, SimpleManipulator,
    Value,
};

const RULES: &str = r#"
LET User := input();
LET Attempts := input();
LET Key := entity("User", User);
LET TooMany := NOT Attempts == 0 AND add(Attempts, -5) == 0;
LET Summary := concat(User, ":", Attempts);
WHEN TooMany THEN log("too many attempts for {}", User);
"#;

fn registry() -> FunctionRegistry {
    FunctionRegistry::with_stdlib().unwrap()
}

async fn outcome(exe: &Executable, attempts: i64) -> (Vec<Value>, usize) {
    let manipulator = Arc::new(SimpleManipulator::new());
    let execution = exe
        .execute(
            Context::new(),
            ExecuteOptions::new()
                .input("User", "carol")
                .input("Attempts", attempts)
                .manipulator(manipulator.clone()),
        )
        .unwrap();
    let values = execution
        .fetch_features(&["Key", "TooMany", "Summary"])
        .await
        .unwrap();
    execution.run_statements().await.unwrap();
    (values, manipulator.pending_callbacks())
}

#[tokio::test]
async fn restored_executable_behaves_like_the_original() {
    let original = Executable::from_source(RULES, &registry()).unwrap();
    let bytes = original.to_bytes(Some(RULES)).unwrap();
    let restored = Executable::from_bytes(&bytes, &registry()).unwrap();

    assert_eq!(restored.features(), original.features());
    assert_eq!(
        restored.source_printer().print_all(),
        original.source_printer().print_all()
    );
    for attempts in [0, 3, 5] {
        assert_eq!(outcome(&restored, attempts).await, outcome(&original, attempts).await);
    }
    assert_eq!(outcome(&restored, 5).await.1, 1);
}

#[tokio::test]
async fn file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.sqrlc");

    let original = Executable::from_source(RULES, &registry()).unwrap();
    original.to_binary_file(&path, Some(RULES)).unwrap();
    let restored = Executable::from_binary_file(&path, &registry()).unwrap();

    assert_eq!(outcome(&restored, 5).await, outcome(&original, 5).await);
}

#[test]
fn encoding_is_deterministic() {
    let exe = Executable::from_source(RULES, &registry()).unwrap();
    assert_eq!(exe.to_bytes(None).unwrap(), exe.to_bytes(None).unwrap());
    assert_ne!(exe.to_bytes(None).unwrap(), exe.to_bytes(Some(RULES)).unwrap());
}

#[test]
fn restoring_requires_the_same_functions() {
    let full = registry();
    full.register_sync("risk", |_, _| Ok(Value::Int(1)), FunctionOptions::new())
        .unwrap();
    let exe = Executable::from_source("LET R := risk();", &full).unwrap();
    let bytes = exe.to_bytes(None).unwrap();

    let result = Executable::from_bytes(&bytes, &registry());
    assert!(matches!(result, Err(DeserializeError::Validation(msg)) if msg.contains("risk")));
}

#[test]
fn garbage_is_rejected() {
    assert!(matches!(
        Executable::from_bytes(b"definitely not a cache file, but long enough", &registry()),
        Err(DeserializeError::BadMagic)
    ));
    assert!(matches!(
        Executable::from_bytes(b"SQRL", &registry()),
        Err(DeserializeError::LengthMismatch { .. })
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Executable::from_binary_file(dir.path().join("absent.sqrlc"), &registry());
    assert!(matches!(result, Err(DeserializeError::Io(_))));
}
