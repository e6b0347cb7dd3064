use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use pretty_assertions::assert_eq;
use sqrl::{
    Context, ExecuteOptions, Executable, FunctionOptions, FunctionRegistry, LogLevel, LogProps,
    LogRecord, LogSink, Manipulator, SimpleManipulator, Value, callback,
};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Route engine logs to the test output. `RUST_LOG=sqrl=trace` shows slot
/// resolution.
fn init_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

#[tokio::test]
async fn shared_dependency_runs_once() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = FunctionRegistry::with_stdlib().unwrap();
    let counter = Arc::clone(&calls);
    registry
        .register_sync(
            "one",
            move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Int(1))
            },
            FunctionOptions::new(),
        )
        .unwrap();

    let exe = Executable::from_source(
        "LET a := one();\nLET b := add(a, 1);\nLET c := add(a, 10);",
        &registry,
    )
    .unwrap();
    let execution = exe.execute(Context::new(), ExecuteOptions::new()).unwrap();

    assert_eq!(execution.fetch_feature("b").await, Ok(Value::Int(2)));
    assert_eq!(execution.fetch_feature("c").await, Ok(Value::Int(11)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // a fresh execution starts from an empty memo
    let execution = exe.execute(Context::new(), ExecuteOptions::new()).unwrap();
    assert_eq!(execution.fetch_feature("c").await, Ok(Value::Int(11)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn callbacks_added_during_mutate_run_after_the_current_one() {
    init_tracing();
    let order = Arc::new(Mutex::new(Vec::new()));
    let manipulator = Arc::new(SimpleManipulator::new());

    let log = Arc::clone(&order);
    let inner_log = Arc::clone(&order);
    let handle: Arc<dyn Manipulator> = manipulator.clone();
    manipulator.add_callback(callback(move |_| async move {
        log.lock().unwrap().push("cb1 start");
        handle.add_callback(callback(move |_| async move {
            inner_log.lock().unwrap().push("cb3");
            Ok(())
        }));
        tokio::task::yield_now().await;
        log.lock().unwrap().push("cb1 end");
        Ok(())
    }));
    let log = Arc::clone(&order);
    manipulator.add_callback(callback(move |_| async move {
        log.lock().unwrap().push("cb2");
        Ok(())
    }));

    manipulator.mutate(&Context::new()).await.unwrap();
    assert_eq!(
        *order.lock().unwrap(),
        vec!["cb1 start", "cb1 end", "cb2", "cb3"]
    );
    assert_eq!(manipulator.completed_callbacks(), 3);
}

#[test]
fn reserved_names_are_not_listed() {
    let registry = FunctionRegistry::new();
    registry
        .register_sync("_internalHelper", |_, _| Ok(Value::Null), FunctionOptions::new())
        .unwrap();
    registry
        .register_sync(
            "visible",
            |_, _| Ok(Value::Null),
            FunctionOptions::new().docstring("Shown to tooling"),
        )
        .unwrap();

    let listed = registry.list_functions();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "visible");
    assert_eq!(listed[0].docstring, "Shown to tooling");
}

#[test]
fn same_name_in_different_namespaces() {
    let registry = FunctionRegistry::new();
    let noop = |_: &sqrl::FunctionContext, _: &[Value]| -> Result<Value, sqrl::FunctionError> {
        Ok(Value::Null)
    };
    registry.register_sync("score", noop, FunctionOptions::new()).unwrap();
    registry
        .create_package_instance("pkgA")
        .unwrap()
        .register_sync("score", noop, FunctionOptions::new())
        .unwrap();
    assert!(
        registry
            .register_sync("score", noop, FunctionOptions::new())
            .is_err()
    );
    assert_eq!(registry.len(), 2);
}

#[derive(Default)]
struct CollectingSink {
    records: Mutex<Vec<LogRecord>>,
}

impl LogSink for CollectingSink {
    fn log(&self, record: LogRecord) {
        self.records.lock().unwrap().push(record);
    }
}

#[tokio::test]
async fn functions_log_through_the_execution() {
    init_tracing();
    let registry = FunctionRegistry::with_stdlib().unwrap();
    registry
        .register_sync(
            "audit",
            |ctx, args| {
                ctx.log(LogLevel::Info, "audited {}", args.to_vec());
                Ok(Value::Bool(true))
            },
            FunctionOptions::new(),
        )
        .unwrap();
    let exe = Executable::from_source("LET User := input();\nLET Audited := audit(User);", &registry)
        .unwrap();

    let sink = Arc::new(CollectingSink::default());
    let execution = exe
        .execute(
            Context::new().with_request_id("req-42"),
            ExecuteOptions::new()
                .input("User", "dave")
                .log_sink(sink.clone()),
        )
        .unwrap();
    execution.fetch_feature("Audited").await.unwrap();
    execution.info(LogProps::new(), "done", Vec::new());

    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].message(), "audited dave");
    assert_eq!(records[0].props.get("function").map(String::as_str), Some("audit"));
    assert_eq!(records[0].props.get("request_id").map(String::as_str), Some("req-42"));
    assert_eq!(records[1].props.get("function"), None);
    assert_eq!(records[1].level, LogLevel::Info);
}
