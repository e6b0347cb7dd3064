//! Built-in functions available through [`FunctionRegistry::with_stdlib`].

use tracing::info;

use super::{ArgSpec, ArgType, FunctionOptions, FunctionRegistry};
use crate::execute::FunctionContext;
use crate::log::format_message;
use crate::manipulator::callback;
use crate::types::{Ast, CallNode, Context, Entity, FunctionError, RegistryError, Value, call};

/// Statement feature that the `log` statement registers under.
pub const LOG_STATEMENTS: &str = "SqrlLogStatements";

pub(crate) fn register(registry: &FunctionRegistry) -> Result<(), RegistryError> {
    let variadic = || ArgSpec::new().variadic(ArgType::Any);

    registry.register_sync(
        "add",
        |_, args| add(args),
        FunctionOptions::new()
            .pure()
            .args(ArgSpec::new().required(ArgType::Any).variadic(ArgType::Any))
            .docstring("Sum of the arguments; a float if any argument is a float"),
    )?;
    registry.register_sync(
        "if",
        |_, args| {
            let branch = if arg(args, 0)?.is_truthy() { args.get(1) } else { args.get(2) };
            Ok(branch.cloned().unwrap_or_default())
        },
        FunctionOptions::new()
            .pure()
            .allow_null()
            .allow_sqrl_objects()
            .args(
                ArgSpec::new()
                    .required(ArgType::Any)
                    .required(ArgType::Any)
                    .optional(ArgType::Any),
            )
            .docstring("Second argument when the first is truthy, else the third or null"),
    )?;
    registry.register_sync(
        "not",
        |_, args| Ok(Value::Bool(!arg(args, 0)?.is_truthy())),
        FunctionOptions::new()
            .pure()
            .allow_null()
            .args(ArgSpec::new().required(ArgType::Any)),
    )?;
    registry.register_sync(
        "and",
        |_, args| Ok(Value::Bool(args.iter().all(Value::is_truthy))),
        FunctionOptions::new().pure().allow_null().args(variadic()),
    )?;
    registry.register_sync(
        "or",
        |_, args| Ok(Value::Bool(args.iter().any(Value::is_truthy))),
        FunctionOptions::new().pure().allow_null().args(variadic()),
    )?;
    registry.register_sync(
        "eq",
        |_, args| {
            Ok(Value::Bool(
                arg(args, 0)?.compare(arg(args, 1)?) == Some(std::cmp::Ordering::Equal),
            ))
        },
        FunctionOptions::new()
            .pure()
            .allow_null()
            .args(ArgSpec::new().required(ArgType::Any).required(ArgType::Any)),
    )?;
    registry.register_sync(
        "list",
        |_, args| Ok(Value::List(args.to_vec())),
        FunctionOptions::new()
            .pure()
            .allow_null()
            .allow_sqrl_objects()
            .args(variadic()),
    )?;
    registry.register_sync(
        "entity",
        |_, args| {
            Ok(Value::Entity(Entity::new(
                arg(args, 0)?.to_plain_string(),
                arg(args, 1)?.to_plain_string(),
            )))
        },
        FunctionOptions::new()
            .pure()
            .args(ArgSpec::new().required(ArgType::Constant).required(ArgType::Any))
            .docstring("Wrap a key as a typed entity: entity(\"User\", Name)"),
    )?;
    registry.register_sync(
        "now",
        |ctx, _| Ok(Value::Int(ctx.clock_ms())),
        FunctionOptions::new()
            .args(ArgSpec::new())
            .docstring("Event time in milliseconds since the Unix epoch"),
    )?;

    registry.register_sync(
        "_concat",
        |_, args| Ok(Value::String(args.iter().map(Value::to_plain_string).collect())),
        FunctionOptions::new().pure().args(variadic()),
    )?;
    registry.register_transform(
        "concat",
        concat,
        FunctionOptions::new()
            .pure()
            .args(variadic())
            .docstring("Join the arguments as plain strings"),
    )?;

    registry.register_statement(
        LOG_STATEMENTS,
        "log",
        log_statement,
        FunctionOptions::new()
            .allow_null()
            .args(ArgSpec::new().required(ArgType::Constant).variadic(ArgType::Any))
            .docstring("Log a message when the execution's effects are applied"),
    )?;

    Ok(())
}

fn arg(args: &[Value], position: usize) -> Result<&Value, FunctionError> {
    args.get(position)
        .ok_or_else(|| FunctionError::new(format!("missing argument {}", position + 1)))
}

#[allow(clippy::cast_precision_loss)]
fn add(args: &[Value]) -> Result<Value, FunctionError> {
    if args.iter().any(|v| matches!(v, Value::Float(_))) {
        let mut total = 0.0;
        for arg in args {
            total += match arg {
                Value::Int(i) => *i as f64,
                Value::Float(f) => *f,
                other => return Err(not_a_number(other)),
            };
        }
        return Ok(Value::Float(total));
    }

    let mut total: i64 = 0;
    for arg in args {
        let Value::Int(i) = arg else {
            return Err(not_a_number(arg));
        };
        total = total
            .checked_add(*i)
            .ok_or_else(|| FunctionError::new("integer overflow in add"))?;
    }
    Ok(Value::Int(total))
}

fn not_a_number(value: &Value) -> FunctionError {
    FunctionError::new(format!("add expects numbers, got {value}"))
}

fn concat(node: &CallNode) -> Result<Ast, crate::types::CompileError> {
    let constants: Option<Vec<Value>> = node.args.iter().map(Ast::constant_value).collect();
    Ok(match constants {
        Some(values) => Ast::Constant(Value::String(
            values.iter().map(Value::to_plain_string).collect(),
        )),
        None => call("_concat", node.args.clone()),
    })
}

async fn log_statement(ctx: FunctionContext, args: Vec<Value>) -> Result<(), FunctionError> {
    let Some((format, params)) = args.split_first() else {
        return Err(FunctionError::new("log requires a format string"));
    };
    let message = format_message(&format.to_plain_string(), params);
    let Some(manipulator) = ctx.manipulator() else {
        return Err(FunctionError::new("log requires a manipulator"));
    };
    manipulator.add_callback(callback(move |context: Context| async move {
        info!(
            target: "sqrl::log",
            request_id = context.request_id().unwrap_or_default(),
            "{message}"
        );
        Ok(())
    }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::manipulator::SimpleManipulator;
    use crate::{ExecuteOptions, Manipulator, ProgramBuilder, constant, feature, list};

    async fn eval(expr: Ast) -> Value {
        let registry = FunctionRegistry::with_stdlib().unwrap();
        let exe = ProgramBuilder::new()
            .feature("Out", expr)
            .compile(&registry)
            .unwrap();
        exe.execute(Context::new(), ExecuteOptions::new().clock_ms(99))
            .unwrap()
            .fetch_feature("Out")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn add_keeps_ints_and_widens_to_float() {
        assert_eq!(eval(call("add", vec![constant(1_i64), constant(2_i64)])).await, Value::Int(3));
        assert_eq!(
            eval(call("add", vec![constant(1_i64), constant(0.5)])).await,
            Value::Float(1.5)
        );
    }

    #[test]
    fn add_rejects_non_numbers_and_overflow() {
        assert!(add(&[Value::Int(1), Value::from("x")]).is_err());
        assert!(add(&[Value::Int(i64::MAX), Value::Int(1)]).is_err());
    }

    #[tokio::test]
    async fn boolean_helpers_use_truthiness() {
        assert_eq!(eval(call("not", vec![constant(Value::Null)])).await, Value::Bool(true));
        assert_eq!(
            eval(call("and", vec![constant(1_i64), constant("x")])).await,
            Value::Bool(true)
        );
        assert_eq!(
            eval(call("or", vec![constant(0_i64), constant("")])).await,
            Value::Bool(false)
        );
        assert_eq!(
            eval(call("eq", vec![constant(1_i64), constant(1.0)])).await,
            Value::Bool(true)
        );
        assert_eq!(
            eval(call("eq", vec![constant(Value::Null), constant(Value::Null)])).await,
            Value::Bool(true)
        );
    }

    #[tokio::test]
    async fn if_picks_a_branch() {
        assert_eq!(
            eval(call("if", vec![constant(true), constant("yes"), constant("no")])).await,
            Value::from("yes")
        );
        assert_eq!(
            eval(call("if", vec![constant(Value::Null), constant("yes")])).await,
            Value::Null
        );
    }

    #[tokio::test]
    async fn list_and_entity() {
        assert_eq!(
            eval(call("list", vec![constant(1_i64), constant(Value::Null)])).await,
            Value::List(vec![Value::Int(1), Value::Null])
        );
        assert_eq!(
            eval(call("entity", vec![constant("Ip"), constant("10.0.0.1")])).await,
            Value::Entity(Entity::new("Ip", "10.0.0.1"))
        );
        assert_eq!(
            eval(list(vec![call("entity", vec![constant("Ip"), constant("1")])])).await,
            Value::List(vec![Value::Entity(Entity::new("Ip", "1"))])
        );
    }

    #[tokio::test]
    async fn now_reads_the_execution_clock() {
        assert_eq!(eval(call("now", vec![])).await, Value::Int(99));
    }

    #[test]
    fn concat_folds_constants() {
        let node = CallNode {
            func: "concat".into(),
            args: vec![constant("n="), constant(3_i64)],
        };
        assert_eq!(concat(&node).unwrap(), constant("n=3"));

        let node = CallNode {
            func: "concat".into(),
            args: vec![constant("n="), feature("N")],
        };
        assert_eq!(
            concat(&node).unwrap(),
            call("_concat", vec![constant("n="), feature("N")])
        );
    }

    #[tokio::test]
    async fn concat_of_features_runs_hidden_function() {
        let registry = FunctionRegistry::with_stdlib().unwrap();
        let exe = ProgramBuilder::new()
            .input("N")
            .feature("Out", call("concat", vec![constant("n="), feature("N")]))
            .compile(&registry)
            .unwrap();
        let execution = exe
            .execute(Context::new(), ExecuteOptions::new().input("N", 4_i64))
            .unwrap();
        assert_eq!(execution.fetch_feature("Out").await, Ok(Value::from("n=4")));
    }

    #[tokio::test]
    async fn log_enqueues_a_callback() {
        let registry = FunctionRegistry::with_stdlib().unwrap();
        let exe = ProgramBuilder::new()
            .input("User")
            .execute(call("log", vec![constant("hello {}"), feature("User")]))
            .compile(&registry)
            .unwrap();
        let manipulator = Arc::new(SimpleManipulator::new());
        let execution = exe
            .execute(
                Context::new(),
                ExecuteOptions::new()
                    .input("User", "alice")
                    .manipulator(manipulator.clone()),
            )
            .unwrap();

        execution.run_statements().await.unwrap();
        assert_eq!(manipulator.pending_callbacks(), 1);
        manipulator.mutate(&Context::new()).await.unwrap();
        assert_eq!(manipulator.completed_callbacks(), 1);
    }

    #[test]
    fn hidden_helpers_are_not_listed() {
        let registry = FunctionRegistry::with_stdlib().unwrap();
        let names: Vec<String> = registry
            .list_functions()
            .into_iter()
            .map(|summary| summary.name)
            .collect();
        assert!(names.contains(&"concat".to_owned()));
        assert!(names.contains(&"log".to_owned()));
        assert!(!names.iter().any(|name| name.starts_with('_')));
    }
}
