use thiserror::Error;

use crate::config::ConfigError;
use crate::manipulator::ManipulatorError;
use crate::parse::ParseError;
use crate::types::{CompileError, ExecutionError, RegistryError};

/// Unified error type covering every stage from setup to effects.
///
/// Returned by convenience methods like
/// [`Executable::from_source()`](crate::Executable::from_source) and
/// [`Executable::from_file()`](crate::Executable::from_file).
#[derive(Debug, Error)]
pub enum SqrlError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Manipulator(#[from] ManipulatorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "binary-cache")]
    #[error(transparent)]
    Serialize(#[from] crate::serial::SerializeError),

    #[cfg(feature = "binary-cache")]
    #[error(transparent)]
    Deserialize(#[from] crate::serial::DeserializeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_keep_the_message() {
        let err: SqrlError = ExecutionError::UnknownFeature { name: "X".into() }.into();
        assert_eq!(err.to_string(), "unknown feature 'X'");

        let err: SqrlError = crate::parse("LET").unwrap_err().into();
        assert!(matches!(err, SqrlError::Parse(_)));
    }

    #[test]
    fn question_mark_lifts_stage_errors() {
        fn setup() -> Result<crate::Executable, SqrlError> {
            let registry = crate::FunctionRegistry::with_stdlib()?;
            let program = crate::parse("LET A := missing(1);")?;
            Ok(program.compile(&registry)?)
        }
        assert!(matches!(
            setup(),
            Err(SqrlError::Compile(CompileError::UnknownFunction { .. }))
        ));
    }
}
