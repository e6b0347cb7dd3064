use thiserror::Error;

/// Errors raised while registering functions, statements, transforms or
/// packages. Registry errors are not recoverable: setup must stop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("function '{name}' is already registered{}", in_package(package.as_deref()))]
    DuplicateFunction {
        name: String,
        package: Option<String>,
    },

    #[error("transform has no name; transforms are registered under their declared name")]
    UnnamedTransform,

    #[error("function has no name")]
    UnnamedFunction,

    #[error("registry is already namespaced to package '{package}'")]
    AlreadyNamespaced { package: String },

    #[error("package '{name}' does not expose a register entry point")]
    InvalidPackage { name: String },

    #[error("cannot register '{name}': registry is sealed after compilation")]
    Sealed { name: String },
}

fn in_package(package: Option<&str>) -> String {
    package.map_or_else(String::new, |p| format!(" in package '{p}'"))
}

/// Errors produced while turning a program into a compiled graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("undefined feature reference '{reference}' in '{slot}'")]
    UndefinedFeatureRef { slot: String, reference: String },

    #[error("cyclic dependency detected: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("duplicate feature name '{name}'")]
    DuplicateFeature { name: String },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("function '{name}' is ambiguous; qualify it with one of: {}", packages.join(", "))]
    AmbiguousFunction { name: String, packages: Vec<String> },

    #[error("invalid arguments to '{function}': {message}")]
    ArgumentMismatch { function: String, message: String },

    #[error("statement '{function}' cannot be used as a value")]
    StatementAsValue { function: String },

    #[error("'{function}' is not a statement and cannot be executed in WHEN ... THEN")]
    NotAStatement { function: String },

    #[error("'{function}' does not accept custom syntax")]
    NotCustom { function: String },

    #[error("transform '{name}' failed: {message}")]
    Transform { name: String, message: String },

    #[error("transform rewriting of '{name}' exceeded {limit} passes")]
    TransformLimit { name: String, limit: usize },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A failure raised by a registered function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FunctionError {
    message: String,
}

impl FunctionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Run-time failures of a single slot. Cloneable so that a failed slot can be
/// memoized and handed to every caller that requests it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("cyclic dependency detected: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("feature '{feature}' exceeded the feature timeout of {timeout_ms}ms")]
    FeatureTimeout { feature: String, timeout_ms: u64 },

    #[error("unknown feature '{name}'")]
    UnknownFeature { name: String },

    #[error("unknown input '{name}'")]
    UnknownInput { name: String },

    #[error("function '{name}' is not registered")]
    UnknownFunction { name: String },

    #[error("statement '{statement}' requires a manipulator")]
    MissingManipulator { statement: String },

    #[error("'{function}' failed: {source}")]
    Function {
        function: String,
        #[source]
        source: FunctionError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_function_message() {
        let err = RegistryError::DuplicateFunction {
            name: "concat".into(),
            package: None,
        };
        assert_eq!(err.to_string(), "function 'concat' is already registered");

        let err = RegistryError::DuplicateFunction {
            name: "concat".into(),
            package: Some("strings".into()),
        };
        assert_eq!(
            err.to_string(),
            "function 'concat' is already registered in package 'strings'"
        );
    }

    #[test]
    fn already_namespaced_message() {
        let err = RegistryError::AlreadyNamespaced {
            package: "pkg".into(),
        };
        assert_eq!(err.to_string(), "registry is already namespaced to package 'pkg'");
    }

    #[test]
    fn cyclic_dependency_message() {
        let err = CompileError::CyclicDependency {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency detected: a -> b -> a");

        let err = ExecutionError::CyclicDependency {
            path: vec!["a".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency detected: a -> a");
    }

    #[test]
    fn undefined_feature_message() {
        let err = CompileError::UndefinedFeatureRef {
            slot: "Score".into(),
            reference: "Missing".into(),
        };
        assert_eq!(err.to_string(), "undefined feature reference 'Missing' in 'Score'");
    }

    #[test]
    fn feature_timeout_message() {
        let err = ExecutionError::FeatureTimeout {
            feature: "Slow".into(),
            timeout_ms: 0,
        };
        assert_eq!(
            err.to_string(),
            "feature 'Slow' exceeded the feature timeout of 0ms"
        );
    }

    #[test]
    fn function_error_message_and_source() {
        let err = ExecutionError::Function {
            function: "lookup".into(),
            source: FunctionError::new("backend unavailable"),
        };
        assert_eq!(err.to_string(), "'lookup' failed: backend unavailable");
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("backend unavailable"));
    }

    #[test]
    fn registry_error_converts_into_compile_error() {
        let err: CompileError = RegistryError::UnnamedTransform.into();
        assert!(matches!(err, CompileError::Registry(RegistryError::UnnamedTransform)));
    }
}
