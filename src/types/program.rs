use super::ast::{Ast, CallNode, call};
use super::error::CompileError;
use super::executable::Executable;
use crate::config::EngineConfig;
use crate::registry::FunctionRegistry;

/// A single top-level definition of a rule program.
#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    /// `LET name := expr;`
    Let { name: String, expr: Ast },
    /// `WHEN condition THEN call, ...;` or, without a condition, unconditional
    /// statement calls.
    When {
        condition: Option<Ast>,
        calls: Vec<Ast>,
    },
}

/// An uncompiled rule program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub definitions: Vec<Definition>,
}

/// Builder for constructing a [`Program`] in code and compiling it.
///
/// # Example
///
/// ```
/// use sqrl::{FunctionRegistry, ProgramBuilder, call, constant, feature};
///
/// let registry = FunctionRegistry::with_stdlib().unwrap();
/// let executable = ProgramBuilder::new()
///     .input("Amount")
///     .feature("Doubled", call("add", vec![feature("Amount"), feature("Amount")]))
///     .feature("Label", call("concat", vec![constant("amount="), feature("Doubled")]))
///     .compile(&registry)
///     .unwrap();
/// assert_eq!(executable.features(), vec!["Amount", "Doubled", "Label"]);
/// ```
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a host-supplied input: `LET name := input();`.
    #[must_use]
    pub fn input(self, name: &str) -> Self {
        self.feature(name, call("input", vec![]))
    }

    /// Define a feature: `LET name := expr;`.
    #[must_use]
    pub fn feature(mut self, name: &str, expr: Ast) -> Self {
        self.program.definitions.push(Definition::Let {
            name: name.to_owned(),
            expr,
        });
        self
    }

    /// Execute a statement call unconditionally.
    #[must_use]
    pub fn execute(mut self, statement: Ast) -> Self {
        self.program.definitions.push(Definition::When {
            condition: None,
            calls: vec![statement],
        });
        self
    }

    /// `WHEN condition THEN statements;`
    #[must_use]
    pub fn when(mut self, condition: Ast, statements: Vec<Ast>) -> Self {
        self.program.definitions.push(Definition::When {
            condition: Some(condition),
            calls: statements,
        });
        self
    }

    #[must_use]
    pub fn build(self) -> Program {
        self.program
    }

    /// Compile against `registry`. The registry is sealed as a side effect.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] if validation fails.
    pub fn compile(self, registry: &FunctionRegistry) -> Result<Executable, CompileError> {
        self.program.compile(registry)
    }
}

impl Program {
    /// Compile this program into an [`Executable`].
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] if validation fails.
    pub fn compile(&self, registry: &FunctionRegistry) -> Result<Executable, CompileError> {
        self.compile_with_config(registry, EngineConfig::default())
    }

    /// Compile with an explicit engine config. The config bounds transform
    /// rewriting and becomes the executable's execution defaults.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] if validation fails.
    pub fn compile_with_config(
        &self,
        registry: &FunctionRegistry,
        config: EngineConfig,
    ) -> Result<Executable, CompileError> {
        let graph = crate::compile::compile(self, registry, config.max_transform_depth)?;
        Ok(Executable::new(graph, registry.clone()).with_config(config))
    }
}

impl Definition {
    /// Statement calls of a `WHEN` definition as call nodes. Non-call entries
    /// are reported by the compiler.
    pub(crate) fn statement_calls(calls: &[Ast]) -> impl Iterator<Item = Result<&CallNode, &Ast>> {
        calls.iter().map(|ast| match ast {
            Ast::Call(node) => Ok(node),
            other => Err(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{constant, feature};

    #[test]
    fn builder_collects_definitions() {
        let program = ProgramBuilder::new()
            .input("A")
            .feature("B", call("add", vec![feature("A"), constant(1_i64)]))
            .when(feature("B"), vec![call("log", vec![constant("b")])])
            .execute(call("log", vec![constant("always")]))
            .build();

        assert_eq!(program.definitions.len(), 4);
        assert_eq!(
            program.definitions[0],
            Definition::Let {
                name: "A".into(),
                expr: call("input", vec![]),
            }
        );
        assert!(matches!(
            &program.definitions[2],
            Definition::When { condition: Some(_), calls } if calls.len() == 1
        ));
        assert!(matches!(
            &program.definitions[3],
            Definition::When { condition: None, .. }
        ));
    }

    #[test]
    fn statement_calls_flags_non_calls() {
        let calls = vec![call("log", vec![]), feature("X")];
        let results: Vec<_> = Definition::statement_calls(&calls).collect();
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
