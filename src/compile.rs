use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::registry::{FunctionKind, FunctionRegistry};
use crate::types::{
    Ast, CallNode, CompileError, CompiledGraph, Definition, Program, Slot, SlotExpr,
};

/// The built-in marker for host-supplied inputs: `LET Name := input();`.
const INPUT: &str = "input";

/// Mutable compile-time state handed to custom transforms.
#[derive(Debug)]
pub struct CompileState {
    registry: FunctionRegistry,
    defined: HashSet<String>,
    pending: Vec<(String, Ast)>,
    counter: usize,
}

impl CompileState {
    fn new(registry: FunctionRegistry, defined: HashSet<String>) -> Self {
        Self {
            registry,
            defined,
            pending: Vec::new(),
            counter: 0,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Whether a feature with this name exists in the program so far.
    #[must_use]
    pub fn is_defined(&self, name: &str) -> bool {
        self.defined.contains(name)
    }

    /// Add a feature to the program being compiled. Its expression is
    /// rewritten and validated like any `LET` definition.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::DuplicateFeature`] if the name is taken.
    pub fn define_feature(&mut self, name: &str, expr: Ast) -> Result<(), CompileError> {
        if !self.defined.insert(name.to_owned()) {
            return Err(CompileError::DuplicateFeature {
                name: name.to_owned(),
            });
        }
        self.pending.push((name.to_owned(), expr));
        Ok(())
    }

    /// A feature name starting with `prefix` that is not yet defined.
    pub fn unique_name(&mut self, prefix: &str) -> String {
        loop {
            let name = format!("{prefix}#{}", self.counter);
            self.counter += 1;
            if !self.is_defined(&name) {
                return name;
            }
        }
    }
}

pub(crate) fn compile(
    program: &Program,
    registry: &FunctionRegistry,
    max_transform_depth: usize,
) -> Result<CompiledGraph, CompileError> {
    registry.seal();

    let defined = program
        .definitions
        .iter()
        .filter_map(|d| match d {
            Definition::Let { name, .. } => Some(name.clone()),
            Definition::When { .. } => None,
        })
        .collect();
    let mut state = CompileState::new(registry.clone(), defined);
    let mut slots = Vec::new();
    let mut statements = StatementGroups::default();

    for definition in &program.definitions {
        match definition {
            Definition::Let { name, expr } => {
                let expr = rewrite(expr.clone(), &mut state, max_transform_depth)?;
                slots.push(lower_let(name, expr, registry)?);
            }
            Definition::When { condition, calls } => {
                let condition = condition
                    .clone()
                    .map(|c| rewrite(c, &mut state, max_transform_depth))
                    .transpose()?
                    .map(|c| lower_value(c, registry))
                    .transpose()?;
                for call in Definition::statement_calls(calls) {
                    let call = call.map_err(|other| CompileError::NotAStatement {
                        function: other.to_string(),
                    })?;
                    let call = rewrite(Ast::Call(call.clone()), &mut state, max_transform_depth)?;
                    slots.push(statements.lower(condition.clone(), call, registry)?);
                }
            }
        }
    }

    // Features defined by custom transforms, which may define more.
    while !state.pending.is_empty() {
        for (name, expr) in std::mem::take(&mut state.pending) {
            let expr = rewrite(expr, &mut state, max_transform_depth)?;
            slots.push(lower_let(&name, expr, registry)?);
        }
    }

    slots.extend(statements.into_slots());

    let graph = CompiledGraph::from_slots(slots)?;
    if let Some(path) = (0..graph.len()).find_map(|i| graph.cycle_through(i)) {
        return Err(CompileError::CyclicDependency {
            path: path.to_vec(),
        });
    }

    let sorted = topological_order(&graph)
        .into_iter()
        .map(|i| graph.slot(i).clone())
        .collect();
    let graph = CompiledGraph::from_slots(sorted)?;
    debug!(slots = graph.len(), "program compiled");
    Ok(graph)
}

/// Statement slots grouped under their statement feature, in order of first
/// appearance.
#[derive(Default)]
struct StatementGroups {
    groups: Vec<(String, Vec<String>)>,
}

impl StatementGroups {
    fn lower(
        &mut self,
        condition: Option<SlotExpr>,
        call: Ast,
        registry: &FunctionRegistry,
    ) -> Result<Slot, CompileError> {
        let call = match call {
            Ast::Call(call) => call,
            other => {
                return Err(CompileError::NotAStatement {
                    function: other.to_string(),
                });
            }
        };
        let entry = registry.lookup(&call.func)?;
        let FunctionKind::Statement { feature, .. } = &entry.kind else {
            return Err(CompileError::NotAStatement {
                function: call.func.clone(),
            });
        };
        if let Some(args) = &entry.args {
            args.check(&entry.name, &call.args)?;
        }
        let args = lower_args(call.args, registry)?;

        let position = match self.groups.iter().position(|(name, _)| name == feature) {
            Some(position) => position,
            None => {
                self.groups.push((feature.clone(), Vec::new()));
                self.groups.len() - 1
            }
        };
        let members = &mut self.groups[position].1;
        let name = format!("{feature}#{}", members.len());
        members.push(name.clone());

        Ok(Slot::statement(
            &name,
            feature,
            condition,
            SlotExpr::call(&entry.qualified_name(), args),
        ))
    }

    fn into_slots(self) -> impl Iterator<Item = Slot> {
        self.groups
            .into_iter()
            .map(|(feature, members)| Slot::statement_group(&feature, members))
    }
}

fn lower_let(name: &str, expr: Ast, registry: &FunctionRegistry) -> Result<Slot, CompileError> {
    match expr {
        Ast::Call(CallNode { func, args }) if func == INPUT => {
            if !args.is_empty() {
                return Err(CompileError::ArgumentMismatch {
                    function: INPUT.to_owned(),
                    message: format!("expected no arguments, got {}", args.len()),
                });
            }
            Ok(Slot::input(name))
        }
        expr => Ok(Slot::feature(name, lower_value(expr, registry)?)),
    }
}

/// Lower a fully rewritten expression used as a value.
fn lower_value(ast: Ast, registry: &FunctionRegistry) -> Result<SlotExpr, CompileError> {
    match ast {
        Ast::Constant(value) => Ok(SlotExpr::Constant(value)),
        Ast::Feature(name) => Ok(SlotExpr::Feature(name)),
        Ast::List(items) => Ok(SlotExpr::List(lower_args(items, registry)?)),
        Ast::Call(call) => {
            if call.func == INPUT {
                return Err(CompileError::ArgumentMismatch {
                    function: INPUT.to_owned(),
                    message: "input() must be the whole definition of a LET".to_owned(),
                });
            }
            let entry = registry.lookup(&call.func)?;
            match &entry.kind {
                FunctionKind::Async(_) | FunctionKind::Sync(_) => {}
                FunctionKind::Statement { .. } => {
                    return Err(CompileError::StatementAsValue {
                        function: call.func,
                    });
                }
                FunctionKind::Custom(_) => {
                    return Err(CompileError::ArgumentMismatch {
                        function: call.func,
                        message: "requires custom syntax".to_owned(),
                    });
                }
                FunctionKind::Transform(_) => {
                    return Err(CompileError::Transform {
                        name: call.func,
                        message: "call site was not rewritten".to_owned(),
                    });
                }
            }
            if let Some(args) = &entry.args {
                args.check(&entry.name, &call.args)?;
            }
            Ok(SlotExpr::call(
                &entry.qualified_name(),
                lower_args(call.args, registry)?,
            ))
        }
        Ast::Custom(node) => Err(CompileError::NotCustom {
            function: node.func,
        }),
    }
}

fn lower_args(args: Vec<Ast>, registry: &FunctionRegistry) -> Result<Vec<SlotExpr>, CompileError> {
    args.into_iter().map(|a| lower_value(a, registry)).collect()
}

/// Rewrite call sites with registered transforms until nothing changes.
/// At most `limit` passes may apply a transform.
fn rewrite(ast: Ast, state: &mut CompileState, limit: usize) -> Result<Ast, CompileError> {
    let mut ast = ast;
    let mut last = None;
    for _ in 0..=limit {
        let mut applied = None;
        ast = rewrite_once(ast, state, &mut applied)?;
        match applied {
            None => return Ok(ast),
            Some(name) => last = Some(name),
        }
    }
    Err(CompileError::TransformLimit {
        name: last.unwrap_or_default(),
        limit,
    })
}

/// One bottom-up pass applying at most one transform per node. `applied`
/// receives the name of the last transform used.
fn rewrite_once(
    ast: Ast,
    state: &mut CompileState,
    applied: &mut Option<String>,
) -> Result<Ast, CompileError> {
    match ast {
        Ast::Constant(_) | Ast::Feature(_) => Ok(ast),
        Ast::List(items) => Ok(Ast::List(
            items
                .into_iter()
                .map(|i| rewrite_once(i, state, applied))
                .collect::<Result<_, _>>()?,
        )),
        Ast::Call(call) => {
            let args = call
                .args
                .into_iter()
                .map(|a| rewrite_once(a, state, applied))
                .collect::<Result<_, _>>()?;
            let call = CallNode {
                func: call.func,
                args,
            };
            let Ok(entry) = state.registry.lookup(&call.func) else {
                return Ok(Ast::Call(call));
            };
            match &entry.kind {
                FunctionKind::Transform(transform) => {
                    let replaced = transform(&call)?;
                    *applied = Some(call.func);
                    Ok(replaced)
                }
                _ => Ok(Ast::Call(call)),
            }
        }
        Ast::Custom(node) => {
            let entry = state.registry.lookup(&node.func)?;
            let FunctionKind::Custom(transform) = &entry.kind else {
                return Err(CompileError::NotCustom {
                    function: node.func,
                });
            };
            let replaced = transform(&node, state)?;
            *applied = Some(node.func);
            Ok(replaced)
        }
    }
}

/// Kahn's algorithm, always emitting the earliest declared ready slot so
/// that independent slots keep their declaration order.
fn topological_order(graph: &CompiledGraph) -> Vec<usize> {
    let mut in_degree: Vec<usize> = (0..graph.len())
        .map(|i| graph.dependencies(i).len())
        .collect();
    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    for index in 0..graph.len() {
        for &dep in graph.dependencies(index) {
            dependents.entry(dep).or_default().push(index);
        }
    }

    let mut ready: BTreeSet<usize> = (0..graph.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut sorted = Vec::with_capacity(graph.len());
    while let Some(index) = ready.pop_first() {
        sorted.push(index);
        for &dependent in dependents.get(&index).into_iter().flatten() {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }
    sorted
}
