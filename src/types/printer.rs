use std::fmt;
use std::sync::Arc;

use super::graph::CompiledGraph;
use super::slot::{Slot, SlotKind};

/// Pretty-printer rendering a compiled graph back to rule source.
///
/// Statement groups are implicit in the source form and are not printed.
/// Every statement is printed as its own `WHEN`/`EXECUTE` line.
#[derive(Debug, Clone)]
pub struct SourcePrinter {
    graph: Arc<CompiledGraph>,
}

impl SourcePrinter {
    pub(crate) fn new(graph: Arc<CompiledGraph>) -> Self {
        Self { graph }
    }

    /// The whole graph, one definition per line, in graph order.
    #[must_use]
    pub fn print_all(&self) -> String {
        self.graph
            .slots()
            .filter_map(render)
            .map(|line| line + "\n")
            .collect()
    }

    /// Source of a single slot. `None` for unknown names and statement groups.
    #[must_use]
    pub fn print_feature(&self, name: &str) -> Option<String> {
        self.graph.get(name).and_then(render)
    }
}

impl fmt::Display for SourcePrinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.print_all())
    }
}

fn render(slot: &Slot) -> Option<String> {
    match &slot.kind {
        SlotKind::Input => Some(format!("LET {} := input();", slot.name)),
        SlotKind::Feature(expr) => Some(format!("LET {} := {expr};", slot.name)),
        SlotKind::Statement {
            condition: Some(condition),
            call,
            ..
        } => Some(format!("WHEN {condition} THEN {call};")),
        SlotKind::Statement {
            condition: None,
            call,
            ..
        } => Some(format!("EXECUTE {call};")),
        SlotKind::StatementGroup => None,
    }
}
