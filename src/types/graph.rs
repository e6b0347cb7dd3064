use std::collections::HashMap;

use super::error::CompileError;
use super::slot::{Slot, SlotKind};

/// An immutable graph of named slots, evaluated lazily by an
/// [`Execution`](crate::Execution).
///
/// Graphs built with [`from_slots`](Self::from_slots) are checked for
/// duplicate names and dangling references but not for cycles. Slots whose
/// dependency closure contains a cycle are recorded up front so the engine
/// can fail them with a cycle error instead of waiting on itself.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    slots: Vec<Slot>,
    indices: HashMap<String, usize>,
    dependencies: Vec<Vec<usize>>,
    cycles: Vec<Option<Vec<String>>>,
}

#[derive(Clone)]
enum Visit {
    Unvisited,
    InStack,
    Done(Option<Vec<String>>),
}

impl CompiledGraph {
    /// Build a graph from slots supplied by a front end.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::DuplicateFeature`] or
    /// [`CompileError::UndefinedFeatureRef`].
    pub fn from_slots(slots: Vec<Slot>) -> Result<Self, CompileError> {
        let mut indices = HashMap::with_capacity(slots.len());
        for (i, slot) in slots.iter().enumerate() {
            if indices.insert(slot.name.clone(), i).is_some() {
                return Err(CompileError::DuplicateFeature {
                    name: slot.name.clone(),
                });
            }
        }

        let dependencies = slots
            .iter()
            .map(|slot| {
                slot.deps
                    .iter()
                    .map(|dep| {
                        indices
                            .get(dep)
                            .copied()
                            .ok_or_else(|| CompileError::UndefinedFeatureRef {
                                slot: slot.name.clone(),
                                reference: dep.clone(),
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let cycles = find_cycles(&slots, &dependencies);

        Ok(Self {
            slots,
            indices,
            dependencies,
            cycles,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.indices.get(name).copied()
    }

    #[must_use]
    pub fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Slot> {
        self.index_of(name).map(|i| &self.slots[i])
    }

    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    pub(crate) fn dependencies(&self, index: usize) -> &[usize] {
        &self.dependencies[index]
    }

    /// The cycle reachable from this slot, if any.
    #[must_use]
    pub fn cycle_through(&self, index: usize) -> Option<&[String]> {
        self.cycles[index].as_deref()
    }

    /// Whether any slot reaches a cycle.
    #[must_use]
    pub fn is_acyclic(&self) -> bool {
        self.cycles.iter().all(Option::is_none)
    }

    /// Names of the host-supplied input slots, in graph order.
    #[must_use]
    pub fn inputs(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|s| matches!(s.kind, SlotKind::Input))
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// DFS over every slot; each slot records the first cycle reachable from it.
fn find_cycles(slots: &[Slot], dependencies: &[Vec<usize>]) -> Vec<Option<Vec<String>>> {
    let mut state = vec![Visit::Unvisited; slots.len()];
    let mut stack = Vec::new();
    for index in 0..slots.len() {
        if matches!(state[index], Visit::Unvisited) {
            visit(index, slots, dependencies, &mut state, &mut stack);
        }
    }
    state
        .into_iter()
        .map(|visit| match visit {
            Visit::Done(cycle) => cycle,
            Visit::Unvisited | Visit::InStack => None,
        })
        .collect()
}

fn visit(
    node: usize,
    slots: &[Slot],
    dependencies: &[Vec<usize>],
    state: &mut [Visit],
    stack: &mut Vec<usize>,
) -> Option<Vec<String>> {
    state[node] = Visit::InStack;
    stack.push(node);

    let mut found = None;
    for &next in &dependencies[node] {
        found = match &state[next] {
            Visit::InStack => {
                let pos = stack.iter().position(|&n| n == next).unwrap_or(0);
                let mut path: Vec<String> =
                    stack[pos..].iter().map(|&n| slots[n].name.clone()).collect();
                path.push(slots[next].name.clone());
                Some(path)
            }
            Visit::Done(cycle) => cycle.clone(),
            Visit::Unvisited => visit(next, slots, dependencies, state, stack),
        };
        if found.is_some() {
            break;
        }
    }

    stack.pop();
    state[node] = Visit::Done(found.clone());
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SlotExpr;

    fn add(deps: &[&str]) -> SlotExpr {
        SlotExpr::call("add", deps.iter().map(|d| SlotExpr::feature(d)).collect())
    }

    #[test]
    fn from_slots_indexes_by_name() {
        let graph = CompiledGraph::from_slots(vec![
            Slot::input("a"),
            Slot::feature("b", add(&["a"])),
        ])
        .unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.index_of("b"), Some(1));
        assert_eq!(graph.dependencies(1), &[0]);
        assert_eq!(graph.inputs(), vec!["a"]);
        assert!(graph.is_acyclic());
    }

    #[test]
    fn duplicate_slot_rejected() {
        let result = CompiledGraph::from_slots(vec![Slot::input("a"), Slot::input("a")]);
        assert!(matches!(result, Err(CompileError::DuplicateFeature { name }) if name == "a"));
    }

    #[test]
    fn dangling_reference_rejected() {
        let result = CompiledGraph::from_slots(vec![Slot::feature("b", add(&["missing"]))]);
        assert!(matches!(
            result,
            Err(CompileError::UndefinedFeatureRef { reference, .. }) if reference == "missing"
        ));
    }

    #[test]
    fn self_reference_is_recorded_as_cycle() {
        let graph = CompiledGraph::from_slots(vec![Slot::feature("a", add(&["a"]))]).unwrap();
        assert_eq!(
            graph.cycle_through(0),
            Some(&["a".to_owned(), "a".to_owned()][..])
        );
    }

    #[test]
    fn slots_reaching_a_cycle_are_marked() {
        let graph = CompiledGraph::from_slots(vec![
            Slot::feature("top", add(&["a"])),
            Slot::feature("a", add(&["b"])),
            Slot::feature("b", add(&["a"])),
            Slot::input("clean"),
        ])
        .unwrap();
        assert!(!graph.is_acyclic());
        assert!(graph.cycle_through(0).is_some());
        assert!(graph.cycle_through(1).is_some());
        assert!(graph.cycle_through(2).is_some());
        assert!(graph.cycle_through(3).is_none());
        let path = graph.cycle_through(0).unwrap();
        assert_eq!(path.first(), path.last());
    }

    #[test]
    fn diamond_is_acyclic() {
        let graph = CompiledGraph::from_slots(vec![
            Slot::input("d"),
            Slot::feature("b", add(&["d"])),
            Slot::feature("c", add(&["d"])),
            Slot::feature("a", add(&["b", "c"])),
        ])
        .unwrap();
        assert!(graph.is_acyclic());
    }
}
