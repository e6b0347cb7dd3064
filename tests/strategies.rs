use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use proptest::sample::Index;
use sqrl::{Executable, FunctionOptions, FunctionRegistry, ProgramBuilder, Value, call, constant, feature};

/// A random acyclic program. Nodes `0..inputs.len()` are inputs `I{n}`; the
/// rest are features `F{n}` whose dependencies are earlier nodes.
#[derive(Debug, Clone)]
pub struct GenProgram {
    pub inputs: Vec<i64>,
    pub features: Vec<Vec<usize>>,
}

/// Invocation counts per feature name, filled in by the `track` function.
pub type Calls = Arc<Mutex<HashMap<String, usize>>>;

impl GenProgram {
    pub fn node_name(&self, node: usize) -> String {
        if node < self.inputs.len() {
            format!("I{node}")
        } else {
            format!("F{}", node - self.inputs.len())
        }
    }

    pub fn feature_names(&self) -> Vec<String> {
        (0..self.features.len()).map(|i| format!("F{i}")).collect()
    }

    /// Compile with a fresh registry whose `track(name, deps...)` returns
    /// `1 + sum(deps)` and counts its invocations per name.
    pub fn compile(&self) -> (Executable, Calls) {
        let calls: Calls = Arc::default();
        let registry = FunctionRegistry::with_stdlib().unwrap();
        let seen = Arc::clone(&calls);
        registry
            .register_sync(
                "track",
                move |_, args| {
                    *seen
                        .lock()
                        .unwrap()
                        .entry(args[0].to_plain_string())
                        .or_default() += 1;
                    let total: i64 = args[1..].iter().filter_map(Value::as_i64).sum();
                    Ok(Value::Int(total + 1))
                },
                FunctionOptions::new(),
            )
            .unwrap();

        let mut builder = ProgramBuilder::new();
        for i in 0..self.inputs.len() {
            builder = builder.input(&format!("I{i}"));
        }
        for (i, deps) in self.features.iter().enumerate() {
            let name = format!("F{i}");
            let mut args = vec![constant(name.as_str())];
            args.extend(deps.iter().map(|&d| feature(&self.node_name(d))));
            builder = builder.feature(&name, call("track", args));
        }
        (builder.compile(&registry).unwrap(), calls)
    }

    /// Values the features should resolve to.
    pub fn expected(&self) -> Vec<i64> {
        let mut values = self.inputs.clone();
        for deps in &self.features {
            let value = 1 + deps.iter().map(|&d| values[d]).sum::<i64>();
            values.push(value);
        }
        values.split_off(self.inputs.len())
    }

    pub fn inputs(&self) -> Vec<(String, i64)> {
        self.inputs
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("I{i}"), *v))
            .collect()
    }
}

pub fn arb_program() -> impl Strategy<Value = GenProgram> {
    (
        prop::collection::vec(-100_i64..100, 1..4),
        prop::collection::vec(prop::collection::vec(any::<Index>(), 0..4), 1..12),
    )
        .prop_map(|(inputs, raw)| {
            let features = raw
                .iter()
                .enumerate()
                .map(|(i, picks)| {
                    let available = inputs.len() + i;
                    picks.iter().map(|pick| pick.index(available)).collect()
                })
                .collect();
            GenProgram { inputs, features }
        })
}
