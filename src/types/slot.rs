use std::fmt;

use super::ast::write_comma_separated;
use super::value::Value;

/// Lowered expression stored in a feature or statement slot. Call nodes hold
/// the qualified name of a registered value or statement function.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotExpr {
    Constant(Value),
    Feature(String),
    List(Vec<SlotExpr>),
    Call { function: String, args: Vec<SlotExpr> },
}

/// What a slot computes.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotKind {
    /// Value supplied by the host per execution.
    Input,
    /// A computed value.
    Feature(SlotExpr),
    /// A side-effecting statement call, optionally guarded by a condition.
    Statement {
        feature: String,
        condition: Option<SlotExpr>,
        call: SlotExpr,
    },
    /// The statement feature: resolving it runs every statement attached to
    /// it. Its value is always `Null`.
    StatementGroup,
}

/// A named node of a [`CompiledGraph`](super::CompiledGraph).
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub name: String,
    pub kind: SlotKind,
    /// Names of the slots this slot reads, in declaration order.
    pub deps: Vec<String>,
}

impl SlotExpr {
    #[must_use]
    pub fn call(function: &str, args: Vec<SlotExpr>) -> Self {
        SlotExpr::Call {
            function: function.to_owned(),
            args,
        }
    }

    #[must_use]
    pub fn feature(name: &str) -> Self {
        SlotExpr::Feature(name.to_owned())
    }

    #[must_use]
    pub fn constant(value: impl Into<Value>) -> Self {
        SlotExpr::Constant(value.into())
    }

    pub(crate) fn collect_feature_refs(&self, out: &mut Vec<String>) {
        match self {
            SlotExpr::Feature(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            SlotExpr::List(items) => items.iter().for_each(|i| i.collect_feature_refs(out)),
            SlotExpr::Call { args, .. } => args.iter().for_each(|a| a.collect_feature_refs(out)),
            SlotExpr::Constant(_) => {}
        }
    }

    pub(crate) fn collect_functions<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            SlotExpr::Call { function, args } => {
                out.push(function);
                args.iter().for_each(|a| a.collect_functions(out));
            }
            SlotExpr::List(items) => items.iter().for_each(|i| i.collect_functions(out)),
            SlotExpr::Feature(_) | SlotExpr::Constant(_) => {}
        }
    }

    /// Like `collect_functions`, paired with each call's argument count.
    pub(crate) fn collect_calls<'a>(&'a self, out: &mut Vec<(&'a str, usize)>) {
        match self {
            SlotExpr::Call { function, args } => {
                out.push((function, args.len()));
                args.iter().for_each(|a| a.collect_calls(out));
            }
            SlotExpr::List(items) => items.iter().for_each(|i| i.collect_calls(out)),
            SlotExpr::Feature(_) | SlotExpr::Constant(_) => {}
        }
    }
}

impl Slot {
    #[must_use]
    pub fn input(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind: SlotKind::Input,
            deps: Vec::new(),
        }
    }

    /// A feature slot. Dependencies are the features `expr` references.
    #[must_use]
    pub fn feature(name: &str, expr: SlotExpr) -> Self {
        let mut deps = Vec::new();
        expr.collect_feature_refs(&mut deps);
        Self {
            name: name.to_owned(),
            kind: SlotKind::Feature(expr),
            deps,
        }
    }

    #[must_use]
    pub fn statement(
        name: &str,
        feature: &str,
        condition: Option<SlotExpr>,
        call: SlotExpr,
    ) -> Self {
        let mut deps = Vec::new();
        if let Some(cond) = &condition {
            cond.collect_feature_refs(&mut deps);
        }
        call.collect_feature_refs(&mut deps);
        Self {
            name: name.to_owned(),
            kind: SlotKind::Statement {
                feature: feature.to_owned(),
                condition,
                call,
            },
            deps,
        }
    }

    #[must_use]
    pub fn statement_group(name: &str, statements: Vec<String>) -> Self {
        Self {
            name: name.to_owned(),
            kind: SlotKind::StatementGroup,
            deps: statements,
        }
    }

    #[must_use]
    pub fn is_statement(&self) -> bool {
        matches!(self.kind, SlotKind::Statement { .. } | SlotKind::StatementGroup)
    }
}

impl fmt::Display for SlotExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotExpr::Constant(v) => write!(f, "{v}"),
            SlotExpr::Feature(name) => write!(f, "{name}"),
            SlotExpr::List(items) => {
                write!(f, "[")?;
                write_comma_separated(f, items)?;
                write!(f, "]")
            }
            SlotExpr::Call { function, args } => {
                write!(f, "{function}(")?;
                write_comma_separated(f, args)?;
                write!(f, ")")
            }
        }
    }
}
