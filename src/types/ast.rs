use std::fmt;

use super::Value;

/// Source-level expression tree, as produced by the parser or by
/// [`ProgramBuilder`](super::ProgramBuilder). Transforms rewrite it before it
/// is lowered into slots.
#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    Constant(Value),
    Feature(String),
    List(Vec<Ast>),
    Call(CallNode),
    /// A call whose arguments are not ordinary expressions. The raw text
    /// between the parentheses is handed to a custom transform.
    Custom(CustomNode),
}

/// A normal call site: `func(arg, ...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallNode {
    pub func: String,
    pub args: Vec<Ast>,
}

/// A custom-syntax call site: `func(<source>)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomNode {
    pub func: String,
    pub source: String,
}

impl Ast {
    /// Whether this node is a constant, including lists of constants.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        match self {
            Ast::Constant(_) => true,
            Ast::List(items) => items.iter().all(Ast::is_constant),
            _ => false,
        }
    }

    /// The value of a constant node.
    #[must_use]
    pub fn constant_value(&self) -> Option<Value> {
        match self {
            Ast::Constant(v) => Some(v.clone()),
            Ast::List(items) => items
                .iter()
                .map(Ast::constant_value)
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            _ => None,
        }
    }

    /// Names of all features referenced anywhere in this tree.
    #[must_use]
    pub fn feature_refs(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        collect_feature_refs(self, &mut refs);
        refs
    }
}

fn collect_feature_refs<'a>(ast: &'a Ast, refs: &mut Vec<&'a str>) {
    match ast {
        Ast::Feature(name) => refs.push(name),
        Ast::List(items) => items.iter().for_each(|i| collect_feature_refs(i, refs)),
        Ast::Call(call) => call.args.iter().for_each(|a| collect_feature_refs(a, refs)),
        Ast::Constant(_) | Ast::Custom(_) => {}
    }
}

impl fmt::Display for Ast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ast::Constant(v) => write!(f, "{v}"),
            Ast::Feature(name) => write!(f, "{name}"),
            Ast::List(items) => {
                write!(f, "[")?;
                write_comma_separated(f, items)?;
                write!(f, "]")
            }
            Ast::Call(call) => write!(f, "{call}"),
            Ast::Custom(custom) => write!(f, "{}({})", custom.func, custom.source),
        }
    }
}

impl fmt::Display for CallNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.func)?;
        write_comma_separated(f, &self.args)?;
        write!(f, ")")
    }
}

pub(crate) fn write_comma_separated<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    items: &[T],
) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

#[must_use]
pub fn constant(value: impl Into<Value>) -> Ast {
    Ast::Constant(value.into())
}

#[must_use]
pub fn feature(name: &str) -> Ast {
    Ast::Feature(name.to_owned())
}

#[must_use]
pub fn list(items: Vec<Ast>) -> Ast {
    Ast::List(items)
}

#[must_use]
pub fn call(func: &str, args: Vec<Ast>) -> Ast {
    Ast::Call(CallNode {
        func: func.to_owned(),
        args,
    })
}

#[must_use]
pub fn custom(func: &str, source: &str) -> Ast {
    Ast::Custom(CustomNode {
        func: func.to_owned(),
        source: source.to_owned(),
    })
}
