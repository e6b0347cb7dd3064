mod ast;
mod context;
mod error;
mod executable;
mod execution_report;
mod graph;
mod options;
mod printer;
mod program;
mod slot;
mod value;

pub use ast::{Ast, CallNode, CustomNode, call, constant, custom, feature, list};
pub use context::Context;
pub use error::{CompileError, ExecutionError, FunctionError, RegistryError};
pub use executable::Executable;
pub use execution_report::ExecutionReport;
pub use graph::CompiledGraph;
pub use options::ExecuteOptions;
pub use printer::SourcePrinter;
pub use program::{Definition, Program, ProgramBuilder};
pub use slot::{Slot, SlotExpr, SlotKind};
pub use value::{Entity, SqrlKey, Value};
