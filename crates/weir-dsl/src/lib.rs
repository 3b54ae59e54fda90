//! Script front end: AST, parser, typed variables, lambda expressions, and
//! the compiler that turns a script into a typed operator graph.
//!
//! The parser consumes the pipeline DSL (`stream |from() ... |alert()`); the
//! compiler resolves variables, checks edge kinds, assigns stable node IDs
//! (`<kind><ordinal>`), and renders the diagnostic DOT text.

pub mod ast;
pub mod compile;
pub mod dot;
pub mod lambda;
pub mod parse;
pub mod vars;

#[cfg(test)]
mod tests;

pub use ast::{Chain, Literal, MethodCall, NodeDecl, Program, Statement, VarDecl};
pub use compile::{CompileEnv, CompiledGraph, CompiledNode, EdgeKind, NodeKind};
pub use lambda::{Expr, LambdaValue};
pub use vars::{VarType, VarValue, Vars};

/// Errors produced while parsing, materializing vars, or compiling a script.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("parse error at line {line}: {msg}")]
    Parse { line: usize, msg: String },

    #[error("missing value for var {0:?}.")]
    MissingVar(String),

    #[error("invalid value for var {name:?}: {msg}")]
    BadVar { name: String, msg: String },

    #[error("unknown UDF function {0:?}")]
    UnknownUdf(String),

    #[error("{0}")]
    Compile(String),
}

pub type Result<T> = std::result::Result<T, ScriptError>;
