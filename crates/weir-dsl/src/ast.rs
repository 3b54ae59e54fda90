use crate::lambda::Expr;
use weir_common::types::TaskType;

/// A literal or variable reference appearing as a method argument or var
/// default.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Nanoseconds.
    Duration(i64),
    Regex(String),
    Lambda(Expr),
    Star,
    List(Vec<Literal>),
    /// Reference to a declared var, resolved during materialization.
    Var(String),
}

impl Literal {
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Str(_) => "string",
            Literal::Int(_) => "int",
            Literal::Float(_) => "float",
            Literal::Bool(_) => "bool",
            Literal::Duration(_) => "duration",
            Literal::Regex(_) => "regex",
            Literal::Lambda(_) => "lambda",
            Literal::Star => "star",
            Literal::List(_) => "list",
            Literal::Var(_) => "var",
        }
    }
}

/// A `.property(args)` refinement attached to a node.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub name: String,
    pub args: Vec<Literal>,
}

/// One `|node(args)` (or `@udf(args)`) link in a chain, with its property
/// methods.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDecl {
    pub name: String,
    pub args: Vec<Literal>,
    pub props: Vec<MethodCall>,
    pub udf: bool,
}

/// The head of a chain: a fresh source or a reference to a chain bound
/// earlier with `var name = ...`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainHead {
    Source(TaskType),
    Ref(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub head: ChainHead,
    pub nodes: Vec<NodeDecl>,
}

/// `var name <type>` (declaration), `var name = <literal>` (default), or
/// `var name = <chain>` (chain binding).
#[derive(Debug, Clone, PartialEq)]
pub enum VarDecl {
    Typed { name: String, var_type: String },
    Literal { name: String, value: Literal },
    Chain { name: String, chain: Chain },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Var(VarDecl),
    Chain(Chain),
}

/// A parsed script, prior to var materialization and compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl Program {
    /// The task type implied by the first source in the script.
    pub fn source_type(&self) -> Option<TaskType> {
        fn chain_source(chain: &Chain) -> Option<TaskType> {
            match chain.head {
                ChainHead::Source(t) => Some(t),
                ChainHead::Ref(_) => None,
            }
        }
        self.statements.iter().find_map(|s| match s {
            Statement::Var(VarDecl::Chain { chain, .. }) => chain_source(chain),
            Statement::Chain(chain) => chain_source(chain),
            _ => None,
        })
    }

    /// Names of typed var declarations in order, with any literal defaults.
    pub fn declared_vars(&self) -> Vec<(&str, Option<&str>, Option<&Literal>)> {
        self.statements
            .iter()
            .filter_map(|s| match s {
                Statement::Var(VarDecl::Typed { name, var_type }) => {
                    Some((name.as_str(), Some(var_type.as_str()), None))
                }
                Statement::Var(VarDecl::Literal { name, value }) => {
                    Some((name.as_str(), None, Some(value)))
                }
                _ => None,
            })
            .collect()
    }
}
