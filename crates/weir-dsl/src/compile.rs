use crate::ast::{Chain, ChainHead, Literal, MethodCall, NodeDecl, Program, Statement, VarDecl};
use crate::lambda::Expr;
use crate::{Result, ScriptError};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::BTreeMap;
use weir_common::types::TaskType;

/// What flows along an edge: individual points or bounded batches. Checked
/// when chains are linked; a mismatch is a compile error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Stream,
    Batch,
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeKind::Stream => write!(f, "stream"),
            EdgeKind::Batch => write!(f, "batch"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Mean,
    Min,
    Max,
    First,
    Last,
    Percentile,
}

impl AggFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Mean => "mean",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::First => "first",
            AggFunc::Last => "last",
            AggFunc::Percentile => "percentile",
        }
    }
}

/// Inline notification shortcut attached to an alert node.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertNodeAction {
    Log(String),
    Tcp(String),
    Post(String),
    Exec(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlertSpec {
    pub topic: Option<String>,
    pub id_tmpl: Option<String>,
    pub message_tmpl: Option<String>,
    pub details_tmpl: Option<String>,
    pub info: Option<Expr>,
    pub warn: Option<Expr>,
    pub crit: Option<Expr>,
    pub ok: Option<Expr>,
    pub state_changes_only: bool,
    pub actions: Vec<AlertNodeAction>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    StreamSource,
    BatchSource,
    From {
        measurement: Option<String>,
        where_expr: Option<Expr>,
        group_by: Vec<String>,
        group_by_star: bool,
    },
    Query {
        query: String,
        period: i64,
        every: i64,
        align: bool,
        cluster: Option<String>,
        group_by: Vec<String>,
    },
    Window {
        period: i64,
        every: i64,
        align: bool,
    },
    GroupBy {
        dims: Vec<String>,
        star: bool,
    },
    Where {
        predicate: Expr,
    },
    Eval {
        exprs: Vec<Expr>,
        as_names: Vec<String>,
    },
    Aggregate {
        func: AggFunc,
        field: String,
        as_name: Option<String>,
        percentile: Option<f64>,
    },
    Join {
        tolerance: i64,
        names: Vec<String>,
    },
    HttpOut {
        endpoint: String,
    },
    Alert(Box<AlertSpec>),
    Udf {
        name: String,
        options: Vec<MethodCall>,
    },
}

#[derive(Debug, Clone)]
pub struct CompiledNode {
    /// Stable textual ID: `<kind><ordinal>`.
    pub id: String,
    pub kind: NodeKind,
}

/// The immutable compiled graph. Runtime execution state lives elsewhere,
/// keyed by node ID.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    pub graph: DiGraph<CompiledNode, EdgeKind>,
    pub task_type: TaskType,
    pub source: NodeIndex,
}

/// Compile-time environment: signatures of configured UDF functions,
/// `(wants, provides)` per function name.
#[derive(Debug, Clone, Default)]
pub struct CompileEnv {
    pub udf: BTreeMap<String, (EdgeKind, EdgeKind)>,
}

impl CompiledGraph {
    /// Nodes in a deterministic topological order.
    pub fn topo(&self) -> Vec<NodeIndex> {
        petgraph::algo::toposort(&self.graph, None).unwrap_or_default()
    }

    pub fn node(&self, idx: NodeIndex) -> &CompiledNode {
        &self.graph[idx]
    }

    pub fn children(&self, idx: NodeIndex) -> Vec<(NodeIndex, EdgeKind)> {
        let mut out: Vec<(NodeIndex, EdgeKind)> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (e.target(), *e.weight()))
            .collect();
        out.sort_by_key(|(idx, _)| idx.index());
        out
    }

    pub fn parents(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| e.source())
            .collect();
        out.sort_by_key(|idx| idx.index());
        out
    }

    /// Parents in edge-insertion order. For join nodes this is the primary
    /// chain followed by the join arguments, matching the `.as()` names.
    pub fn parents_in_order(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .raw_edges()
            .iter()
            .filter(|e| e.target() == idx)
            .map(|e| e.source())
            .collect()
    }

    pub fn find(&self, node_id: &str) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|idx| self.graph[*idx].id == node_id)
    }
}

struct Compiler<'a> {
    env: &'a CompileEnv,
    graph: DiGraph<CompiledNode, EdgeKind>,
    ordinal: usize,
    source: Option<(NodeIndex, TaskType)>,
    // chain-binding name -> (tail node, tail output kind)
    bindings: BTreeMap<String, (NodeIndex, EdgeKind)>,
}

/// Compiles a var-free program into the typed node graph.
pub fn compile(program: &Program, env: &CompileEnv) -> Result<CompiledGraph> {
    let mut compiler = Compiler {
        env,
        graph: DiGraph::new(),
        ordinal: 0,
        source: None,
        bindings: BTreeMap::new(),
    };
    for stmt in &program.statements {
        match stmt {
            Statement::Var(VarDecl::Chain { name, chain }) => {
                let tail = compiler.chain(chain)?;
                compiler.bindings.insert(name.clone(), tail);
            }
            Statement::Var(_) => {}
            Statement::Chain(chain) => {
                compiler.chain(chain)?;
            }
        }
    }
    let (source, task_type) = compiler
        .source
        .ok_or_else(|| ScriptError::Compile("script defines no stream or batch source".into()))?;
    Ok(CompiledGraph {
        graph: compiler.graph,
        task_type,
        source,
    })
}

fn compile_err(msg: impl Into<String>) -> ScriptError {
    ScriptError::Compile(msg.into())
}

impl Compiler<'_> {
    fn add_node(&mut self, name: &str, kind: NodeKind) -> NodeIndex {
        let id = format!("{name}{}", self.ordinal);
        self.ordinal += 1;
        self.graph.add_node(CompiledNode { id, kind })
    }

    fn chain(&mut self, chain: &Chain) -> Result<(NodeIndex, EdgeKind)> {
        let (mut cur, mut kind) = match &chain.head {
            ChainHead::Source(t) => self.source_node(*t)?,
            ChainHead::Ref(name) => *self.bindings.get(name).ok_or_else(|| {
                ScriptError::MissingVar(name.clone())
            })?,
        };
        for decl in &chain.nodes {
            let (idx, out_kind) = self.node(decl, cur, kind)?;
            cur = idx;
            kind = out_kind;
        }
        Ok((cur, kind))
    }

    fn source_node(&mut self, t: TaskType) -> Result<(NodeIndex, EdgeKind)> {
        if let Some((idx, existing)) = self.source {
            if existing != t {
                return Err(compile_err(
                    "script cannot mix stream and batch sources".to_string(),
                ));
            }
            let kind = match t {
                TaskType::Stream => EdgeKind::Stream,
                TaskType::Batch => EdgeKind::Batch,
            };
            return Ok((idx, kind));
        }
        let (name, kind) = match t {
            TaskType::Stream => ("stream", EdgeKind::Stream),
            TaskType::Batch => ("batch", EdgeKind::Batch),
        };
        let idx = self.add_node(
            name,
            match t {
                TaskType::Stream => NodeKind::StreamSource,
                TaskType::Batch => NodeKind::BatchSource,
            },
        );
        self.source = Some((idx, t));
        Ok((idx, kind))
    }

    fn node(
        &mut self,
        decl: &NodeDecl,
        parent: NodeIndex,
        in_kind: EdgeKind,
    ) -> Result<(NodeIndex, EdgeKind)> {
        if decl.udf {
            return self.udf_node(decl, parent, in_kind);
        }
        let (kind, wants, provides, extra_parents) = self.build_kind(decl, in_kind)?;
        if wants != in_kind {
            return Err(compile_err(format!(
                "cannot connect {in_kind} edge to node {}: it wants {wants} data",
                decl.name
            )));
        }
        if matches!(kind, NodeKind::Query { .. })
            && self.source.map(|(idx, _)| idx) != Some(parent)
        {
            return Err(compile_err(
                "query nodes must connect directly to the batch source",
            ));
        }
        let idx = self.add_node(&decl.name, kind);
        self.graph.add_edge(parent, idx, in_kind);
        for (extra, extra_kind) in extra_parents {
            self.graph.add_edge(extra, idx, extra_kind);
        }
        Ok((idx, provides))
    }

    fn udf_node(
        &mut self,
        decl: &NodeDecl,
        parent: NodeIndex,
        in_kind: EdgeKind,
    ) -> Result<(NodeIndex, EdgeKind)> {
        let (wants, provides) = *self
            .env
            .udf
            .get(&decl.name)
            .ok_or_else(|| ScriptError::UnknownUdf(decl.name.clone()))?;
        if wants != in_kind {
            return Err(compile_err(format!(
                "cannot connect {in_kind} edge to UDF {}: it wants {wants} data",
                decl.name
            )));
        }
        let idx = self.add_node(
            &decl.name,
            NodeKind::Udf {
                name: decl.name.clone(),
                options: decl.props.clone(),
            },
        );
        self.graph.add_edge(parent, idx, in_kind);
        Ok((idx, provides))
    }

    #[allow(clippy::type_complexity)]
    fn build_kind(
        &mut self,
        decl: &NodeDecl,
        in_kind: EdgeKind,
    ) -> Result<(NodeKind, EdgeKind, EdgeKind, Vec<(NodeIndex, EdgeKind)>)> {
        use EdgeKind::*;
        let name = decl.name.as_str();
        let node = match name {
            "from" => {
                expect_args(decl, 0)?;
                let mut measurement = None;
                let mut where_expr = None;
                let mut group_by = Vec::new();
                let mut group_by_star = false;
                for prop in &decl.props {
                    match prop.name.as_str() {
                        "measurement" => measurement = Some(str_arg(prop, 0)?),
                        "where" => where_expr = Some(lambda_arg(prop, 0)?),
                        "groupBy" => parse_group_by(prop, &mut group_by, &mut group_by_star)?,
                        other => return Err(unknown_prop(name, other)),
                    }
                }
                (
                    NodeKind::From {
                        measurement,
                        where_expr,
                        group_by,
                        group_by_star,
                    },
                    Stream,
                    Stream,
                )
            }
            "query" => {
                let query = decl_str_arg(decl, 0)?;
                let mut period = 0;
                let mut every = 0;
                let mut align = false;
                let mut cluster = None;
                let mut group_by = Vec::new();
                let mut star = false;
                for prop in &decl.props {
                    match prop.name.as_str() {
                        "period" => period = duration_arg(prop, 0)?,
                        "every" => every = duration_arg(prop, 0)?,
                        "align" => align = true,
                        "cluster" => cluster = Some(str_arg(prop, 0)?),
                        "groupBy" => parse_group_by(prop, &mut group_by, &mut star)?,
                        other => return Err(unknown_prop(name, other)),
                    }
                }
                if period <= 0 || every <= 0 {
                    return Err(compile_err("query node requires .period() and .every()"));
                }
                (
                    NodeKind::Query {
                        query,
                        period,
                        every,
                        align,
                        cluster,
                        group_by,
                    },
                    Batch,
                    Batch,
                )
            }
            "window" => {
                expect_args(decl, 0)?;
                let mut period = 0;
                let mut every = 0;
                let mut align = false;
                for prop in &decl.props {
                    match prop.name.as_str() {
                        "period" => period = duration_arg(prop, 0)?,
                        "every" => every = duration_arg(prop, 0)?,
                        "align" => align = true,
                        other => return Err(unknown_prop(name, other)),
                    }
                }
                if period <= 0 {
                    return Err(compile_err("window node requires .period()"));
                }
                if every <= 0 {
                    every = period;
                }
                (
                    NodeKind::Window {
                        period,
                        every,
                        align,
                    },
                    Stream,
                    Batch,
                )
            }
            "groupBy" => {
                let mut dims = Vec::new();
                let mut star = false;
                for arg in &decl.args {
                    match arg {
                        Literal::Str(s) => dims.push(s.clone()),
                        Literal::Star => star = true,
                        other => {
                            return Err(compile_err(format!(
                                "groupBy accepts tag names or *, found {}",
                                other.type_name()
                            )))
                        }
                    }
                }
                no_props(decl)?;
                (NodeKind::GroupBy { dims, star }, in_kind, in_kind)
            }
            "where" => {
                let predicate = decl_lambda_arg(decl, 0)?;
                no_props(decl)?;
                (NodeKind::Where { predicate }, in_kind, in_kind)
            }
            "eval" => {
                let mut exprs = Vec::new();
                for (i, arg) in decl.args.iter().enumerate() {
                    match arg {
                        Literal::Lambda(e) => exprs.push(e.clone()),
                        other => {
                            return Err(compile_err(format!(
                                "eval argument {i} must be a lambda, found {}",
                                other.type_name()
                            )))
                        }
                    }
                }
                let mut as_names = Vec::new();
                for prop in &decl.props {
                    match prop.name.as_str() {
                        "as" => {
                            for (i, _) in prop.args.iter().enumerate() {
                                as_names.push(prop_str_arg(prop, i)?);
                            }
                        }
                        other => return Err(unknown_prop(name, other)),
                    }
                }
                if as_names.len() != exprs.len() {
                    return Err(compile_err(
                        "eval requires one .as() name per expression",
                    ));
                }
                (NodeKind::Eval { exprs, as_names }, in_kind, in_kind)
            }
            "count" | "sum" | "mean" | "min" | "max" | "first" | "last" | "percentile" => {
                let func = match name {
                    "count" => AggFunc::Count,
                    "sum" => AggFunc::Sum,
                    "mean" => AggFunc::Mean,
                    "min" => AggFunc::Min,
                    "max" => AggFunc::Max,
                    "first" => AggFunc::First,
                    "last" => AggFunc::Last,
                    _ => AggFunc::Percentile,
                };
                let field = decl_str_arg(decl, 0)?;
                let percentile = if func == AggFunc::Percentile {
                    Some(decl_float_arg(decl, 1)?)
                } else {
                    None
                };
                let mut as_name = None;
                for prop in &decl.props {
                    match prop.name.as_str() {
                        "as" => as_name = Some(prop_str_arg(prop, 0)?),
                        other => return Err(unknown_prop(name, other)),
                    }
                }
                (
                    NodeKind::Aggregate {
                        func,
                        field,
                        as_name,
                        percentile,
                    },
                    Batch,
                    Batch,
                )
            }
            "join" => {
                let mut extra = Vec::new();
                for arg in &decl.args {
                    match arg {
                        Literal::Var(binding) => {
                            let (idx, kind) = *self.bindings.get(binding).ok_or_else(|| {
                                compile_err(format!("join references unknown chain {binding:?}"))
                            })?;
                            if kind != EdgeKind::Stream {
                                return Err(compile_err(
                                    "join accepts stream edges only".to_string(),
                                ));
                            }
                            extra.push((idx, kind));
                        }
                        other => {
                            return Err(compile_err(format!(
                                "join arguments must reference chains, found {}",
                                other.type_name()
                            )))
                        }
                    }
                }
                let mut tolerance = 0;
                let mut names = Vec::new();
                for prop in &decl.props {
                    match prop.name.as_str() {
                        "tolerance" => tolerance = duration_arg(prop, 0)?,
                        "as" => {
                            for (i, _) in prop.args.iter().enumerate() {
                                names.push(prop_str_arg(prop, i)?);
                            }
                        }
                        other => return Err(unknown_prop(name, other)),
                    }
                }
                if names.len() != extra.len() + 1 {
                    return Err(compile_err(
                        "join requires one .as() name per joined stream",
                    ));
                }
                let kind = NodeKind::Join { tolerance, names };
                if in_kind != Stream {
                    return Err(compile_err(format!(
                        "cannot connect {in_kind} edge to node join: it wants stream data"
                    )));
                }
                return Ok((kind, Stream, Stream, extra));
            }
            "httpOut" => {
                let endpoint = decl_str_arg(decl, 0)?;
                no_props(decl)?;
                (NodeKind::HttpOut { endpoint }, in_kind, in_kind)
            }
            "alert" => {
                expect_args(decl, 0)?;
                let mut spec = AlertSpec::default();
                for prop in &decl.props {
                    match prop.name.as_str() {
                        "topic" => spec.topic = Some(prop_str_arg(prop, 0)?),
                        "id" => spec.id_tmpl = Some(prop_str_arg(prop, 0)?),
                        "message" => spec.message_tmpl = Some(prop_str_arg(prop, 0)?),
                        "details" => spec.details_tmpl = Some(prop_str_arg(prop, 0)?),
                        "info" => spec.info = Some(lambda_arg(prop, 0)?),
                        "warn" => spec.warn = Some(lambda_arg(prop, 0)?),
                        "crit" => spec.crit = Some(lambda_arg(prop, 0)?),
                        "ok" => spec.ok = Some(lambda_arg(prop, 0)?),
                        "stateChangesOnly" => spec.state_changes_only = true,
                        "log" => spec.actions.push(AlertNodeAction::Log(prop_str_arg(prop, 0)?)),
                        "tcp" => spec.actions.push(AlertNodeAction::Tcp(prop_str_arg(prop, 0)?)),
                        "post" => spec.actions.push(AlertNodeAction::Post(prop_str_arg(prop, 0)?)),
                        "exec" => {
                            let mut cmd = Vec::new();
                            for (i, _) in prop.args.iter().enumerate() {
                                cmd.push(prop_str_arg(prop, i)?);
                            }
                            if cmd.is_empty() {
                                return Err(compile_err(".exec() requires a command"));
                            }
                            spec.actions.push(AlertNodeAction::Exec(cmd));
                        }
                        other => return Err(unknown_prop(name, other)),
                    }
                }
                (NodeKind::Alert(Box::new(spec)), in_kind, in_kind)
            }
            other => return Err(compile_err(format!("unknown node type {other:?}"))),
        };
        let (kind, wants, provides) = node;
        Ok((kind, wants, provides, Vec::new()))
    }
}

fn expect_args(decl: &NodeDecl, n: usize) -> Result<()> {
    if decl.args.len() != n {
        return Err(compile_err(format!(
            "node {} takes {n} argument(s), found {}",
            decl.name,
            decl.args.len()
        )));
    }
    Ok(())
}

fn no_props(decl: &NodeDecl) -> Result<()> {
    if let Some(prop) = decl.props.first() {
        return Err(unknown_prop(&decl.name, &prop.name));
    }
    Ok(())
}

fn unknown_prop(node: &str, prop: &str) -> ScriptError {
    compile_err(format!("unknown property .{prop}() on node {node}"))
}

fn arg_at<'a>(name: &str, args: &'a [Literal], i: usize) -> Result<&'a Literal> {
    args.get(i)
        .ok_or_else(|| compile_err(format!("{name} is missing argument {i}")))
}

fn literal_str(name: &str, lit: &Literal) -> Result<String> {
    match lit {
        Literal::Str(s) => Ok(s.clone()),
        Literal::Var(v) => Err(ScriptError::MissingVar(v.clone())),
        other => Err(compile_err(format!(
            "{name} expects a string, found {}",
            other.type_name()
        ))),
    }
}

fn decl_str_arg(decl: &NodeDecl, i: usize) -> Result<String> {
    literal_str(&decl.name, arg_at(&decl.name, &decl.args, i)?)
}

fn decl_float_arg(decl: &NodeDecl, i: usize) -> Result<f64> {
    match arg_at(&decl.name, &decl.args, i)? {
        Literal::Float(f) => Ok(*f),
        Literal::Int(n) => Ok(*n as f64),
        Literal::Var(v) => Err(ScriptError::MissingVar(v.clone())),
        other => Err(compile_err(format!(
            "{} expects a number, found {}",
            decl.name,
            other.type_name()
        ))),
    }
}

fn decl_lambda_arg(decl: &NodeDecl, i: usize) -> Result<Expr> {
    match arg_at(&decl.name, &decl.args, i)? {
        Literal::Lambda(e) => Ok(e.clone()),
        Literal::Var(v) => Err(ScriptError::MissingVar(v.clone())),
        other => Err(compile_err(format!(
            "{} expects a lambda, found {}",
            decl.name,
            other.type_name()
        ))),
    }
}

fn str_arg(prop: &MethodCall, i: usize) -> Result<String> {
    prop_str_arg(prop, i)
}

fn prop_str_arg(prop: &MethodCall, i: usize) -> Result<String> {
    literal_str(&prop.name, arg_at(&prop.name, &prop.args, i)?)
}

fn duration_arg(prop: &MethodCall, i: usize) -> Result<i64> {
    match arg_at(&prop.name, &prop.args, i)? {
        Literal::Duration(ns) => Ok(*ns),
        Literal::Int(ns) => Ok(*ns),
        Literal::Var(v) => Err(ScriptError::MissingVar(v.clone())),
        other => Err(compile_err(format!(
            ".{}() expects a duration, found {}",
            prop.name,
            other.type_name()
        ))),
    }
}

fn lambda_arg(prop: &MethodCall, i: usize) -> Result<Expr> {
    match arg_at(&prop.name, &prop.args, i)? {
        Literal::Lambda(e) => Ok(e.clone()),
        Literal::Var(v) => Err(ScriptError::MissingVar(v.clone())),
        other => Err(compile_err(format!(
            ".{}() expects a lambda, found {}",
            prop.name,
            other.type_name()
        ))),
    }
}

fn parse_group_by(prop: &MethodCall, dims: &mut Vec<String>, star: &mut bool) -> Result<()> {
    for arg in &prop.args {
        match arg {
            Literal::Str(s) => dims.push(s.clone()),
            Literal::Star => *star = true,
            Literal::List(items) => {
                for item in items {
                    dims.push(literal_str(&prop.name, item)?);
                }
            }
            Literal::Var(v) => return Err(ScriptError::MissingVar(v.clone())),
            other => {
                return Err(compile_err(format!(
                    ".groupBy() accepts tag names or *, found {}",
                    other.type_name()
                )))
            }
        }
    }
    Ok(())
}
