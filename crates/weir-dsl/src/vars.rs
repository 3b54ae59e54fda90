use crate::ast::{Chain, Literal, Program, Statement, VarDecl};
use crate::{Result, ScriptError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared type of a script variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    Bool,
    Int,
    Float,
    Duration,
    String,
    Regex,
    Lambda,
    List,
    Star,
}

impl VarType {
    pub fn from_name(name: &str) -> Option<VarType> {
        match name {
            "bool" => Some(VarType::Bool),
            "int" => Some(VarType::Int),
            "float" => Some(VarType::Float),
            "duration" => Some(VarType::Duration),
            "string" => Some(VarType::String),
            "regex" => Some(VarType::Regex),
            "lambda" => Some(VarType::Lambda),
            "list" => Some(VarType::List),
            "star" => Some(VarType::Star),
            _ => None,
        }
    }
}

/// A var value as exchanged over the control plane:
/// `{"type":"string","value":"cpu","description":"..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarValue {
    #[serde(rename = "type")]
    pub var_type: VarType,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

pub type Vars = BTreeMap<String, VarValue>;

fn duration_from_json(name: &str, value: &serde_json::Value) -> Result<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().ok_or_else(|| ScriptError::BadVar {
            name: name.to_string(),
            msg: "duration must be an integer nanosecond count".to_string(),
        }),
        serde_json::Value::String(s) => {
            // Accept the script literal form: 10s, 5ms, ...
            match crate::parse::parse_duration(s) {
                Some(ns) => Ok(ns),
                None => Err(ScriptError::BadVar {
                    name: name.to_string(),
                    msg: format!("cannot parse duration {s:?}"),
                }),
            }
        }
        _ => Err(ScriptError::BadVar {
            name: name.to_string(),
            msg: "duration must be a number or duration string".to_string(),
        }),
    }
}

fn literal_from_value(name: &str, v: &VarValue) -> Result<Literal> {
    let bad = |msg: &str| ScriptError::BadVar {
        name: name.to_string(),
        msg: msg.to_string(),
    };
    Ok(match v.var_type {
        VarType::Bool => Literal::Bool(v.value.as_bool().ok_or_else(|| bad("expected bool"))?),
        VarType::Int => Literal::Int(v.value.as_i64().ok_or_else(|| bad("expected int"))?),
        VarType::Float => Literal::Float(
            v.value
                .as_f64()
                .ok_or_else(|| bad("expected float"))?,
        ),
        VarType::Duration => Literal::Duration(duration_from_json(name, &v.value)?),
        VarType::String => Literal::Str(
            v.value
                .as_str()
                .ok_or_else(|| bad("expected string"))?
                .to_string(),
        ),
        VarType::Regex => Literal::Regex(
            v.value
                .as_str()
                .ok_or_else(|| bad("expected regex string"))?
                .to_string(),
        ),
        VarType::Lambda => {
            let src = v.value.as_str().ok_or_else(|| bad("expected lambda string"))?;
            Literal::Lambda(crate::parse::parse_lambda(src)?)
        }
        VarType::Star => Literal::Star,
        VarType::List => {
            let items = v.value.as_array().ok_or_else(|| bad("expected list"))?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(match item {
                    serde_json::Value::String(s) => Literal::Str(s.clone()),
                    serde_json::Value::Number(n) if n.is_i64() => {
                        Literal::Int(n.as_i64().unwrap_or_default())
                    }
                    serde_json::Value::Number(n) => Literal::Float(n.as_f64().unwrap_or_default()),
                    _ => return Err(bad("list items must be strings or numbers")),
                });
            }
            Literal::List(out)
        }
    })
}

/// Description of one declared var, reported on template records.
#[derive(Debug, Clone, Serialize)]
pub struct DeclaredVar {
    #[serde(rename = "type")]
    pub var_type: String,
    pub value: serde_json::Value,
}

/// Declared vars of a template script: name -> {type, default}.
pub fn declared_vars(program: &Program) -> BTreeMap<String, DeclaredVar> {
    let mut out = BTreeMap::new();
    for (name, typ, default) in program.declared_vars() {
        let (var_type, value) = match (typ, default) {
            (Some(t), _) => (t.to_string(), serde_json::Value::Null),
            (None, Some(lit)) => (lit.type_name().to_string(), literal_to_json(lit)),
            (None, None) => continue,
        };
        out.insert(name.to_string(), DeclaredVar { var_type, value });
    }
    out
}

fn literal_to_json(lit: &Literal) -> serde_json::Value {
    match lit {
        Literal::Str(s) => serde_json::json!(s),
        Literal::Int(i) => serde_json::json!(i),
        Literal::Float(f) => serde_json::json!(f),
        Literal::Bool(b) => serde_json::json!(b),
        Literal::Duration(ns) => serde_json::json!(ns),
        Literal::Regex(p) => serde_json::json!(p),
        Literal::Lambda(_) => serde_json::Value::Null,
        Literal::Star => serde_json::json!("*"),
        Literal::List(items) => {
            serde_json::Value::Array(items.iter().map(literal_to_json).collect())
        }
        Literal::Var(_) => serde_json::Value::Null,
    }
}

/// Resolves every var reference in the program against the provided values
/// and declared defaults, producing a program free of `Literal::Var`.
///
/// A typed declaration with no provided value is a compile error:
/// `missing value for var "<name>".`
pub fn materialize(program: &Program, provided: &Vars) -> Result<Program> {
    let mut bindings: BTreeMap<String, Literal> = BTreeMap::new();
    for (name, typ, default) in program.declared_vars() {
        if let Some(v) = provided.get(name) {
            if let Some(declared) = typ.and_then(VarType::from_name) {
                if declared != v.var_type {
                    return Err(ScriptError::BadVar {
                        name: name.to_string(),
                        msg: format!(
                            "expected {} value, got {:?}",
                            typ.unwrap_or_default(),
                            v.var_type
                        ),
                    });
                }
            }
            bindings.insert(name.to_string(), literal_from_value(name, v)?);
        } else if let Some(default) = default {
            bindings.insert(name.to_string(), default.clone());
        } else {
            return Err(ScriptError::MissingVar(name.to_string()));
        }
    }

    let mut statements = Vec::with_capacity(program.statements.len());
    for stmt in &program.statements {
        statements.push(match stmt {
            Statement::Var(VarDecl::Chain { name, chain }) => Statement::Var(VarDecl::Chain {
                name: name.clone(),
                chain: resolve_chain(chain, &bindings)?,
            }),
            Statement::Var(decl) => Statement::Var(decl.clone()),
            Statement::Chain(chain) => Statement::Chain(resolve_chain(chain, &bindings)?),
        });
    }
    Ok(Program { statements })
}

fn resolve_chain(chain: &Chain, bindings: &BTreeMap<String, Literal>) -> Result<Chain> {
    let mut out = chain.clone();
    for node in &mut out.nodes {
        for arg in &mut node.args {
            resolve_literal(arg, bindings)?;
        }
        for prop in &mut node.props {
            for arg in &mut prop.args {
                resolve_literal(arg, bindings)?;
            }
        }
    }
    Ok(out)
}

fn resolve_literal(lit: &mut Literal, bindings: &BTreeMap<String, Literal>) -> Result<()> {
    if let Literal::Var(name) = lit {
        // Unbound names survive here: they may reference chain bindings
        // (join arguments). The compiler rejects any that remain.
        if let Some(bound) = bindings.get(name.as_str()) {
            *lit = bound.clone();
        }
    }
    Ok(())
}
