use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use weir_common::types::FieldValue;

/// Compiled patterns, shared process-wide so each regex compiles once no
/// matter how many points flow through the expression.
fn compiled(pattern: &str) -> Option<regex::Regex> {
    static CACHE: OnceLock<Mutex<HashMap<String, Option<regex::Regex>>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = cache.lock().unwrap_or_else(|p| p.into_inner());
    cache
        .entry(pattern.to_string())
        .or_insert_with(|| regex::Regex::new(pattern).ok())
        .clone()
}

/// A lambda expression body, e.g. `"value" > 1.0 AND "host" == 'a'`.
///
/// Double-quoted identifiers reference fields (falling back to tags);
/// single-quoted strings are literals.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Field/tag reference.
    Ref(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Duration(i64),
    Regex(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    RegexMatch,
    RegexNotMatch,
}

/// Evaluation result. `Null` propagates from missing references; any
/// comparison against `Null` is false, so filters drop such points instead
/// of failing the task.
#[derive(Debug, Clone, PartialEq)]
pub enum LambdaValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Null,
}

impl LambdaValue {
    pub fn is_truthy(&self) -> bool {
        matches!(self, LambdaValue::Bool(true))
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            LambdaValue::Int(i) => Some(*i as f64),
            LambdaValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn to_field_value(&self) -> Option<FieldValue> {
        match self {
            LambdaValue::Int(i) => Some(FieldValue::Int(*i)),
            LambdaValue::Float(f) => Some(FieldValue::Float(*f)),
            LambdaValue::Bool(b) => Some(FieldValue::Bool(*b)),
            LambdaValue::Str(s) => Some(FieldValue::Str(s.clone())),
            LambdaValue::Null => None,
        }
    }
}

fn from_field(v: &FieldValue) -> LambdaValue {
    match v {
        FieldValue::Int(i) => LambdaValue::Int(*i),
        FieldValue::Float(f) => LambdaValue::Float(*f),
        FieldValue::Bool(b) => LambdaValue::Bool(*b),
        FieldValue::Str(s) => LambdaValue::Str(s.clone()),
    }
}

impl Expr {
    /// Evaluates the expression against a point's fields and tags.
    pub fn eval(
        &self,
        fields: &BTreeMap<String, FieldValue>,
        tags: &BTreeMap<String, String>,
    ) -> LambdaValue {
        match self {
            Expr::Ref(name) => fields
                .get(name)
                .map(from_field)
                .or_else(|| tags.get(name).cloned().map(LambdaValue::Str))
                .unwrap_or(LambdaValue::Null),
            Expr::Int(i) => LambdaValue::Int(*i),
            Expr::Float(f) => LambdaValue::Float(*f),
            Expr::Bool(b) => LambdaValue::Bool(*b),
            Expr::Str(s) => LambdaValue::Str(s.clone()),
            Expr::Duration(ns) => LambdaValue::Int(*ns),
            Expr::Regex(_) => LambdaValue::Null,
            Expr::Unary(op, inner) => {
                let v = inner.eval(fields, tags);
                match (op, v) {
                    (UnaryOp::Not, LambdaValue::Bool(b)) => LambdaValue::Bool(!b),
                    (UnaryOp::Neg, LambdaValue::Int(i)) => LambdaValue::Int(-i),
                    (UnaryOp::Neg, LambdaValue::Float(f)) => LambdaValue::Float(-f),
                    _ => LambdaValue::Null,
                }
            }
            Expr::Binary(op, lhs, rhs) => match op {
                BinaryOp::And => {
                    if !lhs.eval(fields, tags).is_truthy() {
                        return LambdaValue::Bool(false);
                    }
                    LambdaValue::Bool(rhs.eval(fields, tags).is_truthy())
                }
                BinaryOp::Or => {
                    if lhs.eval(fields, tags).is_truthy() {
                        return LambdaValue::Bool(true);
                    }
                    LambdaValue::Bool(rhs.eval(fields, tags).is_truthy())
                }
                BinaryOp::RegexMatch | BinaryOp::RegexNotMatch => {
                    let l = lhs.eval(fields, tags);
                    let pattern = match rhs.as_ref() {
                        Expr::Regex(p) => p.clone(),
                        Expr::Str(p) => p.clone(),
                        _ => return LambdaValue::Null,
                    };
                    let s = match l {
                        LambdaValue::Str(s) => s,
                        _ => return LambdaValue::Bool(false),
                    };
                    match compiled(&pattern) {
                        Some(re) => {
                            let matched = re.is_match(&s);
                            LambdaValue::Bool(if *op == BinaryOp::RegexMatch {
                                matched
                            } else {
                                !matched
                            })
                        }
                        None => LambdaValue::Null,
                    }
                }
                _ => {
                    let l = lhs.eval(fields, tags);
                    let r = rhs.eval(fields, tags);
                    eval_binary(*op, l, r)
                }
            },
        }
    }
}

fn eval_binary(op: BinaryOp, l: LambdaValue, r: LambdaValue) -> LambdaValue {
    use BinaryOp::*;
    if matches!(l, LambdaValue::Null) || matches!(r, LambdaValue::Null) {
        return match op {
            Eq | Neq | Lt | Lte | Gt | Gte => LambdaValue::Bool(false),
            _ => LambdaValue::Null,
        };
    }
    match op {
        Add | Sub | Mul | Div => {
            // Keep integer arithmetic exact when both sides are ints.
            if let (LambdaValue::Int(a), LambdaValue::Int(b)) = (&l, &r) {
                return match op {
                    Add => LambdaValue::Int(a + b),
                    Sub => LambdaValue::Int(a - b),
                    Mul => LambdaValue::Int(a * b),
                    Div if *b != 0 => LambdaValue::Int(a / b),
                    _ => LambdaValue::Null,
                };
            }
            match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => match op {
                    Add => LambdaValue::Float(a + b),
                    Sub => LambdaValue::Float(a - b),
                    Mul => LambdaValue::Float(a * b),
                    Div if b != 0.0 => LambdaValue::Float(a / b),
                    _ => LambdaValue::Null,
                },
                _ => LambdaValue::Null,
            }
        }
        Eq | Neq => {
            let eq = match (&l, &r) {
                (LambdaValue::Str(a), LambdaValue::Str(b)) => a == b,
                (LambdaValue::Bool(a), LambdaValue::Bool(b)) => a == b,
                _ => match (l.as_f64(), r.as_f64()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                },
            };
            LambdaValue::Bool(if op == Eq { eq } else { !eq })
        }
        Lt | Lte | Gt | Gte => {
            let ord = match (&l, &r) {
                (LambdaValue::Str(a), LambdaValue::Str(b)) => Some(a.cmp(b)),
                _ => match (l.as_f64(), r.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => None,
                },
            };
            match ord {
                Some(ord) => LambdaValue::Bool(match op {
                    Lt => ord.is_lt(),
                    Lte => ord.is_le(),
                    Gt => ord.is_gt(),
                    Gte => ord.is_ge(),
                    _ => unreachable!(),
                }),
                None => LambdaValue::Bool(false),
            }
        }
        And | Or | RegexMatch | RegexNotMatch => unreachable!("handled by caller"),
    }
}
