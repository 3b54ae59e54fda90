use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::Value;

/// One JSON-Patch operation as accepted by handler PATCH requests.
/// Supported operations: `add`, `remove`, `replace`; `-` appends to lists.
#[derive(Debug, Clone, Deserialize)]
pub struct PatchOp {
    #[serde(alias = "operation")]
    pub op: String,
    pub path: String,
    #[serde(default)]
    pub value: Value,
}

/// Applies the patch in order against the document; any failing operation
/// aborts the whole patch.
pub fn apply(doc: &mut Value, patch: &[PatchOp]) -> Result<()> {
    for op in patch {
        apply_one(doc, op)?;
    }
    Ok(())
}

fn apply_one(doc: &mut Value, op: &PatchOp) -> Result<()> {
    let tokens: Vec<&str> = op
        .path
        .strip_prefix('/')
        .ok_or_else(|| anyhow!("patch path must start with '/': {:?}", op.path))?
        .split('/')
        .collect();
    let (last, parents) = tokens
        .split_last()
        .ok_or_else(|| anyhow!("empty patch path"))?;

    let mut cur = doc;
    for token in parents {
        cur = descend(cur, token)?;
    }

    match op.op.as_str() {
        "add" => match cur {
            Value::Array(items) => {
                if *last == "-" {
                    items.push(op.value.clone());
                } else {
                    let idx: usize = last.parse()?;
                    if idx > items.len() {
                        return Err(anyhow!("index {idx} out of bounds"));
                    }
                    items.insert(idx, op.value.clone());
                }
                Ok(())
            }
            Value::Object(map) => {
                map.insert((*last).to_string(), op.value.clone());
                Ok(())
            }
            _ => Err(anyhow!("cannot add into {:?}", op.path)),
        },
        "remove" => match cur {
            Value::Array(items) => {
                let idx: usize = last.parse()?;
                if idx >= items.len() {
                    return Err(anyhow!("index {idx} out of bounds"));
                }
                items.remove(idx);
                Ok(())
            }
            Value::Object(map) => {
                map.remove(*last)
                    .ok_or_else(|| anyhow!("no such member {last:?}"))?;
                Ok(())
            }
            _ => Err(anyhow!("cannot remove from {:?}", op.path)),
        },
        "replace" => {
            let target = descend(cur, last)?;
            *target = op.value.clone();
            Ok(())
        }
        other => Err(anyhow!("unsupported patch operation {other:?}")),
    }
}

fn descend<'a>(value: &'a mut Value, token: &str) -> Result<&'a mut Value> {
    match value {
        Value::Object(map) => map
            .get_mut(token)
            .ok_or_else(|| anyhow!("no such member {token:?}")),
        Value::Array(items) => {
            let idx: usize = token.parse()?;
            items
                .get_mut(idx)
                .ok_or_else(|| anyhow!("index {idx} out of bounds"))
        }
        _ => Err(anyhow!("cannot descend into scalar at {token:?}")),
    }
}
