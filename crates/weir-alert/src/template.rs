use std::collections::BTreeMap;
use std::sync::OnceLock;
use weir_common::types::{FieldValue, Level};

/// Context available to alert `id`, `message`, and `details` templates.
pub struct TemplateContext<'a> {
    pub id: &'a str,
    /// Measurement name of the triggering data.
    pub name: &'a str,
    pub task_name: &'a str,
    pub group: &'a str,
    pub level: Level,
    pub fields: &'a BTreeMap<String, FieldValue>,
    pub tags: &'a BTreeMap<String, String>,
}

pub const DEFAULT_ID_TEMPLATE: &str = "{{ .Name }}:{{ .Group }}";
pub const DEFAULT_MESSAGE_TEMPLATE: &str = "{{ .ID }} is {{ .Level }}";

fn placeholder_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(
            r#"\{\{\s*(?:index\s+\.(Fields|Tags)\s+"([^"]*)"|\.(ID|Name|TaskName|Group|Level))\s*\}\}"#,
        )
        .expect("static pattern")
    })
}

/// Renders the `{{ .Field }}` / `{{ index .Fields "name" }}` placeholder
/// forms. Unknown fields and tags render empty.
pub fn render(template: &str, ctx: &TemplateContext<'_>) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            if let Some(kind) = caps.get(1) {
                let key = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                match kind.as_str() {
                    "Fields" => ctx
                        .fields
                        .get(key)
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                    _ => ctx.tags.get(key).cloned().unwrap_or_default(),
                }
            } else {
                match caps.get(3).map(|m| m.as_str()).unwrap_or_default() {
                    "ID" => ctx.id.to_string(),
                    "Name" => ctx.name.to_string(),
                    "TaskName" => ctx.task_name.to_string(),
                    "Group" => ctx.group.to_string(),
                    "Level" => ctx.level.to_string(),
                    _ => String::new(),
                }
            }
        })
        .into_owned()
}
