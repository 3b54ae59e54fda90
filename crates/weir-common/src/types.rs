use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single field value carried by a point.
///
/// Integer and float values stay distinct through the whole pipeline so that
/// `count` results serialize as `15` and not `15.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Str(s) => write!(f, "{s}"),
        }
    }
}

/// A single time-series point admitted through the write path or produced by
/// an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub measurement: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub time: DateTime<Utc>,
}

/// A bounded table of points sharing one group, emitted by window and query
/// nodes. `tmax` is the window/query end and becomes the time of any
/// aggregation over the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub points: Vec<Point>,
    pub tmax: DateTime<Utc>,
}

/// A (database, retention policy) pair scoping a stream subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dbrp {
    pub db: String,
    pub rp: String,
}

impl std::fmt::Display for Dbrp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.db, self.rp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Stream,
    Batch,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::Stream => write!(f, "stream"),
            TaskType::Batch => write!(f, "batch"),
        }
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stream" => Ok(TaskType::Stream),
            "batch" => Ok(TaskType::Batch),
            _ => Err(format!("unknown task type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Disabled,
    Enabled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Disabled => write!(f, "disabled"),
            TaskStatus::Enabled => write!(f, "enabled"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(TaskStatus::Disabled),
            "enabled" => Ok(TaskStatus::Enabled),
            _ => Err(format!("unknown task status: {s}")),
        }
    }
}

/// Alert severity level. Ordering matters: comparisons drive the
/// highest-level-wins rule in alert evaluation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    #[default]
    Ok,
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Ok => write!(f, "OK"),
            Level::Info => write!(f, "INFO"),
            Level::Warning => write!(f, "WARNING"),
            Level::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl std::str::FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(Level::Ok),
            "INFO" => Ok(Level::Info),
            "WARNING" => Ok(Level::Warning),
            "CRITICAL" => Ok(Level::Critical),
            _ => Err(format!("unknown alert level: {s}")),
        }
    }
}

/// Snapshot of one alert event within a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventState {
    pub message: String,
    pub details: String,
    pub time: DateTime<Utc>,
    /// Time since the event first left OK, in nanoseconds.
    pub duration: i64,
    pub level: Level,
}

/// One row set in the JSON document served by httpOut endpoints and carried
/// on alert events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub columns: Vec<String>,
    pub values: Vec<Vec<serde_json::Value>>,
}

/// Result document in the upstream series format:
/// `{"series":[{"name":...,"columns":[...],"values":[[...]]}]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SeriesResult {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub series: Vec<Series>,
}

fn format_time(t: DateTime<Utc>) -> serde_json::Value {
    serde_json::Value::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn field_json(v: &FieldValue) -> serde_json::Value {
    match v {
        FieldValue::Int(i) => serde_json::json!(i),
        FieldValue::Float(f) => serde_json::json!(f),
        FieldValue::Bool(b) => serde_json::json!(b),
        FieldValue::Str(s) => serde_json::json!(s),
    }
}

impl Series {
    /// Renders a batch as one series. Column order is `time` followed by the
    /// union of field names in first-seen order.
    pub fn from_batch(batch: &Batch) -> Self {
        let mut columns = vec!["time".to_string()];
        for p in &batch.points {
            for name in p.fields.keys() {
                if !columns.iter().any(|c| c == name) {
                    columns.push(name.clone());
                }
            }
        }
        let values = batch
            .points
            .iter()
            .map(|p| {
                let mut row = Vec::with_capacity(columns.len());
                row.push(format_time(p.time));
                for col in &columns[1..] {
                    row.push(
                        p.fields
                            .get(col)
                            .map(field_json)
                            .unwrap_or(serde_json::Value::Null),
                    );
                }
                row
            })
            .collect();
        Series {
            name: batch.name.clone(),
            columns,
            values,
        }
    }

    pub fn from_point(point: &Point) -> Self {
        let batch = Batch {
            name: point.measurement.clone(),
            tags: point.tags.clone(),
            points: vec![point.clone()],
            tmax: point.time,
        };
        Series::from_batch(&batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn level_ordering() {
        assert!(Level::Ok < Level::Info);
        assert!(Level::Info < Level::Warning);
        assert!(Level::Warning < Level::Critical);
    }

    #[test]
    fn series_from_batch_renders_time_and_int_fields() {
        let t = Utc.timestamp_opt(10, 0).unwrap();
        let mut fields = BTreeMap::new();
        fields.insert("count".to_string(), FieldValue::Int(15));
        let batch = Batch {
            name: "test".to_string(),
            tags: BTreeMap::new(),
            points: vec![Point {
                measurement: "test".to_string(),
                tags: BTreeMap::new(),
                fields,
                time: t,
            }],
            tmax: t,
        };
        let doc = serde_json::to_string(&SeriesResult {
            series: vec![Series::from_batch(&batch)],
        })
        .unwrap();
        assert_eq!(
            doc,
            r#"{"series":[{"name":"test","columns":["time","count"],"values":[["1970-01-01T00:00:10Z",15]]}]}"#
        );
    }

    #[test]
    fn empty_series_result_renders_empty_document() {
        let doc = serde_json::to_string(&SeriesResult::default()).unwrap();
        assert_eq!(doc, "{}");
    }

    #[test]
    fn field_value_roundtrips_int_without_widening() {
        let v: FieldValue = serde_json::from_str("15").unwrap();
        assert_eq!(v, FieldValue::Int(15));
        assert_eq!(serde_json::to_string(&v).unwrap(), "15");
    }
}
