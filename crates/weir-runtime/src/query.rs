use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use weir_common::types::{Batch, FieldValue, Point};

/// Executes queries against an upstream time-series database. The HTTP
/// implementation below is the production path; tests substitute their own.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Runs `q` against the named cluster (or the default) and returns one
    /// batch per series. `stop` is the window end and becomes each batch's
    /// `tmax`.
    async fn query(&self, cluster: Option<&str>, q: &str, stop: DateTime<Utc>)
        -> Result<Vec<Batch>>;

    /// Connectivity check used by the service-test endpoint.
    async fn ping(&self, cluster: Option<&str>) -> Result<()>;
}

/// One configured upstream database connection.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub name: String,
    pub urls: Vec<String>,
    pub username: String,
    pub password: String,
    pub enabled: bool,
    pub default: bool,
    pub timeout: Duration,
}

/// Queries upstream databases over their HTTP `/query` endpoint.
pub struct HttpQueryExecutor {
    upstreams: Vec<UpstreamSettings>,
    client: reqwest::Client,
}

impl HttpQueryExecutor {
    pub fn new(upstreams: Vec<UpstreamSettings>) -> Self {
        Self {
            upstreams,
            client: reqwest::Client::new(),
        }
    }

    fn pick(&self, cluster: Option<&str>) -> Result<&UpstreamSettings> {
        let found = match cluster {
            Some(name) => self
                .upstreams
                .iter()
                .find(|u| u.name == name && u.enabled),
            None => self
                .upstreams
                .iter()
                .find(|u| u.default && u.enabled)
                .or_else(|| self.upstreams.iter().find(|u| u.enabled)),
        };
        found.ok_or_else(|| {
            anyhow!(
                "cluster {:?} is not enabled or does not exist",
                cluster.unwrap_or("default")
            )
        })
    }
}

#[async_trait]
impl QueryExecutor for HttpQueryExecutor {
    async fn query(
        &self,
        cluster: Option<&str>,
        q: &str,
        stop: DateTime<Utc>,
    ) -> Result<Vec<Batch>> {
        let upstream = self.pick(cluster)?;
        let url = upstream
            .urls
            .first()
            .ok_or_else(|| anyhow!("upstream {:?} has no URLs", upstream.name))?;
        let mut req = self
            .client
            .get(format!("{url}/query"))
            .query(&[("q", q)])
            .timeout(upstream.timeout);
        if !upstream.username.is_empty() {
            req = req.basic_auth(&upstream.username, Some(&upstream.password));
        }
        let resp = req.send().await.with_context(|| format!("query {url}"))?;
        if !resp.status().is_success() {
            return Err(anyhow!("upstream returned HTTP {}", resp.status()));
        }
        let body: serde_json::Value = resp.json().await.context("decode query response")?;
        if let Some(err) = body.get("error").and_then(|v| v.as_str()) {
            return Err(anyhow!("upstream error: {err}"));
        }
        parse_results(&body, stop)
    }

    async fn ping(&self, cluster: Option<&str>) -> Result<()> {
        let upstream = self.pick(cluster)?;
        let url = upstream
            .urls
            .first()
            .ok_or_else(|| anyhow!("upstream {:?} has no URLs", upstream.name))?;
        let resp = self
            .client
            .get(format!("{url}/ping"))
            .timeout(upstream.timeout)
            .send()
            .await
            .with_context(|| format!("ping {url}"))?;
        if resp.status().is_success() || resp.status().as_u16() == 204 {
            Ok(())
        } else {
            Err(anyhow!("upstream returned HTTP {}", resp.status()))
        }
    }
}

/// Adds the window's time bounds to the statement, extending an existing
/// WHERE clause when present.
pub fn bound_query(q: &str, start: DateTime<Utc>, stop: DateTime<Utc>) -> String {
    let start = start.to_rfc3339_opts(SecondsFormat::Nanos, true);
    let stop = stop.to_rfc3339_opts(SecondsFormat::Nanos, true);
    let condition = format!("time > '{start}' AND time <= '{stop}'");
    if q.to_ascii_lowercase().contains(" where ") {
        format!("{q} AND {condition}")
    } else {
        format!("{q} WHERE {condition}")
    }
}

fn parse_results(body: &serde_json::Value, stop: DateTime<Utc>) -> Result<Vec<Batch>> {
    let mut batches = Vec::new();
    let results = body
        .get("results")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    for result in &results {
        if let Some(err) = result.get("error").and_then(|v| v.as_str()) {
            return Err(anyhow!("upstream error: {err}"));
        }
        let series = result
            .get("series")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        for s in &series {
            let name = s
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let tags: BTreeMap<String, String> = s
                .get("tags")
                .and_then(|v| v.as_object())
                .map(|m| {
                    m.iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                        .collect()
                })
                .unwrap_or_default();
            let columns: Vec<String> = s
                .get("columns")
                .and_then(|v| v.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            let mut points = Vec::new();
            for row in s
                .get("values")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default()
            {
                let row = row.as_array().cloned().unwrap_or_default();
                let mut time = None;
                let mut fields = BTreeMap::new();
                for (col, value) in columns.iter().zip(row.iter()) {
                    if col == "time" {
                        time = parse_time(value);
                        continue;
                    }
                    let field = match value {
                        serde_json::Value::Number(n) => {
                            if let Some(i) = n.as_i64() {
                                if n.is_i64() && !n.is_f64() {
                                    FieldValue::Int(i)
                                } else {
                                    FieldValue::Float(n.as_f64().unwrap_or_default())
                                }
                            } else {
                                FieldValue::Float(n.as_f64().unwrap_or_default())
                            }
                        }
                        serde_json::Value::String(v) => FieldValue::Str(v.clone()),
                        serde_json::Value::Bool(b) => FieldValue::Bool(*b),
                        _ => continue,
                    };
                    fields.insert(col.clone(), field);
                }
                let Some(time) = time else { continue };
                points.push(Point {
                    measurement: name.clone(),
                    tags: tags.clone(),
                    fields,
                    time,
                });
            }
            batches.push(Batch {
                name,
                tags,
                points,
                tmax: stop,
            });
        }
    }
    Ok(batches)
}

fn parse_time(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(DateTime::from_timestamp_nanos),
        _ => None,
    }
}
