//! Line-format write parser.
//!
//! This module is the seam to the wire format: the rest of the server only
//! sees [`weir_common::types::Point`] values. The accepted shape is
//! `measurement[,tag=value...] field=value[,field=value...] [timestamp]`,
//! one point per line.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use weir_common::types::{FieldValue, Point};

#[derive(Debug, thiserror::Error)]
#[error("invalid line {line}: {msg}")]
pub struct LineError {
    pub line: usize,
    pub msg: String,
}

/// Timestamp precision of the write request, from the `precision` query
/// parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl Precision {
    pub fn parse(s: &str) -> Option<Precision> {
        match s {
            "s" => Some(Precision::Seconds),
            "ms" => Some(Precision::Milliseconds),
            "u" | "us" => Some(Precision::Microseconds),
            "" | "ns" => Some(Precision::Nanoseconds),
            _ => None,
        }
    }

    fn to_nanos(self, ts: i64) -> i64 {
        match self {
            Precision::Seconds => ts.saturating_mul(1_000_000_000),
            Precision::Milliseconds => ts.saturating_mul(1_000_000),
            Precision::Microseconds => ts.saturating_mul(1_000),
            Precision::Nanoseconds => ts,
        }
    }
}

/// Parses a write body. Lines without a timestamp get `now`.
pub fn parse_points(
    body: &str,
    precision: Precision,
    now: DateTime<Utc>,
) -> Result<Vec<Point>, LineError> {
    let mut points = Vec::new();
    for (i, line) in body.lines().enumerate() {
        let line_no = i + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        points.push(parse_line(line, precision, now).map_err(|msg| LineError {
            line: line_no,
            msg,
        })?);
    }
    Ok(points)
}

fn parse_line(line: &str, precision: Precision, now: DateTime<Utc>) -> Result<Point, String> {
    let mut parts = split_unescaped(line, ' ');
    let key = parts.next().ok_or("missing measurement")?;
    let fields_part = parts.next().ok_or("missing fields")?;
    let ts_part = parts.next();
    if parts.next().is_some() {
        return Err("too many segments".to_string());
    }

    let mut key_parts = split_unescaped(key, ',');
    let measurement = unescape(key_parts.next().ok_or("missing measurement")?);
    if measurement.is_empty() {
        return Err("empty measurement".to_string());
    }
    let mut tags = BTreeMap::new();
    for tag in key_parts {
        let (k, v) = tag
            .split_once('=')
            .ok_or_else(|| format!("bad tag {tag:?}"))?;
        tags.insert(unescape(k), unescape(v));
    }

    let mut fields = BTreeMap::new();
    for field in split_unescaped(fields_part, ',') {
        let (k, v) = field
            .split_once('=')
            .ok_or_else(|| format!("bad field {field:?}"))?;
        fields.insert(unescape(k), parse_field_value(v)?);
    }
    if fields.is_empty() {
        return Err("at least one field is required".to_string());
    }

    let time = match ts_part {
        Some(ts) => {
            let raw: i64 = ts
                .parse()
                .map_err(|_| format!("bad timestamp {ts:?}"))?;
            DateTime::from_timestamp_nanos(precision.to_nanos(raw))
        }
        None => now,
    };

    Ok(Point {
        measurement,
        tags,
        fields,
        time,
    })
}

fn parse_field_value(v: &str) -> Result<FieldValue, String> {
    if let Some(stripped) = v.strip_prefix('"') {
        let inner = stripped
            .strip_suffix('"')
            .ok_or_else(|| format!("unterminated string {v:?}"))?;
        return Ok(FieldValue::Str(inner.replace("\\\"", "\"")));
    }
    match v {
        "t" | "T" | "true" | "True" | "TRUE" => return Ok(FieldValue::Bool(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Ok(FieldValue::Bool(false)),
        _ => {}
    }
    if let Some(int) = v.strip_suffix('i') {
        return int
            .parse()
            .map(FieldValue::Int)
            .map_err(|_| format!("bad integer {v:?}"));
    }
    v.parse()
        .map(FieldValue::Float)
        .map_err(|_| format!("bad value {v:?}"))
}

fn unescape(s: &str) -> String {
    s.replace("\\,", ",").replace("\\ ", " ").replace("\\=", "=")
}

/// Splits on `sep` outside of backslash escapes and double quotes.
fn split_unescaped(s: &str, sep: char) -> impl Iterator<Item = &str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    let mut quoted = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => quoted = !quoted,
            c if c == sep && !quoted => {
                if i > start {
                    out.push(&s[start..i]);
                }
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if start < s.len() {
        out.push(&s[start..]);
    }
    out.into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_simple_line_with_seconds_precision() {
        let now = Utc::now();
        let points = parse_points("test value=1 0000000010", Precision::Seconds, now).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].measurement, "test");
        assert_eq!(points[0].fields.get("value"), Some(&FieldValue::Float(1.0)));
        assert_eq!(points[0].time, Utc.timestamp_opt(10, 0).unwrap());
    }

    #[test]
    fn parses_tags_ints_strings_and_bools() {
        let now = Utc::now();
        let points = parse_points(
            "cpu,host=web-01,dc=east value=42i,msg=\"hello world\",up=true 1",
            Precision::Seconds,
            now,
        )
        .unwrap();
        let p = &points[0];
        assert_eq!(p.tags.get("host").map(String::as_str), Some("web-01"));
        assert_eq!(p.fields.get("value"), Some(&FieldValue::Int(42)));
        assert_eq!(
            p.fields.get("msg"),
            Some(&FieldValue::Str("hello world".to_string()))
        );
        assert_eq!(p.fields.get("up"), Some(&FieldValue::Bool(true)));
    }

    #[test]
    fn missing_timestamp_uses_now() {
        let now = Utc.timestamp_opt(100, 0).unwrap();
        let points = parse_points("test value=1", Precision::Nanoseconds, now).unwrap();
        assert_eq!(points[0].time, now);
    }

    #[test]
    fn bad_field_reports_line_number() {
        let err = parse_points("test value=1\ntest value=", Precision::Seconds, Utc::now())
            .unwrap_err();
        assert_eq!(err.line, 2);
    }
}
