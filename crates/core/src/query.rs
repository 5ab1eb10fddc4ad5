//! Path queries over JSON values.
//!
//! A query selects zero or more sub-values of a JSON document:
//!
//! | query            | input                                   | results        |
//! |------------------|-----------------------------------------|----------------|
//! | `` (empty)       | any value                               | the value      |
//! | `foo.bar`        | `{"foo": {"bar": "baz"}}`               | `"baz"`        |
//! | `*.bar`          | `{"a": {"bar": 1}, "b": {"bar": 2}}`    | `1`, `2`       |
//! | `foo[1]`         | `{"foo": [0, 2, 3]}`                    | `2`            |
//! | `foo[-1]`        | `{"foo": [0, 2, 3]}`                    | `3`            |
//! | `foo[0:-1]`      | `{"foo": [0, 2, 3]}`                    | `0`, `2`       |
//! | `foo[:]`         | `{"foo": [0, 2, 3]}`                    | `0`, `2`, `3`  |
//! | `'foo.bar'`      | `{"foo.bar": 1}`                        | `1`            |
//! | `foo:label`      | `{"foo": 1}`                            | `1` (labelled) |
//!
//! Every result carries the normalized path it was found at, so the same
//! location can be looked up again in a different document (e.g. a
//! historical value of the same feature).

use serde_json::Value;

use crate::error::{Result, TwinError};

/// A single value selected by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub value: Value,
    pub label: Option<String>,
    /// Concrete path of this value, including the label suffix.
    pub query: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    AnyField,
    Index(i64),
    Range(Option<i64>, Option<i64>),
}

/// A parsed query. Parsing is independent of any document, so a compiled
/// query can be run against any number of values.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    segments: Vec<Segment>,
    label: Option<String>,
}

impl Query {
    pub fn parse(path: &str) -> Result<Self> {
        let chars: Vec<char> = path.chars().collect();
        let mut segments = Vec::new();
        let mut label = None;
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                ':' => {
                    let rest: String = chars[i + 1..].iter().collect();
                    if !rest.is_empty() {
                        label = Some(rest);
                    }
                    break;
                }
                '[' => {
                    let close = find(&chars, i + 1, ']').ok_or_else(|| {
                        TwinError::Query(format!("Unterminated index accessor in path {}", path))
                    })?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    segments.push(parse_accessor(&inner, path)?);
                    i = close + 1;
                }
                c => {
                    if c == '.' {
                        i += 1;
                    }

                    if i < chars.len() && chars[i] == '\'' {
                        let close = find(&chars, i + 1, '\'').ok_or_else(|| {
                            TwinError::Query(format!("Unterminated quoted field in path {}", path))
                        })?;
                        if close == i + 1 {
                            return Err(TwinError::Query(format!("Empty quoted field in path {}", path)));
                        }
                        segments.push(Segment::Field(chars[i + 1..close].iter().collect()));
                        i = close + 1;
                        continue;
                    }

                    let start = i;
                    while i < chars.len() && !matches!(chars[i], ':' | '.' | '[' | ']') {
                        i += 1;
                    }

                    if start == i {
                        return Err(TwinError::Query(format!(
                            "Unexpected character at position {} in path {}",
                            start, path
                        )));
                    }

                    let name: String = chars[start..i].iter().collect();
                    if name == "*" {
                        segments.push(Segment::AnyField);
                    } else {
                        segments.push(Segment::Field(name));
                    }
                }
            }
        }

        Ok(Self { segments, label })
    }

    /// Run the query, collecting every match in document order.
    pub fn run(&self, value: &Value) -> Result<Vec<QueryResult>> {
        let mut results = Vec::new();
        self.walk(value, 0, String::new(), &mut results)?;
        Ok(results)
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn walk(
        &self,
        value: &Value,
        depth: usize,
        normalized: String,
        results: &mut Vec<QueryResult>,
    ) -> Result<()> {
        let Some(segment) = self.segments.get(depth) else {
            let mut query = normalized
                .strip_prefix('.')
                .unwrap_or(&normalized)
                .to_string();
            if let Some(label) = &self.label {
                query.push(':');
                query.push_str(label);
            }
            results.push(QueryResult {
                value: value.clone(),
                label: self.label.clone(),
                query,
            });
            return Ok(());
        };

        match segment {
            Segment::Field(name) => {
                let child = value
                    .as_object()
                    .and_then(|map| map.get(name))
                    .ok_or_else(|| TwinError::Query(format!("Path {} does not exist", name)))?;
                self.walk(child, depth + 1, format!("{}.{}", normalized, mask_key(name)), results)
            }
            Segment::AnyField => match value {
                Value::Object(map) => {
                    for (key, child) in map {
                        self.walk(child, depth + 1, format!("{}.{}", normalized, mask_key(key)), results)?;
                    }
                    Ok(())
                }
                Value::Array(items) => {
                    for (idx, child) in items.iter().enumerate() {
                        self.walk(child, depth + 1, format!("{}.{}", normalized, idx), results)?;
                    }
                    Ok(())
                }
                _ => Ok(()),
            },
            Segment::Index(idx) => {
                let items = as_array(value)?;
                let idx = wrap_index(*idx, items.len())?;
                let child = items
                    .get(idx)
                    .ok_or_else(|| TwinError::Query(format!("Index {} is out of bounds", idx)))?;
                self.walk(child, depth + 1, format!("{}[{}]", normalized, idx), results)
            }
            Segment::Range(start, end) => {
                let items = as_array(value)?;
                if items.is_empty() {
                    return Ok(());
                }
                let start = wrap_index(start.unwrap_or(0), items.len())?;
                let end = wrap_index(end.unwrap_or(items.len() as i64), items.len())?;
                for idx in start..end {
                    self.walk(&items[idx], depth + 1, format!("{}[{}]", normalized, idx), results)?;
                }
                Ok(())
            }
        }
    }
}

/// Run `path` against `value`, collecting all results.
pub fn query(value: &Value, path: &str) -> Result<Vec<QueryResult>> {
    Query::parse(path)?.run(value)
}

/// First result of `path` against `value`; an error if nothing matches.
pub fn first(value: &Value, path: &str) -> Result<QueryResult> {
    query(value, path)?
        .into_iter()
        .next()
        .ok_or_else(|| TwinError::Query(format!("No match found for query {}", path)))
}

/// Follow one level of `$vpath` indirection, if the value carries one.
pub fn resolve_vpath(value: &Value) -> Result<Value> {
    match value.get(crate::constants::VPATH_KEY).and_then(Value::as_str) {
        Some(vpath) => Ok(first(value, vpath)?.value),
        None => Ok(value.clone()),
    }
}

fn find(chars: &[char], from: usize, needle: char) -> Option<usize> {
    chars[from.min(chars.len())..]
        .iter()
        .position(|c| *c == needle)
        .map(|pos| pos + from)
}

fn parse_accessor(inner: &str, path: &str) -> Result<Segment> {
    let parse_bound = |s: &str| -> Result<Option<i64>> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(None);
        }
        s.parse::<i64>()
            .map(Some)
            .map_err(|_| TwinError::Query(format!("Invalid index {} in path {}", s, path)))
    };

    match inner.split_once(':') {
        Some((start, end)) => Ok(Segment::Range(parse_bound(start)?, parse_bound(end)?)),
        None => parse_bound(inner)?
            .map(Segment::Index)
            .ok_or_else(|| TwinError::Query(format!("Index accessor without range in path {}", path))),
    }
}

fn as_array(value: &Value) -> Result<&Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| TwinError::Query("Index accessors only work on arrays".to_string()))
}

fn wrap_index(idx: i64, len: usize) -> Result<usize> {
    let len = len as i64;
    let wrapped = if idx < 0 { idx + len } else { idx };
    if wrapped < 0 || wrapped > len {
        return Err(TwinError::Query(format!("Index {} is out of bounds", idx)));
    }
    Ok(wrapped as usize)
}

fn mask_key(key: &str) -> String {
    if key.contains('.') {
        format!("'{}'", key)
    } else {
        key.to_string()
    }
}
