use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::error::{HubError, HubResult};

/// One of the five data types a resource or sample can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Trigger,
    Boolean,
    Numeric,
    String,
    Json,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Trigger => write!(f, "Trigger"),
            DataType::Boolean => write!(f, "Boolean"),
            DataType::Numeric => write!(f, "Numeric"),
            DataType::String => write!(f, "String"),
            DataType::Json => write!(f, "Json"),
        }
    }
}

/// The typed payload of a sample. `Json` stores syntactically-validated,
/// canonicalized JSON text rather than a parsed `Value` — samples are
/// immutable and shared, so re-parsing happens only where a consumer
/// (extraction, the streaming reader) actually needs structure.
#[derive(Debug, Clone, PartialEq)]
enum SampleValue {
    Trigger,
    Boolean(bool),
    Numeric(f64),
    String(String),
    Json(String),
}

impl SampleValue {
    fn data_type(&self) -> DataType {
        match self {
            SampleValue::Trigger => DataType::Trigger,
            SampleValue::Boolean(_) => DataType::Boolean,
            SampleValue::Numeric(_) => DataType::Numeric,
            SampleValue::String(_) => DataType::String,
            SampleValue::Json(_) => DataType::Json,
        }
    }
}

#[derive(Debug, PartialEq)]
struct SampleInner {
    timestamp: f64,
    value: SampleValue,
}

/// An immutable, timestamped, reference-counted data sample.
///
/// Cloning a `DataSample` is cheap (an `Rc` bump) — the hub is
/// single-threaded by design (spec §5), so no atomic refcount is needed.
#[derive(Debug, Clone)]
pub struct DataSample(Rc<SampleInner>);

impl PartialEq for DataSample {
    fn eq(&self, other: &Self) -> bool {
        self.0.timestamp == other.0.timestamp && self.0.value == other.0.value
    }
}

impl DataSample {
    pub fn trigger(timestamp: f64) -> Self {
        Self::new(timestamp, SampleValue::Trigger)
    }

    pub fn boolean(timestamp: f64, v: bool) -> Self {
        Self::new(timestamp, SampleValue::Boolean(v))
    }

    pub fn numeric(timestamp: f64, v: f64) -> Self {
        Self::new(timestamp, SampleValue::Numeric(v))
    }

    pub fn string(timestamp: f64, v: impl Into<String>) -> Self {
        Self::new(timestamp, SampleValue::String(v.into()))
    }

    /// Build a JSON sample, validating that `text` is syntactically valid JSON.
    pub fn json(timestamp: f64, text: impl Into<String>) -> HubResult<Self> {
        let text = text.into();
        serde_json::from_str::<Value>(&text)
            .map_err(|e| HubError::Malformed(format!("invalid JSON sample: {e}")))?;
        Ok(Self::new(timestamp, SampleValue::Json(text)))
    }

    fn new(timestamp: f64, value: SampleValue) -> Self {
        Self(Rc::new(SampleInner { timestamp, value }))
    }

    pub fn timestamp(&self) -> f64 {
        self.0.timestamp
    }

    pub fn data_type(&self) -> DataType {
        self.0.value.data_type()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.0.value {
            SampleValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_numeric(&self) -> Option<f64> {
        match &self.0.value {
            SampleValue::Numeric(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.0.value {
            SampleValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_json_text(&self) -> Option<&str> {
        match &self.0.value {
            SampleValue::Json(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Clone this sample's value onto a new timestamp. Used by the push
    /// algorithm's override substitution (spec §4.2 step 1): the override
    /// sample's value wins, but the incoming push's timestamp is kept.
    pub fn with_timestamp(&self, timestamp: f64) -> Self {
        Self::new(timestamp, self.0.value.clone())
    }

    /// Number of live `Rc` handles to this sample's inner value. The
    /// observation buffer and each streaming reader hold one handle apiece
    /// on the entries they care about; a reader uses this to notice that
    /// its rendering cursor fell off the back of the buffer (spec §4.4
    /// "Streaming JSON reader").
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Identity comparison (not value equality): true iff `a` and `b` are
    /// clones of the same underlying `Rc`.
    pub fn ptr_eq(a: &DataSample, b: &DataSample) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Treat a Numeric or Boolean sample as an `f64` for aggregate math.
    /// Boolean counts as 1.0/0.0 per spec §4.4 "Transform".
    pub fn as_aggregable(&self) -> Option<f64> {
        match &self.0.value {
            SampleValue::Numeric(n) => Some(*n),
            SampleValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Render as the wire fragment used by the streaming JSON reader:
    /// `{"t":<ts>}` for Trigger, `{"t":<ts>,"v":<v>}` otherwise.
    pub fn to_json_fragment(&self) -> String {
        match &self.0.value {
            SampleValue::Trigger => format!("{{\"t\":{}}}", fmt_ts(self.0.timestamp)),
            SampleValue::Boolean(b) => {
                format!("{{\"t\":{},\"v\":{}}}", fmt_ts(self.0.timestamp), b)
            }
            SampleValue::Numeric(n) => {
                format!("{{\"t\":{},\"v\":{}}}", fmt_ts(self.0.timestamp), fmt_num(*n))
            }
            SampleValue::String(s) => format!(
                "{{\"t\":{},\"v\":{}}}",
                fmt_ts(self.0.timestamp),
                serde_json::to_string(s).expect("string serialization cannot fail")
            ),
            SampleValue::Json(raw) => {
                format!("{{\"t\":{},\"v\":{}}}", fmt_ts(self.0.timestamp), raw)
            }
        }
    }

    /// Extract a sub-element from a JSON sample using a
    /// `member1.member2[index]...` path expression (spec §4.1).
    pub fn extract(&self, path: &str) -> HubResult<DataSample> {
        let text = self
            .as_json_text()
            .ok_or_else(|| HubError::Malformed("extract requires a JSON sample".into()))?;
        let root: Value = serde_json::from_str(text)
            .map_err(|e| HubError::Malformed(format!("corrupt JSON sample: {e}")))?;

        let mut current = &root;
        for segment in parse_path(path)? {
            match segment {
                PathSegment::Member(name) => {
                    current = current
                        .as_object()
                        .and_then(|obj| obj.get(&name))
                        .ok_or_else(|| {
                            HubError::NotFound(format!("extraction path missing member `{name}`"))
                        })?;
                }
                PathSegment::Index(idx) => {
                    current = current
                        .as_array()
                        .and_then(|arr| arr.get(idx))
                        .ok_or_else(|| {
                            HubError::NotFound(format!("extraction path missing index [{idx}]"))
                        })?;
                }
            }
        }

        value_to_sample(self.0.timestamp, current)
    }
}

enum PathSegment {
    Member(String),
    Index(usize),
}

fn parse_path(path: &str) -> HubResult<Vec<PathSegment>> {
    let mut segments = Vec::new();
    for dotted in path.split('.') {
        if dotted.is_empty() {
            return Err(HubError::Malformed(format!(
                "empty path segment in extraction path `{path}`"
            )));
        }
        let member_end = dotted.find('[').unwrap_or(dotted.len());
        let (name, mut bracket_tail) = dotted.split_at(member_end);
        if name.is_empty() {
            return Err(HubError::Malformed(format!(
                "missing member name before index in `{path}`"
            )));
        }
        segments.push(PathSegment::Member(name.to_string()));
        while !bracket_tail.is_empty() {
            if !bracket_tail.starts_with('[') {
                return Err(HubError::Malformed(format!("malformed index in `{path}`")));
            }
            let close = bracket_tail
                .find(']')
                .ok_or_else(|| HubError::Malformed(format!("unterminated index in `{path}`")))?;
            let idx_str = &bracket_tail[1..close];
            let idx: usize = idx_str
                .parse()
                .map_err(|_| HubError::Malformed(format!("non-numeric index `{idx_str}`")))?;
            segments.push(PathSegment::Index(idx));
            bracket_tail = &bracket_tail[close + 1..];
        }
    }
    Ok(segments)
}

/// Infer a `DataSample` from a pointed-at JSON token (spec §4.1).
fn value_to_sample(timestamp: f64, value: &Value) -> HubResult<DataSample> {
    match value {
        Value::Object(_) | Value::Array(_) => {
            let text = serde_json::to_string(value)
                .map_err(|e| HubError::Malformed(format!("re-encoding extracted JSON: {e}")))?;
            DataSample::json(timestamp, text)
        }
        Value::Bool(b) => Ok(DataSample::boolean(timestamp, *b)),
        Value::Number(n) => n
            .as_f64()
            .map(|v| DataSample::numeric(timestamp, v))
            .ok_or_else(|| HubError::Malformed("extracted number out of f64 range".into())),
        Value::String(s) => Ok(DataSample::string(timestamp, s.clone())),
        // `null` is a present-but-empty JSON token, not a missing member; the
        // closest of the five data types is Json, carrying the literal.
        Value::Null => DataSample::json(timestamp, "null"),
    }
}

fn fmt_ts(ts: f64) -> String {
    fmt_num(ts)
}

/// Render an `f64` the way `serde_json` would inside a number position,
/// without going through a full `Value` round-trip for the common case.
fn fmt_num(n: f64) -> String {
    if n == n.trunc() && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}
