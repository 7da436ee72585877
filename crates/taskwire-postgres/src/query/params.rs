//! Named query parameters and their translation to positional binds.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::Value;

use crate::{JsonCodec, PgError, PgResult};

/// A single query parameter value.
///
/// Scalars are bound as-is. [`QueryValue::Json`] carries structured data that
/// is encoded with the connector's [`JsonCodec`] and sent as `jsonb`.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    /// SQL `NULL`.
    Null,
    /// `boolean`
    Bool(bool),
    /// `bigint`
    Int(i64),
    /// `double precision`
    Float(f64),
    /// `text`
    Text(String),
    /// `text[]`
    TextArray(Vec<String>),
    /// Structured value sent as `jsonb`.
    Json(Value),
}

impl QueryValue {
    /// Serializes any value into a [`QueryValue::Json`].
    pub fn json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_value(value).map(Self::Json)
    }

    /// Returns whether this value is sent as `jsonb`.
    #[inline]
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json(_))
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for QueryValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for QueryValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<String>> for QueryValue {
    fn from(value: Vec<String>) -> Self {
        Self::TextArray(value)
    }
}

impl<T: Into<QueryValue>> From<Option<T>> for QueryValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Maps loosely typed JSON onto parameter values.
///
/// Objects become `jsonb`; arrays of strings become `text[]`, any other array
/// is sent as `jsonb`.
impl From<Value> for QueryValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(value) => Self::Bool(value),
            Value::Number(number) => match number.as_i64() {
                Some(value) => Self::Int(value),
                None => Self::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(value) => Self::Text(value),
            Value::Array(items) if items.iter().all(Value::is_string) => Self::TextArray(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(text) => Some(text),
                        _ => None,
                    })
                    .collect(),
            ),
            structured => Self::Json(structured),
        }
    }
}

/// Named parameters of one query.
///
/// Names are unique: inserting a name twice replaces the earlier value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryArgs {
    values: BTreeMap<String, QueryValue>,
}

impl QueryArgs {
    /// Creates an empty argument set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds a parameter, returning the value it replaced.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<QueryValue>,
    ) -> Option<QueryValue> {
        self.values.insert(name.into(), value.into())
    }

    /// Returns the value bound to `name`.
    pub fn get(&self, name: &str) -> Option<&QueryValue> {
        self.values.get(name)
    }

    /// Returns the number of parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns whether there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over the parameters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<K, V> FromIterator<(K, V)> for QueryArgs
where
    K: Into<String>,
    V: Into<QueryValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut args = Self::new();
        for (name, value) in iter {
            args.insert(name, value);
        }
        args
    }
}

/// Value bound to a positional placeholder.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BindValue {
    Bool(bool),
    BigInt(i64),
    Double(f64),
    Text(String),
    TextArray(Vec<String>),
}

/// Query text with positional placeholders and the values they refer to.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BoundQuery {
    pub sql: String,
    pub binds: Vec<BindValue>,
}

/// Rewrites `:name` placeholders into `$n` and collects the bind values.
///
/// A name used several times is bound once. `::type` casts, quoted strings
/// (including `E'...'` and `$tag$...$tag$`), quoted identifiers and both comment
/// styles are copied untouched. `NULL` is written
/// inline and structured values are encoded with `codec` and cast to `jsonb`.
pub(crate) fn bind_named(sql: &str, args: &QueryArgs, codec: &JsonCodec) -> PgResult<BoundQuery> {
    let bytes = sql.as_bytes();
    let mut rendered = String::with_capacity(sql.len());
    let mut binds = Vec::new();
    let mut placeholders: HashMap<&str, String> = HashMap::new();

    let mut copied = 0;
    let mut pos = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            b'E' | b'e'
                if bytes.get(pos + 1) == Some(&b'\'') && !follows_name(bytes, pos) =>
            {
                pos = skip_escape_string(bytes, pos + 1);
            }
            quote @ (b'\'' | b'"') => pos = skip_quoted(bytes, pos, quote),
            b'$' if !follows_name(bytes, pos) => {
                pos = skip_dollar_quoted(bytes, pos).unwrap_or(pos + 1);
            }
            b'/' if bytes.get(pos + 1) == Some(&b'*') => pos = skip_block_comment(bytes, pos),
            b'-' if bytes.get(pos + 1) == Some(&b'-') => {
                pos = bytes[pos..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(bytes.len(), |offset| pos + offset);
            }
            b':' if bytes.get(pos + 1) == Some(&b':') => pos += 2,
            b':' if bytes.get(pos + 1).is_some_and(|&b| is_name_start(b)) => {
                let start = pos + 1;
                let end = bytes[start..]
                    .iter()
                    .position(|&b| !is_name_char(b))
                    .map_or(bytes.len(), |offset| start + offset);
                let name = &sql[start..end];

                rendered.push_str(&sql[copied..pos]);

                if let Some(placeholder) = placeholders.get(name) {
                    rendered.push_str(placeholder);
                } else {
                    let value = args.get(name).ok_or_else(|| {
                        PgError::InvalidQuery(format!("no value for placeholder :{name}"))
                    })?;
                    let placeholder = placeholder_for(value, codec, &mut binds)?;
                    rendered.push_str(&placeholder);
                    placeholders.insert(name, placeholder);
                }

                pos = end;
                copied = end;
            }
            _ => pos += 1,
        }
    }

    rendered.push_str(&sql[copied..]);

    Ok(BoundQuery {
        sql: rendered,
        binds,
    })
}

fn placeholder_for(
    value: &QueryValue,
    codec: &JsonCodec,
    binds: &mut Vec<BindValue>,
) -> PgResult<String> {
    let bind = match value {
        QueryValue::Null => return Ok("NULL".to_owned()),
        QueryValue::Bool(value) => BindValue::Bool(*value),
        QueryValue::Int(value) => BindValue::BigInt(*value),
        QueryValue::Float(value) => BindValue::Double(*value),
        QueryValue::Text(value) => BindValue::Text(value.clone()),
        QueryValue::TextArray(values) => BindValue::TextArray(values.clone()),
        QueryValue::Json(value) => {
            let encoded = codec.encode(value).map_err(|e| {
                PgError::InvalidQuery(format!("failed to encode JSON parameter: {e}"))
            })?;
            binds.push(BindValue::Text(encoded));
            return Ok(format!("${}::jsonb", binds.len()));
        }
    };

    binds.push(bind);
    Ok(format!("${}", binds.len()))
}

/// Returns the position right after the closing quote, or the end of input.
fn skip_quoted(bytes: &[u8], open: usize, quote: u8) -> usize {
    let mut pos = open + 1;
    while pos < bytes.len() {
        if bytes[pos] == quote {
            // A doubled quote is an escaped quote.
            if bytes.get(pos + 1) == Some(&quote) {
                pos += 2;
                continue;
            }
            return pos + 1;
        }
        pos += 1;
    }
    bytes.len()
}

/// Skips an `E'...'` string, where a backslash escapes the next byte.
fn skip_escape_string(bytes: &[u8], open: usize) -> usize {
    let mut pos = open + 1;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 2,
            b'\'' if bytes.get(pos + 1) == Some(&b'\'') => pos += 2,
            b'\'' => return pos + 1,
            _ => pos += 1,
        }
    }
    bytes.len()
}

/// Skips a `$tag$...$tag$` body. Returns `None` when `$` does not open one,
/// as in the positional `$1`.
fn skip_dollar_quoted(bytes: &[u8], open: usize) -> Option<usize> {
    let tag_end = bytes[open + 1..]
        .iter()
        .position(|&b| !is_name_char(b))
        .map(|offset| open + 1 + offset)?;
    if bytes[tag_end] != b'$' || bytes.get(open + 1).is_some_and(|b| b.is_ascii_digit()) {
        return None;
    }

    let tag = &bytes[open..=tag_end];
    let body = tag_end + 1;
    let close = bytes[body..]
        .windows(tag.len())
        .position(|window| window == tag)
        .map_or(bytes.len(), |offset| body + offset + tag.len());
    Some(close)
}

/// Skips a `/* ... */` comment. Block comments nest.
fn skip_block_comment(bytes: &[u8], open: usize) -> usize {
    let mut depth = 0usize;
    let mut pos = open;
    while pos < bytes.len() {
        match (bytes[pos], bytes.get(pos + 1)) {
            (b'/', Some(b'*')) => {
                depth += 1;
                pos += 2;
            }
            (b'*', Some(b'/')) => {
                depth -= 1;
                pos += 2;
                if depth == 0 {
                    return pos;
                }
            }
            _ => pos += 1,
        }
    }
    bytes.len()
}

/// Whether the byte before `pos` continues an identifier, as in `foo$bar`.
#[inline]
fn follows_name(bytes: &[u8], pos: usize) -> bool {
    pos > 0 && (is_name_char(bytes[pos - 1]) || bytes[pos - 1] == b'$')
}

#[inline]
fn is_name_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

#[inline]
fn is_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}
