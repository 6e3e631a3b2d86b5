//! Making caller data safe to persist.
//!
//! Two independent transforms, one per backend family:
//!
//! - [`bson_safe`] rewrites map keys that document databases reject
//!   (leading `$`, any `.`) and stringifies values without a document
//!   representation.
//! - [`flatten`] reduces a value tree to plain JSON.
//!
//! Neither transform fails: anything unrecognized is stringified.

use serde::Serialize;
use serde_json::{ser::PrettyFormatter, Map, Number, Value as Json};
use tracing::warn;

use crate::api::{
    metric::format_timestamp,
    value::{Key, Value},
};

/// Rewrites a map key so a document database accepts it as a field name.
///
/// Non-string keys are stringified first, so `12.7` becomes `"12,7"`.
pub fn safe_key(key: &Key) -> String {
    let key = key.to_string().replace('.', ",");
    match key.strip_prefix('$') {
        Some(rest) => format!("@{}", rest),
        None => key,
    }
}

/// Makes a value tree storable in a document database.
///
/// Keys that end up equal after rewriting (`a.b` and `a,b`) collapse into
/// one, the later value wins.
pub fn bson_safe(value: &Value) -> Value {
    match value {
        Value::Map(entries) => {
            let mut safe: Vec<(Key, Value)> = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                let key = Key::Str(safe_key(key));
                let value = bson_safe(value);
                match safe.iter_mut().find(|(k, _)| *k == key) {
                    Some(slot) => {
                        warn!(key = %key, "keys collide after rewriting, keeping the last value");
                        slot.1 = value;
                    }
                    None => safe.push((key, value)),
                }
            }
            Value::Map(safe)
        }
        Value::List(items) => Value::List(items.iter().map(bson_safe).collect()),
        Value::Tuple(items) => Value::Tuple(items.iter().map(bson_safe).collect()),
        Value::Opaque(repr) => Value::Str(repr.clone()),
        other => other.clone(),
    }
}

/// Reduces a value tree to JSON.
///
/// Tuples become arrays, timestamps RFC 3339 strings, keys strings.
/// Non-finite floats have no JSON form and are written as text.
/// Keys that stringify alike (`1` and `"1"`) collapse, the later value wins.
pub fn flatten(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(x) => match Number::from_f64(*x) {
            Some(n) => Json::Number(n),
            None => Json::String(x.to_string()),
        },
        Value::Str(s) => Json::String(s.clone()),
        Value::Timestamp(t) => Json::String(format_timestamp(*t)),
        Value::List(items) | Value::Tuple(items) => Json::Array(items.iter().map(flatten).collect()),
        Value::Map(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, value) in entries {
                let key = key.to_string();
                if map.contains_key(&key) {
                    warn!(key = %key, "keys collide as strings, keeping the last value");
                }
                map.insert(key, flatten(value));
            }
            Json::Object(map)
        }
        Value::Opaque(repr) => Json::String(repr.clone()),
    }
}

/// Recursively orders object keys.
pub fn sort_keys(value: Json) -> Json {
    match value {
        Json::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Json::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect::<Map<_, _>>(),
            )
        }
        Json::Array(items) => Json::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// How JSON documents are laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonFormat {
    /// Spaces per nesting level, `None` for a single line.
    pub indent: Option<usize>,
    pub sort_keys: bool,
    /// Escape everything outside ASCII as `\uXXXX`.
    pub ensure_ascii: bool,
}

impl Default for JsonFormat {
    fn default() -> Self {
        JsonFormat {
            indent: Some(4),
            sort_keys: true,
            ensure_ascii: true,
        }
    }
}

impl JsonFormat {
    pub fn to_string(&self, value: &Json) -> Result<String, serde_json::Error> {
        let sorted;
        let value = if self.sort_keys {
            sorted = sort_keys(value.clone());
            &sorted
        } else {
            value
        };
        let text = match self.indent {
            Some(width) => {
                let indent = " ".repeat(width);
                let mut buffer = Vec::new();
                let formatter = PrettyFormatter::with_indent(indent.as_bytes());
                let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
                value.serialize(&mut serializer)?;
                String::from_utf8(buffer).map_err(<serde_json::Error as serde::ser::Error>::custom)?
            }
            None => serde_json::to_string(value)?,
        };
        Ok(if self.ensure_ascii {
            escape_non_ascii(&text)
        } else {
            text
        })
    }
}

// Outside of string literals serde_json only emits ASCII, so escaping the
// rendered text is equivalent to escaping every string in the tree.
fn escape_non_ascii(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    let mut units = [0u16; 2];
    for c in text.chars() {
        if c.is_ascii() {
            escaped.push(c);
        } else {
            for unit in c.encode_utf16(&mut units) {
                escaped.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    escaped
}
