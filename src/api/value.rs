use std::fmt;

use time::OffsetDateTime;

/// A mapping key.
///
/// Callers hand us data from wherever it comes from, so keys are not
/// guaranteed to be strings. Backends stringify them on the way out.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Key {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => f.write_str(s),
            Key::Int(i) => write!(f, "{}", i),
            Key::Float(x) => write!(f, "{}", x),
            Key::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Key::Str(key.to_owned())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key::Str(key)
    }
}

impl From<i64> for Key {
    fn from(key: i64) -> Self {
        Key::Int(key)
    }
}

impl From<f64> for Key {
    fn from(key: f64) -> Self {
        Key::Float(key)
    }
}

impl From<bool> for Key {
    fn from(key: bool) -> Self {
        Key::Bool(key)
    }
}

/// An arbitrary, caller-supplied value tree.
///
/// This is what `config`, `info`, `result` and the other opaque payloads of a
/// run are made of. Maps keep insertion order and may contain keys that no
/// backend accepts as-is; see [`crate::sanitize`] for how they are made safe.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(OffsetDateTime),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Map(Vec<(Key, Value)>),
    /// Anything without a structured representation, kept as its display text.
    Opaque(String),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    /// An empty map.
    pub fn map() -> Self {
        Value::Map(Vec::new())
    }

    pub fn opaque(value: impl fmt::Display) -> Self {
        Value::Opaque(value.to_string())
    }

    /// `true` for null and for empty strings, lists, tuples and maps.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Str(s) => s.is_empty(),
            Value::List(items) | Value::Tuple(items) => items.is_empty(),
            Value::Map(entries) => entries.is_empty(),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn entries(&self) -> Option<&[(Key, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Looks up a string key in a map. Returns `None` for non-maps.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        match self {
            Value::Map(entries) => entries
                .iter_mut()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Inserts or replaces `key`, returning the previous value.
    ///
    /// A non-map value is replaced by an empty map first.
    pub fn insert(&mut self, key: impl Into<Key>, value: impl Into<Value>) -> Option<Value> {
        if !matches!(self, Value::Map(_)) {
            *self = Value::map();
        }
        let key = key.into();
        let value = value.into();
        match self {
            Value::Map(entries) => {
                if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
                    Some(std::mem::replace(&mut slot.1, value))
                } else {
                    entries.push((key, value));
                    None
                }
            }
            _ => None,
        }
    }
}

impl<K: Into<Key>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Value::Map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value.into())
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(value) => Value::Int(value),
            Err(_) => Value::Float(value as f64),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Value::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}

impl<A: Into<Value>, B: Into<Value>> From<(A, B)> for Value {
    fn from((a, b): (A, B)) -> Self {
        Value::Tuple(vec![a.into(), b.into()])
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::from(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Json::String(s) => Value::Str(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (Key::Str(k), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Key, Value};

    #[test]
    fn insert_replaces_existing_key() {
        let mut value: Value = vec![("a", 1), ("b", 2)].into_iter().collect();
        assert_eq!(value.insert("a", 3), Some(Value::Int(1)));
        assert_eq!(value.get("a"), Some(&Value::Int(3)));
        assert_eq!(value.entries().map(<[_]>::len), Some(2));
    }

    #[test]
    fn insert_turns_scalars_into_maps() {
        let mut value = Value::Null;
        value.insert("nr", 7);
        assert_eq!(value.get("nr"), Some(&Value::Int(7)));
    }

    #[test]
    fn float_keys_display_like_numbers() {
        assert_eq!(Key::Float(12.7).to_string(), "12.7");
        assert_eq!(Key::Int(3).to_string(), "3");
    }

    #[test]
    fn converts_json() {
        let json = serde_json::json!({"a": [1, 2.5, "x", null], "b": {"c": true}});
        let value = Value::from(json);
        assert_eq!(
            value.get("a").and_then(Value::as_list),
            Some(&[Value::Int(1), Value::Float(2.5), "x".into(), Value::Null][..])
        );
        assert_eq!(value.get("b").and_then(|b| b.get("c")), Some(&Value::Bool(true)));
    }

    #[test]
    fn emptiness() {
        assert!(Value::Null.is_empty());
        assert!(Value::map().is_empty());
        assert!(!Value::Int(0).is_empty());
    }
}
