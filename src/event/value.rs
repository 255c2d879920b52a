//! Typed payload values and insertion-ordered field maps
//!
//! - `Value`: closed tagged union (string, number, bool, map, list)
//! - `Fields<V>`: string-keyed map that remembers insertion order
//!
//! Both serialize as plain JSON-shaped data so payloads and states can be
//! exported into trace entries without conversion tables.

use std::fmt;
use std::marker::PhantomData;

use rustc_hash::FxHashMap;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A payload or state value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(Fields<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Fields<Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Short type name, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Convert to a `serde_json::Value` (non-finite numbers become null)
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{}", n),
            Self::Bool(b) => write!(f, "{}", b),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<Fields<Value>> for Value {
    fn from(map: Fields<Value>) -> Self {
        Self::Map(map)
    }
}

// ═══════════════════════════════════════════
// ORDERED FIELDS
// ═══════════════════════════════════════════

/// String-keyed map with deterministic (insertion) iteration order
///
/// Replacing an existing key keeps its original position.
#[derive(Clone)]
pub struct Fields<V> {
    entries: Vec<(String, V)>,
    index: FxHashMap<String, usize>,
}

impl<V> Fields<V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        match self.index.get(key) {
            Some(&i) => Some(&mut self.entries[i].1),
            None => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or replace a value, returning the previous one
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<V>) -> Option<V> {
        let key = key.into();
        let value = value.into();
        if let Some(&i) = self.index.get(&key) {
            return Some(std::mem::replace(&mut self.entries[i].1, value));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        None
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let pos = self.index.remove(key)?;
        let (_, value) = self.entries.remove(pos);
        // Shift indexes of everything after the removed slot
        for (i, (k, _)) in self.entries.iter().enumerate().skip(pos) {
            self.index.insert(k.clone(), i);
        }
        Some(value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<V: Clone> Fields<V> {
    /// Copy every entry of `other` into `self` (other wins on conflict)
    pub fn merge(&mut self, other: &Fields<V>) {
        for (k, v) in other.iter() {
            self.insert(k, v.clone());
        }
    }
}

impl<V> Default for Fields<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> fmt::Debug for Fields<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<V: PartialEq> PartialEq for Fields<V> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for Fields<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        fields.extend(iter);
        fields
    }
}

impl<K: Into<String>, V> Extend<(K, V)> for Fields<V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K: Into<String>, V, const N: usize> From<[(K, V); N]> for Fields<V> {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl<V> IntoIterator for Fields<V> {
    type Item = (String, V);
    type IntoIter = std::vec::IntoIter<(String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<V: Serialize> Serialize for Fields<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (k, v) in self.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for Fields<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldsVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for FieldsVisitor<V> {
            type Value = Fields<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string-keyed map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut fields = Fields::new();
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    fields.insert(key, value);
                }
                Ok(fields)
            }
        }

        deserializer.deserialize_map(FieldsVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_fields_keep_insertion_order() {
        let mut fields: Fields<Value> = Fields::new();
        fields.insert("zeta", 1);
        fields.insert("alpha", 2);
        fields.insert("mid", 3);

        let keys: Vec<&str> = fields.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_fields_replace_keeps_position() {
        let mut fields: Fields<Value> = Fields::from([("a", Value::from(1)), ("b", Value::from(2))]);
        let old = fields.insert("a", "replaced");

        assert_eq!(old, Some(Value::Number(1.0)));
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(fields.get("a").and_then(Value::as_str), Some("replaced"));
    }

    #[test]
    fn test_fields_remove_reindexes() {
        let mut fields: Fields<String> =
            Fields::from([("a", "1".to_string()), ("b", "2".to_string()), ("c", "3".to_string())]);

        assert_eq!(fields.remove("a"), Some("1".to_string()));
        assert_eq!(fields.remove("a"), None);
        assert_eq!(fields.get("c").map(String::as_str), Some("3"));
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn test_value_json_shape() {
        let mut inner: Fields<Value> = Fields::new();
        inner.insert("ok", true);
        let mut payload: Fields<Value> = Fields::new();
        payload.insert("x", 1);
        payload.insert("tags", vec![Value::from("a"), Value::from("b")]);
        payload.insert("nested", inner);

        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"x":1.0,"tags":["a","b"],"nested":{"ok":true}}"#);

        let back: Fields<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_value_deserializes_integers_as_numbers() {
        let value: Value = serde_json::from_str("42").unwrap();
        assert_eq!(value, Value::Number(42.0));
        assert_eq!(value.type_name(), "number");
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::from("hi").to_string(), "hi");
        assert_eq!(Value::from(true).to_string(), "true");
        assert_eq!(Value::from(vec![Value::from(1)]).to_string(), "[1.0]");
    }

    proptest! {
        #[test]
        fn prop_keys_follow_first_insertion(keys in proptest::collection::vec("[a-e]{1,2}", 0..20)) {
            let mut fields: Fields<Value> = Fields::new();
            let mut expected: Vec<String> = Vec::new();
            for (i, k) in keys.iter().enumerate() {
                if !expected.contains(k) {
                    expected.push(k.clone());
                }
                fields.insert(k.as_str(), i as u32);
            }
            let actual: Vec<String> = fields.keys().map(str::to_string).collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
