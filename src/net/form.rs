//! Url-encoded form bodies.
//!
//! Forms repeat a field name for multi-select inputs (`platforms=a&platforms=b`),
//! so each field is either a single value or an ordered list of values. The
//! distinction is kept explicit so a replay re-expands exactly what was posted.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::form_urlencoded;

/// Value of one form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
  Single(String),
  Multiple(Vec<String>),
}

impl FieldValue {
  /// Append another occurrence of the same field, promoting to a list.
  fn push(&mut self, value: String) {
    match self {
      FieldValue::Single(first) => {
        let first = std::mem::take(first);
        *self = FieldValue::Multiple(vec![first, value]);
      }
      FieldValue::Multiple(values) => values.push(value),
    }
  }

  pub fn values(&self) -> &[String] {
    match self {
      FieldValue::Single(value) => std::slice::from_ref(value),
      FieldValue::Multiple(values) => values,
    }
  }
}

/// Form fields in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
  fields: Vec<(String, FieldValue)>,
}

impl FieldMap {
  pub fn new() -> Self {
    Self::default()
  }

  /// Parse a url-encoded body. Repeated names collect into `FieldValue::Multiple`.
  pub fn parse(body: &[u8]) -> Self {
    let mut map = Self::new();
    for (name, value) in form_urlencoded::parse(body) {
      map.append(name.into_owned(), value.into_owned());
    }
    map
  }

  pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    match self.fields.iter_mut().find(|(n, _)| *n == name) {
      Some((_, existing)) => existing.push(value),
      None => self.fields.push((name, FieldValue::Single(value))),
    }
  }

  pub fn get(&self, name: &str) -> Option<&FieldValue> {
    self
      .fields
      .iter()
      .find(|(n, _)| n == name)
      .map(|(_, v)| v)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
    self.fields.iter().map(|(n, v)| (n.as_str(), v))
  }

  pub fn len(&self) -> usize {
    self.fields.len()
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  /// Encode back into a url-encoded body, one pair per value.
  pub fn encode(&self) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, value) in &self.fields {
      for v in value.values() {
        serializer.append_pair(name, v);
      }
    }
    serializer.finish()
  }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldMap {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    let mut map = Self::new();
    for (name, value) in iter {
      map.append(name, value);
    }
    map
  }
}

// Stored as a JSON object; field order is kept on the way back in.
impl Serialize for FieldMap {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.fields.len()))?;
    for (name, value) in &self.fields {
      map.serialize_entry(name, value)?;
    }
    map.end()
  }
}

impl<'de> Deserialize<'de> for FieldMap {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct FieldMapVisitor;

    impl<'de> Visitor<'de> for FieldMapVisitor {
      type Value = FieldMap;

      fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of form field names to a string or list of strings")
      }

      fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FieldMap, A::Error> {
        let mut fields = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((name, value)) = access.next_entry::<String, FieldValue>()? {
          fields.push((name, value));
        }
        Ok(FieldMap { fields })
      }
    }

    deserializer.deserialize_map(FieldMapVisitor)
  }
}
