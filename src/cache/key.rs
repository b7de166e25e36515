//! Structural query keys and the prefix patterns used to invalidate them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// One element of a [`QueryKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeySegment {
  Bool(bool),
  Int(i64),
  Str(String),
}

impl fmt::Display for KeySegment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      KeySegment::Bool(b) => write!(f, "{}", b),
      KeySegment::Int(i) => write!(f, "{}", i),
      KeySegment::Str(s) => f.write_str(s),
    }
  }
}

impl From<&str> for KeySegment {
  fn from(s: &str) -> Self {
    KeySegment::Str(s.to_string())
  }
}

impl From<String> for KeySegment {
  fn from(s: String) -> Self {
    KeySegment::Str(s)
  }
}

impl From<&String> for KeySegment {
  fn from(s: &String) -> Self {
    KeySegment::Str(s.clone())
  }
}

impl From<bool> for KeySegment {
  fn from(b: bool) -> Self {
    KeySegment::Bool(b)
  }
}

macro_rules! int_segment {
  ($($t:ty),*) => {
    $(
      impl From<$t> for KeySegment {
        fn from(i: $t) -> Self {
          KeySegment::Int(i as i64)
        }
      }
    )*
  };
}

int_segment!(i32, i64, u8, u16, u32);

/// Identifies a cacheable read. Equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<KeySegment>);

impl QueryKey {
  pub fn new(segments: Vec<KeySegment>) -> Self {
    Self(segments)
  }

  pub fn segments(&self) -> &[KeySegment] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Stable SHA-256 fingerprint of the key, hex encoded.
  pub fn fingerprint(&self) -> String {
    // serde_json keeps segment order and types, so ["a", 1] and ["a", "1"] differ
    let canonical = serde_json::to_string(&self.0).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
  }

  /// The exact-match pattern for this key (and everything below it).
  pub fn as_pattern(&self) -> KeyPattern {
    KeyPattern(self.0.iter().cloned().map(PatternSegment::Exact).collect())
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
    f.write_str(&parts.join("/"))
  }
}

impl<S: Into<KeySegment>> FromIterator<S> for QueryKey {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self(iter.into_iter().map(Into::into).collect())
  }
}

/// Build a [`QueryKey`] from heterogeneous segments.
///
/// ```ignore
/// let key = query_key!["sales-over-time", 30];
/// ```
#[macro_export]
macro_rules! query_key {
  ($($seg:expr),* $(,)?) => {
    $crate::cache::QueryKey::new(vec![$($crate::cache::KeySegment::from($seg)),*])
  };
}

/// Build a [`KeyPattern`]; the string `"*"` becomes a wildcard.
#[macro_export]
macro_rules! key_pattern {
  ($($seg:expr),* $(,)?) => {
    $crate::cache::KeyPattern::new(vec![$($crate::cache::PatternSegment::from($crate::cache::KeySegment::from($seg))),*])
  };
}

/// Element of a [`KeyPattern`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatternSegment {
  Exact(KeySegment),
  /// Matches any single key element.
  Any,
}

impl PatternSegment {
  fn matches(&self, segment: &KeySegment) -> bool {
    match self {
      PatternSegment::Any => true,
      PatternSegment::Exact(expected) => expected == segment,
    }
  }
}

impl From<KeySegment> for PatternSegment {
  fn from(segment: KeySegment) -> Self {
    match segment {
      KeySegment::Str(ref s) if s == "*" => PatternSegment::Any,
      other => PatternSegment::Exact(other),
    }
  }
}

impl fmt::Display for PatternSegment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PatternSegment::Any => f.write_str("*"),
      PatternSegment::Exact(s) => write!(f, "{}", s),
    }
  }
}

/// A key prefix with optional `*` wildcards.
///
/// A key matches when it is at least as long as the pattern and every
/// pattern segment matches the key segment at the same position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPattern(Vec<PatternSegment>);

impl KeyPattern {
  pub fn new(segments: Vec<PatternSegment>) -> Self {
    Self(segments)
  }

  pub fn segments(&self) -> &[PatternSegment] {
    &self.0
  }

  pub fn matches(&self, key: &QueryKey) -> bool {
    key.len() >= self.0.len()
      && self
        .0
        .iter()
        .zip(key.segments())
        .all(|(pattern, segment)| pattern.matches(segment))
  }
}

impl fmt::Display for KeyPattern {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
    f.write_str(&parts.join("/"))
  }
}

impl From<&QueryKey> for KeyPattern {
  fn from(key: &QueryKey) -> Self {
    key.as_pattern()
  }
}

impl From<QueryKey> for KeyPattern {
  fn from(key: QueryKey) -> Self {
    key.as_pattern()
  }
}

impl Serialize for KeyPattern {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let segments: Vec<KeySegment> = self
      .0
      .iter()
      .map(|s| match s {
        PatternSegment::Any => KeySegment::Str("*".to_string()),
        PatternSegment::Exact(seg) => seg.clone(),
      })
      .collect();
    segments.serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for KeyPattern {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let segments: Vec<KeySegment> = Vec::deserialize(deserializer)?;
    Ok(KeyPattern(segments.into_iter().map(PatternSegment::from).collect()))
  }
}
