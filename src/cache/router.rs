//! Maps mutation names to the key patterns they invalidate.

use std::collections::BTreeMap;

use super::key::KeyPattern;

/// Static table of mutation name → affected key patterns.
///
/// Built once at startup and shared read-only afterwards. Names that were
/// never registered resolve to nothing: over-invalidation only costs an
/// extra fetch, so a missing route is reported but not treated as fatal.
#[derive(Debug, Clone, Default)]
pub struct InvalidationRouter {
  routes: BTreeMap<String, Vec<KeyPattern>>,
}

impl InvalidationRouter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add patterns for `mutation`. Registering the same name again extends
  /// its list; duplicate patterns are ignored.
  pub fn register<I, P>(&mut self, mutation: impl Into<String>, patterns: I) -> &mut Self
  where
    I: IntoIterator<Item = P>,
    P: Into<KeyPattern>,
  {
    let list = self.routes.entry(mutation.into()).or_default();
    for pattern in patterns {
      let pattern = pattern.into();
      if !list.contains(&pattern) {
        list.push(pattern);
      }
    }
    self
  }

  /// Builder-style [`register`](Self::register).
  pub fn with_route<I, P>(mut self, mutation: impl Into<String>, patterns: I) -> Self
  where
    I: IntoIterator<Item = P>,
    P: Into<KeyPattern>,
  {
    self.register(mutation, patterns);
    self
  }

  /// Patterns invalidated by `mutation`, empty when it is unknown.
  pub fn resolve(&self, mutation: &str) -> Vec<KeyPattern> {
    match self.routes.get(mutation) {
      Some(patterns) => patterns.clone(),
      None => {
        tracing::warn!(mutation, "no invalidation route registered");
        Vec::new()
      }
    }
  }

  pub fn contains(&self, mutation: &str) -> bool {
    self.routes.contains_key(mutation)
  }

  /// All routes, sorted by mutation name.
  pub fn routes(&self) -> impl Iterator<Item = (&str, &[KeyPattern])> {
    self
      .routes
      .iter()
      .map(|(name, patterns)| (name.as_str(), patterns.as_slice()))
  }

  /// Merge every route of `other` into this router.
  pub fn merge(&mut self, other: InvalidationRouter) {
    for (name, patterns) in other.routes {
      self.register(name, patterns);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{key_pattern, query_key};

  #[test]
  fn test_register_and_resolve() {
    let mut router = InvalidationRouter::new();
    router.register(
      "insert-sale",
      [key_pattern!["dashboard-stats"], key_pattern!["cash-register"]],
    );

    assert_eq!(
      router.resolve("insert-sale"),
      vec![key_pattern!["dashboard-stats"], key_pattern!["cash-register"]]
    );
  }

  #[test]
  fn test_unknown_mutation_resolves_to_nothing() {
    let router = InvalidationRouter::new();
    assert!(router.resolve("delete-everything").is_empty());
    assert!(!router.contains("delete-everything"));
  }

  #[test]
  fn test_register_twice_extends_without_duplicates() {
    let mut router = InvalidationRouter::new();
    router
      .register("upsert-product", [key_pattern!["products"]])
      .register(
        "upsert-product",
        [key_pattern!["products"], key_pattern!["dashboard-stats"]],
      );

    assert_eq!(
      router.resolve("upsert-product"),
      vec![key_pattern!["products"], key_pattern!["dashboard-stats"]]
    );
  }

  #[test]
  fn test_register_accepts_query_keys() {
    let router = InvalidationRouter::new().with_route("open-cash-register", [query_key!["cash-register"]]);
    let patterns = router.resolve("open-cash-register");
    assert!(patterns[0].matches(&query_key!["cash-register", "today"]));
  }

  #[test]
  fn test_merge() {
    let mut base = InvalidationRouter::new().with_route("insert-sale", [key_pattern!["dashboard-stats"]]);
    let extra = InvalidationRouter::new()
      .with_route("insert-sale", [key_pattern!["loyalty"]])
      .with_route("import-products", [key_pattern!["products"]]);
    base.merge(extra);

    assert_eq!(base.resolve("insert-sale").len(), 2);
    assert!(base.contains("import-products"));
    let names: Vec<&str> = base.routes().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["import-products", "insert-sale"]);
  }
}
