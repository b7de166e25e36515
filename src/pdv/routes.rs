//! Built-in invalidation routes for PDV mutations.

use crate::cache::InvalidationRouter;
use crate::key_pattern;

pub const INSERT_SALE: &str = "insert-sale";
pub const CANCEL_SALE: &str = "cancel-sale";
pub const OPEN_CASH_REGISTER: &str = "open-cash-register";
pub const CLOSE_CASH_REGISTER: &str = "close-cash-register";
pub const CASH_MOVEMENT: &str = "cash-movement";
pub const UPSERT_PRODUCT: &str = "upsert-product";
pub const ADJUST_STOCK: &str = "adjust-stock";
pub const UPLOAD_PRODUCT_IMAGE: &str = "upload-product-image";
pub const UPSERT_CLIENT: &str = "upsert-client";
pub const CREATE_SERVICE_ORDER: &str = "create-service-order";
pub const UPDATE_SERVICE_ORDER: &str = "update-service-order";
pub const ISSUE_FISCAL_NOTE: &str = "issue-fiscal-note";

/// Router with every PDV mutation and the reads it affects.
pub fn default_router() -> InvalidationRouter {
  let sale_effects = [
    key_pattern!["dashboard-stats"],
    key_pattern!["sales-over-time"],
    key_pattern!["top-products"],
    key_pattern!["sales"],
    key_pattern!["cash-register"],
    key_pattern!["products", "*", "stock"],
  ];

  InvalidationRouter::new()
    .with_route(INSERT_SALE, sale_effects.clone())
    .with_route(CANCEL_SALE, sale_effects)
    .with_route(
      OPEN_CASH_REGISTER,
      [key_pattern!["cash-register"], key_pattern!["dashboard-stats"]],
    )
    .with_route(
      CLOSE_CASH_REGISTER,
      [key_pattern!["cash-register"], key_pattern!["dashboard-stats"]],
    )
    .with_route(CASH_MOVEMENT, [key_pattern!["cash-register"]])
    .with_route(
      UPSERT_PRODUCT,
      [key_pattern!["products"], key_pattern!["top-products"]],
    )
    .with_route(
      ADJUST_STOCK,
      [key_pattern!["products", "*", "stock"], key_pattern!["dashboard-stats"]],
    )
    .with_route(UPLOAD_PRODUCT_IMAGE, [key_pattern!["products", "*", "images"]])
    .with_route(UPSERT_CLIENT, [key_pattern!["clients"]])
    .with_route(
      CREATE_SERVICE_ORDER,
      [key_pattern!["service-orders"], key_pattern!["dashboard-stats"]],
    )
    .with_route(
      UPDATE_SERVICE_ORDER,
      [key_pattern!["service-orders"], key_pattern!["dashboard-stats"]],
    )
    .with_route(
      ISSUE_FISCAL_NOTE,
      [key_pattern!["fiscal-notes"], key_pattern!["sales"]],
    )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::QueryKey;
  use crate::pdv::keys;

  fn covers(mutation: &str, key: &QueryKey) -> bool {
    default_router()
      .resolve(mutation)
      .iter()
      .any(|pattern| pattern.matches(key))
  }

  #[test]
  fn test_sale_invalidates_everything_it_touches() {
    for key in [
      keys::dashboard_stats(),
      keys::sales_over_time(30),
      keys::sales_over_time(7),
      keys::top_products(10),
      keys::sales(),
      keys::cash_register(),
      keys::product_stock(42),
    ] {
      assert!(covers(INSERT_SALE, &key), "insert-sale must invalidate {}", key);
      assert!(covers(CANCEL_SALE, &key), "cancel-sale must invalidate {}", key);
    }
  }

  #[test]
  fn test_sale_leaves_unrelated_reads_alone() {
    assert!(!covers(INSERT_SALE, &keys::clients()));
    assert!(!covers(INSERT_SALE, &keys::product_images(42)));
    assert!(!covers(INSERT_SALE, &keys::products()));
  }

  #[test]
  fn test_stock_and_catalog_routes() {
    assert!(covers(ADJUST_STOCK, &keys::product_stock(1)));
    assert!(covers(UPSERT_PRODUCT, &keys::product(1)));
    assert!(covers(UPSERT_PRODUCT, &keys::product_stock(1)));
    assert!(covers(UPLOAD_PRODUCT_IMAGE, &keys::product_images(1)));
    assert!(!covers(UPLOAD_PRODUCT_IMAGE, &keys::product_stock(1)));
  }

  #[test]
  fn test_cash_register_routes() {
    for mutation in [OPEN_CASH_REGISTER, CLOSE_CASH_REGISTER, CASH_MOVEMENT] {
      assert!(covers(mutation, &keys::cash_register()));
    }
    assert!(covers(CLOSE_CASH_REGISTER, &keys::dashboard_stats()));
  }

  #[test]
  fn test_every_route_invalidates_something() {
    let router = default_router();
    let mut count = 0;
    for (name, patterns) in router.routes() {
      assert!(!patterns.is_empty(), "{} has no patterns", name);
      count += 1;
    }
    assert_eq!(count, 12);
  }

  #[test]
  fn test_remaining_routes() {
    assert!(covers(UPSERT_CLIENT, &keys::client(3)));
    assert!(covers(CREATE_SERVICE_ORDER, &keys::service_orders()));
    assert!(covers(UPDATE_SERVICE_ORDER, &keys::dashboard_stats()));
    assert!(covers(ISSUE_FISCAL_NOTE, &keys::fiscal_notes()));
  }
}
