//! Named remote reads and writes of the PDV backend.

use serde_json::{json, Value};

use super::{keys, routes};
use crate::cache::MutationRequest;
use crate::client::{RemoteQuery, RemoteWrite};

pub fn dashboard_stats() -> RemoteQuery {
  RemoteQuery::new(keys::dashboard_stats(), "get_dashboard_stats", json!({}))
}

pub fn sales_over_time(days: u32) -> RemoteQuery {
  RemoteQuery::new(
    keys::sales_over_time(days),
    "get_sales_over_time",
    json!({ "days": days }),
  )
}

pub fn top_products(limit: u32) -> RemoteQuery {
  RemoteQuery::new(
    keys::top_products(limit),
    "get_top_products",
    json!({ "limit": limit }),
  )
}

pub fn cash_register() -> RemoteQuery {
  RemoteQuery::new(keys::cash_register(), "get_cash_register_status", json!({}))
}

pub fn product_stock(product_id: i64) -> RemoteQuery {
  RemoteQuery::new(
    keys::product_stock(product_id),
    "get_product_stock",
    json!({ "product_id": product_id }),
  )
}

/// Look up a read by its CLI name.
///
/// `None` for unknown names, a missing product id, or a count that does not
/// fit in a `u32`.
pub fn by_name(name: &str, param: Option<i64>) -> Option<RemoteQuery> {
  let count = |default: u32| match param {
    Some(p) => u32::try_from(p).ok(),
    None => Some(default),
  };
  match name {
    "dashboard-stats" => Some(dashboard_stats()),
    "sales-over-time" => count(30).map(sales_over_time),
    "top-products" => count(10).map(top_products),
    "cash-register" => Some(cash_register()),
    "product-stock" => param.map(product_stock),
    _ => None,
  }
}

/// Register a sale, optimistically decrementing the stock of each sold item.
///
/// `payload.items` is expected as `[{ "product_id": .., "quantity": .. }]`.
pub fn insert_sale(payload: Value) -> RemoteWrite {
  let mut request = MutationRequest::new(routes::INSERT_SALE, payload.clone());

  let items = payload["items"].as_array().cloned().unwrap_or_default();
  for item in items {
    let (Some(product_id), Some(quantity)) = (item["product_id"].as_i64(), item["quantity"].as_f64())
    else {
      continue;
    };
    request = request.optimistic(keys::product_stock(product_id), move |current| {
      let stock = current?["quantity"].as_f64()?;
      Some(json!({ "product_id": product_id, "quantity": stock - quantity }))
    });
  }

  RemoteWrite::new("sales", request)
}

/// Writes addressable from the CLI: mutation name → target table.
pub fn write_target(mutation: &str) -> Option<&'static str> {
  match mutation {
    routes::INSERT_SALE => Some("sales"),
    routes::OPEN_CASH_REGISTER | routes::CLOSE_CASH_REGISTER => Some("cash_registers"),
    routes::CASH_MOVEMENT => Some("cash_movements"),
    routes::UPSERT_PRODUCT => Some("products"),
    routes::ADJUST_STOCK => Some("stock_movements"),
    routes::UPSERT_CLIENT => Some("clients"),
    routes::CREATE_SERVICE_ORDER | routes::UPDATE_SERVICE_ORDER => Some("service_orders"),
    routes::ISSUE_FISCAL_NOTE => Some("fiscal_notes"),
    _ => None,
  }
}

/// Build a write by mutation name, e.g. for the CLI.
pub fn write_by_name(mutation: &str, payload: Value) -> Option<RemoteWrite> {
  if mutation == routes::INSERT_SALE {
    return Some(insert_sale(payload));
  }
  let target = write_target(mutation)?;
  Some(RemoteWrite::new(target, MutationRequest::new(mutation, payload)))
}
