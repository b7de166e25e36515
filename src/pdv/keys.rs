//! Query keys used by the PDV screens.

use crate::cache::QueryKey;
use crate::query_key;

pub fn dashboard_stats() -> QueryKey {
  query_key!["dashboard-stats"]
}

pub fn sales_over_time(days: u32) -> QueryKey {
  query_key!["sales-over-time", days]
}

pub fn top_products(limit: u32) -> QueryKey {
  query_key!["top-products", limit]
}

pub fn sales() -> QueryKey {
  query_key!["sales"]
}

pub fn cash_register() -> QueryKey {
  query_key!["cash-register"]
}

pub fn products() -> QueryKey {
  query_key!["products"]
}

pub fn product(id: i64) -> QueryKey {
  query_key!["products", id]
}

pub fn product_stock(id: i64) -> QueryKey {
  query_key!["products", id, "stock"]
}

pub fn product_images(id: i64) -> QueryKey {
  query_key!["products", id, "images"]
}

pub fn clients() -> QueryKey {
  query_key!["clients"]
}

pub fn client(id: i64) -> QueryKey {
  query_key!["clients", id]
}

pub fn service_orders() -> QueryKey {
  query_key!["service-orders"]
}

pub fn fiscal_notes() -> QueryKey {
  query_key!["fiscal-notes"]
}
