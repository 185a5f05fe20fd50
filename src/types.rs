//! Response and request types shared across services.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::TransportError;
use crate::transport::from_json;

/// Page size used when the caller does not pass one.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// One page of a listing. `total` comes from the server; the page math is
/// computed locally from the request parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
  pub data: Vec<T>,
  pub total: u64,
  pub page: u32,
  pub limit: u32,
  pub total_pages: u32,
}

impl<T: serde::de::DeserializeOwned> Paginated<T> {
  /// Build a page from either `{data: [...], total}` or a bare array.
  pub fn from_response(
    raw: Value,
    page: Option<u32>,
    limit: Option<u32>,
  ) -> Result<Self, TransportError> {
    let (items, total) = match raw {
      Value::Array(items) => {
        let total = items.len() as u64;
        (items, total)
      }
      Value::Object(mut map) => {
        let items = match map.remove("data") {
          Some(Value::Array(items)) => items,
          _ => {
            return Err(TransportError::Decode(
              "paginated response without a data array".to_string(),
            ))
          }
        };
        let total = map
          .get("total")
          .and_then(Value::as_u64)
          .unwrap_or(items.len() as u64);
        (items, total)
      }
      other => {
        return Err(TransportError::Decode(format!(
          "unexpected paginated response: {}",
          other
        )))
      }
    };

    let limit = limit.filter(|l| *l > 0).unwrap_or(DEFAULT_PAGE_SIZE);
    let data = items
      .into_iter()
      .map(from_json)
      .collect::<Result<Vec<T>, _>>()?;

    Ok(Self {
      data,
      total,
      page: page.unwrap_or(1),
      limit,
      total_pages: total.div_ceil(u64::from(limit)) as u32,
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  Asc,
  Desc,
}

/// Binary export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
  #[default]
  Csv,
  Excel,
  Pdf,
  Json,
}

/// Server-side validation verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationReport {
  pub is_valid: bool,
  pub errors: Vec<String>,
  pub warnings: Vec<String>,
  pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeletedCount {
  pub deleted_count: u64,
}

/// Count keyed by a label, as returned by the various `*_stats` endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelCount {
  #[serde(
    alias = "role",
    alias = "user",
    alias = "type",
    alias = "action",
    alias = "resource_type",
    deserialize_with = "label_string"
  )]
  pub label: String,
  #[serde(alias = "user_count", alias = "activity_count")]
  pub count: u64,
}

/// A label given either directly or as an embedded object, in which case
/// its `id` (or `name`) is used.
pub fn label_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  match Value::deserialize(deserializer)? {
    Value::String(s) => Ok(s),
    Value::Number(n) => Ok(n.to_string()),
    Value::Object(map) => match map.get("id").or_else(|| map.get("name")) {
      Some(Value::String(s)) => Ok(s.clone()),
      Some(Value::Number(n)) => Ok(n.to_string()),
      _ => Err(serde::de::Error::custom("label object without id or name")),
    },
    other => Err(serde::de::Error::custom(format!("invalid label: {}", other))),
  }
}

/// Ids arrive as strings from some endpoints and as numbers from others.
pub fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  match Value::deserialize(deserializer)? {
    Value::String(s) => Ok(s),
    Value::Number(n) => Ok(n.to_string()),
    other => Err(serde::de::Error::custom(format!("invalid id: {}", other))),
  }
}

pub fn opt_id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  match Option::<Value>::deserialize(deserializer)? {
    None | Some(Value::Null) => Ok(None),
    Some(Value::String(s)) => Ok(Some(s)),
    Some(Value::Number(n)) => Ok(Some(n.to_string())),
    Some(other) => Err(serde::de::Error::custom(format!("invalid id: {}", other))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[derive(Debug, Deserialize, PartialEq)]
  struct Item {
    #[serde(deserialize_with = "id_string")]
    id: String,
  }

  #[test]
  fn test_page_math_uses_server_total() {
    let page: Paginated<Item> = Paginated::from_response(
      json!({"data": [{"id": 1}, {"id": "2"}], "total": 21}),
      Some(2),
      Some(10),
    )
    .expect("page");

    assert_eq!(page.data.len(), 2);
    assert_eq!(page.data[0].id, "1");
    assert_eq!(page.total, 21);
    assert_eq!(page.page, 2);
    assert_eq!(page.total_pages, 3);
  }

  #[test]
  fn test_bare_array_defaults() {
    let page: Paginated<Item> =
      Paginated::from_response(json!([{"id": "a"}]), None, None).expect("page");

    assert_eq!(page.total, 1);
    assert_eq!(page.page, 1);
    assert_eq!(page.limit, DEFAULT_PAGE_SIZE);
    assert_eq!(page.total_pages, 1);
  }

  #[test]
  fn test_empty_page_has_zero_pages() {
    let page: Paginated<Item> =
      Paginated::from_response(json!({"data": [], "total": 0}), None, Some(10)).expect("page");
    assert_eq!(page.total_pages, 0);
  }

  #[test]
  fn test_label_count_shapes() {
    let counts: Vec<LabelCount> = serde_json::from_value(json!([
      {"role": "admin", "count": 3},
      {"user": {"id": 7, "name": "Ana"}, "activity_count": 12},
      {"type": "login", "count": 5},
    ]))
    .expect("counts");

    assert_eq!(counts[0].label, "admin");
    assert_eq!(counts[1].label, "7");
    assert_eq!(counts[1].count, 12);
    assert_eq!(counts[2].label, "login");
  }

  #[test]
  fn test_non_list_is_decode_error() {
    let result: Result<Paginated<Item>, _> = Paginated::from_response(json!("nope"), None, None);
    assert!(matches!(result, Err(TransportError::Decode(_))));
  }
}
