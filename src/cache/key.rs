//! Deterministic cache key construction.

use serde::Serialize;
use serde_json::Value;

/// Render `params` as canonical JSON: object keys sorted, null fields
/// dropped. Equal parameter sets always render identically, whatever the
/// field order they were built with.
pub fn canonical_params<P: Serialize + ?Sized>(params: &P) -> String {
  match serde_json::to_value(params) {
    Ok(value) => {
      let mut out = String::new();
      write_canonical(&value, &mut out);
      out
    }
    // Unserializable params cannot collide with a real key
    Err(_) => "!".to_string(),
  }
}

/// `resource:canonical-params`, the shape of every parameterized key.
pub fn keyed<P: Serialize + ?Sized>(resource: &str, params: &P) -> String {
  format!("{}:{}", resource, canonical_params(params))
}

fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<(&String, &Value)> =
        map.iter().filter(|(_, v)| !v.is_null()).collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));

      out.push('{');
      for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(value, out);
      }
      out.push('}');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    scalar => out.push_str(&scalar.to_string()),
  }
}
