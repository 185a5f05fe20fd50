//! Synchronous pre-flight checks run before mutating requests.
//!
//! Every check fails on the first problem with a field-level message.

use chrono::{DateTime, NaiveDate, Utc};
use regex_lite::Regex;
use std::sync::OnceLock;

use crate::error::ValidationError;

pub type Validation = Result<(), ValidationError>;

fn email_regex() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"))
}

fn phone_regex() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"^[+]?[1-9][0-9]{0,15}$").expect("valid phone regex"))
}

pub fn is_valid_email(email: &str) -> bool {
  email_regex().is_match(email)
}

/// Digits with an optional leading `+`, whitespace ignored.
pub fn is_valid_phone(phone: &str) -> bool {
  let compact: String = phone.chars().filter(|c| !c.is_whitespace()).collect();
  phone_regex().is_match(&compact)
}

pub fn is_valid_url(candidate: &str) -> bool {
  url::Url::parse(candidate).is_ok()
}

/// RFC 3339 timestamp or plain `YYYY-MM-DD`.
pub fn parse_date(candidate: &str) -> Option<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(candidate) {
    return Some(dt.with_timezone(&Utc));
  }
  NaiveDate::parse_from_str(candidate, "%Y-%m-%d")
    .ok()
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .map(|dt| dt.and_utc())
}

/// Required, and at least `min` characters once trimmed.
pub fn min_trimmed(field: &'static str, value: &str, min: usize, message: &str) -> Validation {
  if value.trim().chars().count() < min {
    return Err(ValidationError::new(field, message));
  }
  Ok(())
}

pub fn required(field: &'static str, value: &str, message: &str) -> Validation {
  min_trimmed(field, value, 1, message)
}

pub fn max_len(field: &'static str, value: &str, max: usize, message: &str) -> Validation {
  if value.chars().count() > max {
    return Err(ValidationError::new(field, message));
  }
  Ok(())
}

pub fn email(field: &'static str, value: &str) -> Validation {
  if !is_valid_email(value) {
    return Err(ValidationError::new(field, "Email inválido"));
  }
  Ok(())
}

pub fn phone(field: &'static str, value: &str) -> Validation {
  if !is_valid_phone(value) {
    return Err(ValidationError::new(field, "Telefone inválido"));
  }
  Ok(())
}

/// A batch must hold between one and `max_batch` items.
pub fn batch_size(field: &'static str, len: usize, max_batch: usize) -> Validation {
  if len == 0 {
    return Err(ValidationError::new(field, "Nenhum item informado para a operação em lote"));
  }
  if len > max_batch {
    return Err(ValidationError::new(
      field,
      format!("Operação em lote limitada a {} itens", max_batch),
    ));
  }
  Ok(())
}

pub fn non_empty_ids(field: &'static str, ids: &[String], max_batch: usize) -> Validation {
  batch_size(field, ids.len(), max_batch)?;
  if ids.iter().any(|id| id.trim().is_empty()) {
    return Err(ValidationError::new(field, "IDs não podem ser vazios"));
  }
  Ok(())
}
