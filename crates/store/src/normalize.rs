//! Recursive date normalization applied to every payload on its way into
//! the store.
//!
//! Rules:
//! - bare ISO dates become midnight datetimes in the fixed -05:00 offset;
//! - naive datetimes gain the -05:00 offset;
//! - offset-aware datetimes are rewritten to the same instant at -05:00;
//! - delta objects (`{from_date, days_delta, …}`) resolve to absolute
//!   dates, or `null` when unresolvable.
//!
//! The walk is pure and idempotent: normalizing twice equals normalizing
//! once. Only values that match a date shape exactly are touched.

use chrono::NaiveDate;
use serde_json::Value;

use cw_domain::dates::{self, DateDelta};

const DELTA_KEYS: [&str; 4] = ["days_delta", "weeks_delta", "months_delta", "years_delta"];

fn looks_like_delta(map: &serde_json::Map<String, Value>) -> bool {
    DELTA_KEYS.iter().any(|k| map.contains_key(*k))
}

fn normalize_string(s: &str) -> Option<Value> {
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(Value::String(dates::midnight_fixed(d).to_rfc3339()));
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        let fixed = dt.with_timezone(&dates::fixed_offset());
        return Some(Value::String(fixed.to_rfc3339()));
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        let fixed = ndt.and_local_timezone(dates::fixed_offset()).single()?;
        return Some(Value::String(fixed.to_rfc3339()));
    }
    None
}

/// Normalize one JSON payload. See the module docs for the rules.
pub fn normalize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => normalize_string(s).unwrap_or_else(|| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        Value::Object(map) => {
            if looks_like_delta(map) {
                if let Ok(delta) = serde_json::from_value::<DateDelta>(value.clone()) {
                    return match delta.resolve(None) {
                        Some(d) => Value::String(dates::midnight_fixed(d).to_rfc3339()),
                        None => Value::Null,
                    };
                }
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect(),
            )
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_date_becomes_offset_midnight() {
        let v = normalize_value(&json!({"date": "2025-06-01"}));
        assert_eq!(v["date"], json!("2025-06-01T00:00:00-05:00"));
    }

    #[test]
    fn naive_datetime_gains_offset() {
        let v = normalize_value(&json!("2025-06-01T09:30:00"));
        assert_eq!(v, json!("2025-06-01T09:30:00-05:00"));
    }

    #[test]
    fn aware_datetime_is_rewritten_to_fixed_offset() {
        let v = normalize_value(&json!("2025-06-01T05:00:00+00:00"));
        assert_eq!(v, json!("2025-06-01T00:00:00-05:00"));
    }

    #[test]
    fn delta_object_resolves() {
        let v = normalize_value(&json!({
            "follow_up_date": {"from_date": "2025-06-01", "days_delta": 30}
        }));
        assert_eq!(v["follow_up_date"], json!("2025-07-01T00:00:00-05:00"));
    }

    #[test]
    fn unresolvable_delta_collapses_to_null() {
        let v = normalize_value(&json!({"follow_up_date": {"days_delta": 30}}));
        assert_eq!(v["follow_up_date"], Value::Null);
    }

    #[test]
    fn plain_text_and_numbers_untouched() {
        let input = json!({"title": "Rule of 2025-wide scope", "n": 42, "ok": true});
        assert_eq!(normalize_value(&input), input);
    }

    #[test]
    fn normalization_is_idempotent() {
        let input = json!({
            "date": "2025-06-01",
            "created_at": "2025-06-01T09:30:00",
            "nested": [{"d": {"from_date": "2025-01-01", "months_delta": 3}}],
        });
        let once = normalize_value(&input);
        let twice = normalize_value(&once);
        assert_eq!(once, twice);
    }
}
