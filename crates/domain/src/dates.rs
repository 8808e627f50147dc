//! Date algebra for the pipeline clock.
//!
//! All pipeline dates live in a fixed UTC-5 offset (explicitly not
//! DST-aware). "Today" can be overridden per run through the
//! `PIPELINE_RUN_DATE` environment variable so stages can be replayed
//! for past dates.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Environment variable that overrides the pipeline "today" (`YYYY-MM-DD`).
pub const PIPELINE_RUN_DATE: &str = "PIPELINE_RUN_DATE";

/// The fixed UTC-5 offset. Intentionally not DST-aware.
pub fn fixed_offset() -> FixedOffset {
    FixedOffset::west_opt(5 * 3600).unwrap()
}

/// Current time in the fixed UTC-5 offset.
pub fn now_fixed() -> DateTime<FixedOffset> {
    chrono::Utc::now().with_timezone(&fixed_offset())
}

/// Today as a date in the fixed UTC-5 offset.
pub fn today_fixed() -> NaiveDate {
    now_fixed().date_naive()
}

/// Resolve pipeline "today": the `PIPELINE_RUN_DATE` override when set and
/// well-formed, otherwise fixed UTC-5 today.
pub fn pipeline_today() -> NaiveDate {
    if let Ok(v) = std::env::var(PIPELINE_RUN_DATE) {
        if let Ok(d) = NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d") {
            return d;
        }
    }
    today_fixed()
}

/// Pipeline "yesterday" relative to fixed UTC-5.
pub fn pipeline_yesterday() -> NaiveDate {
    today_fixed() - Duration::days(1)
}

/// Midnight of `date` as an aware datetime in the fixed offset.
pub fn midnight_fixed(date: NaiveDate) -> DateTime<FixedOffset> {
    date.and_time(NaiveTime::MIN)
        .and_local_timezone(fixed_offset())
        .unwrap()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Calendar-component arithmetic
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// Add `months` by calendar component replacement, not by duration; this
/// matches human "in 3 months" semantics. The day is clamped to the target
/// month's length (Jan 31 + 1 month = Feb 28/29).
pub fn add_months(date: NaiveDate, months: i32) -> NaiveDate {
    let zero_based = date.year() * 12 + date.month0() as i32 + months;
    let year = zero_based.div_euclid(12);
    let month = zero_based.rem_euclid(12) as u32 + 1;
    let day = date.day().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(date)
}

/// Add `years` by component replacement (see [`add_months`]).
pub fn add_years(date: NaiveDate, years: i32) -> NaiveDate {
    add_months(date, years * 12)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Flexible parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse a date from a stored string: bare ISO date, or any ISO datetime
/// (with or without offset) whose date part is taken as-is.
pub fn parse_date_flexible(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(ndt.date());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|ndt| ndt.date())
}

/// Parse an aware datetime from a stored string. Naive datetimes and bare
/// dates are interpreted in the fixed UTC-5 offset.
pub fn parse_datetime_flexible(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return ndt.and_local_timezone(fixed_offset()).single();
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_local_timezone(fixed_offset()).single();
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(midnight_fixed)
}

/// Coerce a model-returned date string into a date. Accepts everything
/// [`parse_date_flexible`] does plus the long/US formats models like to
/// emit (`January 5, 2025`, `01/05/2025`).
pub fn coerce_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(d) = parse_date_flexible(s) {
        return Some(d);
    }
    for fmt in ["%B %d, %Y", "%m/%d/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    None
}

/// [`coerce_date`] over a JSON value; non-strings coerce to `None`.
pub fn coerce_date_value(value: &serde_json::Value) -> Option<NaiveDate> {
    value.as_str().and_then(coerce_date)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DateLike — the runtime-tagged date union
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A relative date offset from an anchor date. Day and week deltas apply by
/// duration; month and year deltas apply by calendar component replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct DateDelta {
    /// Start date; when absent the caller's anchor is used.
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub from_date: Option<NaiveDate>,
    #[serde(default)]
    pub days_delta: Option<i64>,
    #[serde(default)]
    pub weeks_delta: Option<i64>,
    #[serde(default)]
    pub months_delta: Option<i32>,
    #[serde(default)]
    pub years_delta: Option<i32>,
}

impl DateDelta {
    /// Resolve to an absolute date. Returns `None` when neither `from_date`
    /// nor `anchor` is available.
    pub fn resolve(&self, anchor: Option<NaiveDate>) -> Option<NaiveDate> {
        let mut date = self.from_date.or(anchor)?;
        if let Some(days) = self.days_delta {
            date += Duration::days(days);
        }
        if let Some(weeks) = self.weeks_delta {
            date += Duration::weeks(weeks);
        }
        if let Some(months) = self.months_delta {
            date = add_months(date, months);
        }
        if let Some(years) = self.years_delta {
            date = add_years(date, years);
        }
        Some(date)
    }
}

/// A date-like value as it arrives on the wire: an absolute date, a delta
/// struct, or nothing. Resolved to an absolute date at the boundary; business
/// logic only ever sees `Option<NaiveDate>`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DateLike {
    Absolute(NaiveDate),
    Delta(DateDelta),
    #[default]
    Null,
}

impl DateLike {
    /// Parse with the fixed precedence: ISO date, ISO datetime, delta
    /// struct, null. Anything unrecognized collapses to `Null`.
    pub fn from_value(value: &serde_json::Value) -> DateLike {
        match value {
            serde_json::Value::String(s) => {
                parse_date_flexible(s).map_or(DateLike::Null, DateLike::Absolute)
            }
            serde_json::Value::Object(_) => {
                match serde_json::from_value::<DateDelta>(value.clone()) {
                    Ok(delta) => DateLike::Delta(delta),
                    Err(_) => DateLike::Null,
                }
            }
            _ => DateLike::Null,
        }
    }

    pub fn resolve(&self, anchor: Option<NaiveDate>) -> Option<NaiveDate> {
        match self {
            DateLike::Absolute(d) => Some(*d),
            DateLike::Delta(delta) => delta.resolve(anchor),
            DateLike::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DateLike::Null)
    }
}

impl Serialize for DateLike {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DateLike::Absolute(d) => serializer.serialize_str(&d.format("%Y-%m-%d").to_string()),
            DateLike::Delta(delta) => delta.serialize(serializer),
            DateLike::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for DateLike {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(DateLike::from_value(&value))
    }
}

impl schemars::JsonSchema for DateLike {
    fn schema_name() -> String {
        "DateLike".into()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        let delta = gen.subschema_for::<DateDelta>();
        let value = serde_json::json!({
            "anyOf": [
                { "type": "string", "format": "date" },
                delta,
                { "type": "null" },
            ]
        });
        serde_json::from_value(value).unwrap_or_else(|_| schemars::schema::Schema::Bool(true))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store (de)serialization — every persisted datetime carries -05:00
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serde adapter for date fields: written as midnight datetimes in the
/// fixed offset, read back from either form.
pub mod store_date {
    use super::*;

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&midnight_fixed(*date).to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_date_flexible(&s).ok_or_else(|| D::Error::custom(format!("invalid date: {s}")))
    }
}

/// [`store_date`] for optional fields.
pub mod store_date_opt {
    use super::*;

    pub fn serialize<S: Serializer>(
        date: &Option<NaiveDate>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match date {
            Some(d) => serializer.serialize_some(&midnight_fixed(*d).to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDate>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        match s {
            None => Ok(None),
            Some(s) => parse_date_flexible(&s)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid date: {s}"))),
        }
    }
}

/// Serde adapter for timestamps: RFC 3339 with the explicit offset; naive
/// values read back are interpreted in the fixed offset.
pub mod store_datetime {
    use super::*;

    pub fn serialize<S: Serializer>(
        dt: &DateTime<FixedOffset>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<FixedOffset>, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_datetime_flexible(&s)
            .ok_or_else(|| D::Error::custom(format!("invalid datetime: {s}")))
    }
}

/// [`store_datetime`] for optional fields.
pub mod store_datetime_opt {
    use super::*;

    pub fn serialize<S: Serializer>(
        dt: &Option<DateTime<FixedOffset>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<FixedOffset>>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        match s {
            None => Ok(None),
            Some(s) => parse_datetime_flexible(&s)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid datetime: {s}"))),
        }
    }
}
