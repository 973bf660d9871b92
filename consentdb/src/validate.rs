//! Output validation: the typed surface every adapter row passes through.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Number, Value};

use crate::errors::{ValidationError, ValidationIssue, ValidationResult};
use crate::query::Record;
use crate::schema::{FieldKind, PRIMARY_KEY, Table, TableField};

/// IANA zone name, `UTC`, or a fixed `+hh:mm` offset.
static TIMEZONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:UTC|GMT|[A-Za-z]+(?:/[A-Za-z0-9_+\-]+)+|[+-](?:[01]\d|2[0-3]):[0-5]\d)$")
        .expect("timezone pattern is a valid regex")
});

fn is_timezone(zone: &str) -> bool {
    TIMEZONE_RE.is_match(zone)
}

/// Accepted textual date formats besides RFC 3339.
const NAIVE_DATE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(Number),
    String(String),
    Date(DateTime<Utc>),
    Json(Value),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Date(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Bool(value) => Value::Bool(*value),
            FieldValue::Number(value) => Value::Number(value.clone()),
            FieldValue::String(value) => Value::String(value.clone()),
            FieldValue::Date(value) => Value::String(value.to_rfc3339_opts(SecondsFormat::Millis, true)),
            FieldValue::Json(value) => value.clone(),
        }
    }
}

/// Validated row keyed by logical field name. Null optional fields are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TypedRecord {
    values: BTreeMap<String, FieldValue>,
}

impl TypedRecord {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn id(&self) -> Option<&str> {
        self.get(PRIMARY_KEY).and_then(FieldValue::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// JSON form with dates rendered as RFC 3339.
    pub fn to_json(&self) -> Record {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.to_json()))
    }
}

/// Coerces and checks a raw adapter row against `table`.
///
/// Date fields accept RFC 3339 strings, `YYYY-MM-DD HH:MM:SS[.fff]` strings
/// (read as UTC) and integer epoch milliseconds. Keys the table does not
/// declare are dropped.
pub fn validate_output(table: &Table, mut raw: Record) -> ValidationResult<TypedRecord> {
    let mut values = BTreeMap::new();
    let mut issues = Vec::new();

    for field in &table.fields {
        let value = raw.remove(&field.name).unwrap_or(Value::Null);
        if value.is_null() {
            if field.field.required {
                issues.push(ValidationIssue::new(
                    &field.name,
                    "validation.required",
                    format!("{}.{} is required", table.entity_name, field.name),
                ));
            }
            continue;
        }
        match coerce(field, value) {
            Ok(typed) => {
                values.insert(field.name.clone(), typed);
            }
            Err(issue) => issues.push(issue),
        }
    }

    if issues.is_empty() {
        Ok(TypedRecord { values })
    } else {
        Err(ValidationError::new(issues))
    }
}

fn coerce(field: &TableField, value: Value) -> Result<FieldValue, ValidationIssue> {
    let kind = field.field.kind;
    let mismatch = |value: &Value| {
        ValidationIssue::new(
            &field.name,
            "validation.type",
            format!("expected {kind}, got {}", describe(value)),
        )
    };

    match (kind, value) {
        (FieldKind::String, Value::String(text)) => Ok(FieldValue::String(text)),
        (FieldKind::Number, Value::Number(number)) => Ok(FieldValue::Number(number)),
        (FieldKind::Boolean, Value::Bool(flag)) => Ok(FieldValue::Bool(flag)),
        // integer-backed booleans
        (FieldKind::Boolean, Value::Number(number)) if matches!(number.as_i64(), Some(0 | 1)) => {
            Ok(FieldValue::Bool(number.as_i64() == Some(1)))
        }
        (FieldKind::Date, Value::String(text)) => parse_date(&text).map(FieldValue::Date).ok_or_else(|| {
            ValidationIssue::new(&field.name, "validation.date", format!("`{text}` is not a valid date"))
        }),
        (FieldKind::Date, Value::Number(number)) => number
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .map(FieldValue::Date)
            .ok_or_else(|| {
                ValidationIssue::new(&field.name, "validation.date", format!("{number} is not a valid timestamp"))
            }),
        (FieldKind::Json, value) => Ok(FieldValue::Json(value)),
        (FieldKind::Timezone, Value::String(zone)) => {
            if is_timezone(&zone) {
                Ok(FieldValue::String(zone))
            } else {
                Err(ValidationIssue::new(
                    &field.name,
                    "validation.timezone",
                    format!("`{zone}` is not a timezone"),
                ))
            }
        }
        (_, other) => Err(mismatch(&other)),
    }
}

pub(crate) fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NAIVE_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, TableDefinition, build_table};
    use serde_json::json;

    fn table() -> Table {
        let definition = TableDefinition::new("subject", "sub", 1)
            .field("externalId", Field::string())
            .field("isActive", Field::boolean().required())
            .field("subjectTimezone", Field::timezone())
            .field("createdAt", Field::timestamp())
            .field("tags", Field::json_text());
        build_table(definition, None, &[]).expect("table")
    }

    fn raw(value: Value) -> Record {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn date_strings_become_dates() {
        let record = validate_output(
            &table(),
            raw(json!({
                "id": "sub_1",
                "isActive": true,
                "createdAt": "2024-05-01 10:30:00.250",
            })),
        )
        .expect("valid");
        let created = record.get("createdAt").and_then(FieldValue::as_date).expect("date");
        assert_eq!(created.to_rfc3339_opts(SecondsFormat::Millis, true), "2024-05-01T10:30:00.250Z");
    }

    #[test]
    fn epoch_millis_and_integer_booleans_are_accepted() {
        let record = validate_output(
            &table(),
            raw(json!({"id": "sub_1", "isActive": 1, "createdAt": 0})),
        )
        .expect("valid");
        assert_eq!(record.get("isActive"), Some(&FieldValue::Bool(true)));
        assert_eq!(
            record.get("createdAt").and_then(FieldValue::as_date),
            Utc.timestamp_millis_opt(0).single()
        );
    }

    #[test]
    fn issues_are_reported_per_field() {
        let err = validate_output(
            &table(),
            raw(json!({
                "id": "sub_1",
                "createdAt": "yesterday",
                "subjectTimezone": "Mars/Olympus Mons",
            })),
        )
        .unwrap_err();
        let codes: Vec<_> = err.issues.iter().map(|i| (i.field.as_str(), i.code.as_str())).collect();
        assert_eq!(
            codes,
            [
                ("isActive", "validation.required"),
                ("subjectTimezone", "validation.timezone"),
                ("createdAt", "validation.date"),
            ]
        );
        assert_eq!(err.for_field("subjectTimezone").count(), 1);
        assert_eq!(err.for_field("id").count(), 0);
    }

    #[test]
    fn unknown_keys_and_null_optionals_are_dropped() {
        let record = validate_output(
            &table(),
            raw(json!({
                "id": "sub_1",
                "isActive": false,
                "createdAt": "2024-05-01T00:00:00Z",
                "externalId": null,
                "legacyColumn": 42,
            })),
        )
        .expect("valid");
        assert!(record.get("externalId").is_none());
        assert!(record.get("legacyColumn").is_none());
        assert_eq!(record.id(), Some("sub_1"));
    }

    #[test]
    fn timezones_accept_iana_names_and_offsets() {
        for zone in ["UTC", "Europe/Berlin", "America/Argentina/Buenos_Aires", "+05:30"] {
            assert!(is_timezone(zone), "{zone}");
        }
        assert!(!is_timezone("+25:00"));
    }
}
