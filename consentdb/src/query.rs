//! Where-conditions, sorting and paging shared by every adapter.
//!
//! Conditions are always expressed in logical field names; adapters translate
//! them to physical columns. Backends without a query language evaluate them
//! in-process with [`Where::matches`].

use std::cmp::Ordering;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Row as seen by the adapter contract: logical field name -> JSON value.
pub type Record = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Field value equals one of the values in a JSON array.
    In,
    /// Array field holds the value, or string field contains the substring.
    Contains,
    StartsWith,
    EndsWith,
    /// Case-insensitive pattern with `%` and `_` wildcards.
    Ilike,
}

/// One condition; a query is a list of them ANDed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Where {
    pub field: String,
    #[serde(default)]
    pub operator: Operator,
    pub value: Value,
}

impl Where {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Eq, value)
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Contains, value)
    }

    pub fn ilike(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(field, Operator::Ilike, Value::String(pattern.into()))
    }

    /// Evaluates the condition against a logical record. Missing fields read as null.
    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.get(&self.field).unwrap_or(&Value::Null);
        match self.operator {
            Operator::Eq => values_equal(actual, &self.value),
            Operator::Ne => !values_equal(actual, &self.value),
            Operator::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            Operator::Lte => matches!(compare_values(actual, &self.value), Some(Ordering::Less | Ordering::Equal)),
            Operator::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
            Operator::Gte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::In => match &self.value {
                Value::Array(candidates) => candidates.iter().any(|candidate| values_equal(actual, candidate)),
                _ => false,
            },
            Operator::Contains => match (actual, &self.value) {
                (Value::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
                _ => false,
            },
            Operator::StartsWith => match (actual, &self.value) {
                (Value::String(text), Value::String(prefix)) => text.starts_with(prefix.as_str()),
                _ => false,
            },
            Operator::EndsWith => match (actual, &self.value) {
                (Value::String(text), Value::String(suffix)) => text.ends_with(suffix.as_str()),
                _ => false,
            },
            Operator::Ilike => match (actual, &self.value) {
                (Value::String(text), Value::String(pattern)) => {
                    like_pattern(pattern).is_ok_and(|regex| regex.is_match(text))
                }
                _ => false,
            },
        }
    }
}

/// True when every condition holds.
pub fn matches_all(conditions: &[Where], record: &Record) -> bool {
    conditions.iter().all(|condition| condition.matches(record))
}

/// Translates a `LIKE` pattern into an anchored, case-insensitive regex.
pub fn like_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::from("(?is)^");
    let mut buf = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    source.push('$');
    Regex::new(&source)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Orders numbers numerically and strings lexically; other pairs are unordered.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    #[inline]
    pub const fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortOrder,
}

impl SortBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortOrder::Desc,
        }
    }
}

/// Arguments of `find_many`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindMany {
    #[serde(default, rename = "where")]
    pub conditions: Vec<Where>,
    #[serde(default)]
    pub sort_by: Option<SortBy>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl FindMany {
    pub fn new(conditions: Vec<Where>) -> Self {
        Self {
            conditions,
            ..Self::default()
        }
    }

    pub fn sort_by(mut self, sort: SortBy) -> Self {
        self.sort_by = Some(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Sorts and pages already-filtered logical records.
    pub fn apply_window(&self, mut records: Vec<Record>) -> Vec<Record> {
        if let Some(sort) = &self.sort_by {
            records.sort_by(|a, b| {
                let left = a.get(&sort.field).unwrap_or(&Value::Null);
                let right = b.get(&sort.field).unwrap_or(&Value::Null);
                // nulls sort last regardless of direction
                let ordering = match (left.is_null(), right.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => return Ordering::Greater,
                    (false, true) => return Ordering::Less,
                    (false, false) => compare_values(left, right).unwrap_or(Ordering::Equal),
                };
                match sort.direction {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            });
        }
        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        records.into_iter().skip(offset).take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn eq_treats_missing_as_null() {
        let row = record(json!({"name": "example.com"}));
        assert!(Where::eq("name", "example.com").matches(&row));
        assert!(Where::eq("description", Value::Null).matches(&row));
        assert!(!Where::eq("name", "other.org").matches(&row));
    }

    #[test]
    fn contains_checks_arrays_and_substrings() {
        let row = record(json!({"purposeIds": ["pur_a", "pur_b"], "userAgent": "Mozilla/5.0"}));
        assert!(Where::contains("purposeIds", "pur_b").matches(&row));
        assert!(!Where::contains("purposeIds", "pur_c").matches(&row));
        assert!(Where::contains("userAgent", "zilla").matches(&row));
    }

    #[test]
    fn ilike_is_case_insensitive_with_wildcards() {
        let row = record(json!({"name": "Example.COM"}));
        assert!(Where::ilike("name", "example.%").matches(&row));
        assert!(Where::ilike("name", "_xample.com").matches(&row));
        assert!(!Where::ilike("name", "example").matches(&row));
        // regex metacharacters are literal
        assert!(!Where::ilike("name", "example_com.+").matches(&row));
    }

    #[test]
    fn range_and_in_operators() {
        let row = record(json!({"version": 3, "status": "active"}));
        assert!(Where::new("version", Operator::Gt, 2).matches(&row));
        assert!(Where::new("version", Operator::Lte, 3.0).matches(&row));
        assert!(!Where::new("version", Operator::Lt, 3).matches(&row));
        assert!(Where::new("status", Operator::In, json!(["withdrawn", "active"])).matches(&row));
    }

    #[test]
    fn window_sorts_nulls_last_then_pages() {
        let rows = vec![
            record(json!({"id": "a", "rank": 2})),
            record(json!({"id": "b"})),
            record(json!({"id": "c", "rank": 1})),
            record(json!({"id": "d", "rank": 3})),
        ];
        let query = FindMany::default().sort_by(SortBy::desc("rank")).offset(1).limit(2);
        let ids: Vec<_> = query
            .apply_window(rows)
            .iter()
            .map(|row| row["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, ["a", "c"]);
    }
}
