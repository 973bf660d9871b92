//! Logical <-> physical translation shared by all adapters.

use serde_json::Value;

use crate::errors::AdapterError;
use crate::query::{Operator, Record, Where};
use crate::schema::{FieldKind, PRIMARY_KEY, Schema, Table, TableField, Transform};

pub fn resolve<'a>(schema: &'a Schema, model: &str) -> Result<&'a Table, AdapterError> {
    schema.table(model).ok_or_else(|| AdapterError::UnknownModel {
        model: model.to_string(),
    })
}

pub fn field<'a>(table: &'a Table, name: &str) -> Result<&'a TableField, AdapterError> {
    table.field(name).ok_or_else(|| AdapterError::UnknownField {
        model: table.entity_name.clone(),
        field: name.to_string(),
    })
}

/// Renames to columns and applies `to_storage` transforms.
pub fn to_storage(table: &Table, record: Record) -> Result<Record, AdapterError> {
    let mut row = Record::new();
    for (name, value) in record {
        let field = field(table, &name)?;
        row.insert(field.column().to_string(), encode_value(field, value)?);
    }
    Ok(row)
}

/// Renames columns back to logical names and applies `from_storage`.
/// Columns the table does not declare are dropped.
pub fn from_storage(table: &Table, mut row: Record) -> Result<Record, AdapterError> {
    let mut record = Record::new();
    for field in &table.fields {
        if let Some(value) = row.remove(field.column()) {
            let value = match storage_transform(field) {
                Some(transform) => transform.from_storage(value)?,
                None => value,
            };
            record.insert(field.name.clone(), value);
        }
    }
    Ok(record)
}

/// Declared transform, or JSON text for untransformed JSON fields.
pub fn storage_transform(field: &TableField) -> Option<Transform> {
    field
        .field
        .transform
        .or_else(|| (field.field.kind == FieldKind::Json).then(Transform::json_text))
}

pub fn encode_value(field: &TableField, value: Value) -> Result<Value, AdapterError> {
    match storage_transform(field) {
        Some(transform) => Ok(transform.to_storage(value)?),
        None => Ok(value),
    }
}

/// Where-condition with its column resolved and comparison value encoded.
#[derive(Debug, Clone)]
pub struct StorageCondition<'a> {
    pub field: &'a TableField,
    pub operator: Operator,
    pub value: Value,
}

impl StorageCondition<'_> {
    pub fn column(&self) -> &str {
        self.field.column()
    }
}

/// Resolves `conditions` against `table`.
///
/// Equality-style values on transformed fields are encoded so they compare
/// against stored text; `contains` keeps the raw element.
pub fn storage_conditions<'a>(table: &'a Table, conditions: &[Where]) -> Result<Vec<StorageCondition<'a>>, AdapterError> {
    conditions
        .iter()
        .map(|condition| {
            let field = field(table, &condition.field)?;
            let value = match (condition.operator, condition.value.clone()) {
                (Operator::Eq | Operator::Ne, value) => encode_value(field, value)?,
                (Operator::In, Value::Array(values)) => Value::Array(
                    values
                        .into_iter()
                        .map(|value| encode_value(field, value))
                        .collect::<Result<_, _>>()?,
                ),
                (_, value) => value,
            };
            Ok(StorageCondition {
                field,
                operator: condition.operator,
                value,
            })
        })
        .collect()
}

/// First unique field or constraint `candidate` would violate among `rows`.
///
/// Rows are logical; the row with the candidate's own id is skipped. Returns
/// the offending field (or constraint) name and the id holding it.
pub fn unique_conflict<'r>(table: &Table, rows: impl IntoIterator<Item = &'r Record>, candidate: &Record) -> Option<(String, String)> {
    let own_id = candidate.get(PRIMARY_KEY);
    let unique_fields: Vec<&str> = table
        .fields
        .iter()
        .filter(|field| field.field.unique)
        .map(|field| field.name.as_str())
        .collect();

    for row in rows {
        if row.get(PRIMARY_KEY) == own_id {
            continue;
        }
        let existing_id = || {
            row.get(PRIMARY_KEY)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        for name in &unique_fields {
            match (candidate.get(*name), row.get(*name)) {
                (Some(value), Some(other)) if !value.is_null() && value == other => {
                    return Some((name.to_string(), existing_id()));
                }
                _ => {}
            }
        }
        for constraint in &table.unique_constraints {
            let all_equal = constraint.fields.iter().all(|name| match (candidate.get(name), row.get(name)) {
                (Some(value), Some(other)) => !value.is_null() && value == other,
                _ => false,
            });
            if all_equal {
                return Some((constraint.name.clone(), existing_id()));
            }
        }
    }
    None
}

/// Primary key of a logical record, as a string.
pub fn record_id(model: &str, record: &Record) -> Result<String, AdapterError> {
    record
        .get(PRIMARY_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AdapterError::MissingId {
            model: model.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityOptions, Options, assemble_schema};
    use serde_json::json;

    fn schema() -> Schema {
        let options = Options::default().with_entity(
            "domain",
            EntityOptions::default().rename_table("domains").rename_field("name", "domain_name"),
        );
        assemble_schema(&options).expect("schema")
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn storage_uses_columns_and_transforms() {
        let schema = schema();
        let table = resolve(&schema, "domain").unwrap();
        let row = to_storage(
            table,
            record(json!({"id": "dom_1", "name": "example.com", "allowedOrigins": ["https://a"]})),
        )
        .unwrap();
        assert_eq!(row["domain_name"], json!("example.com"));
        assert_eq!(row["allowedOrigins"], json!("[\"https://a\"]"));

        let back = from_storage(table, row).unwrap();
        assert_eq!(back["name"], json!("example.com"));
        assert_eq!(back["allowedOrigins"], json!(["https://a"]));
    }

    #[test]
    fn unknown_field_is_an_error() {
        let schema = schema();
        let table = resolve(&schema, "domain").unwrap();
        let err = to_storage(table, record(json!({"colour": "red"}))).unwrap_err();
        assert!(matches!(err, AdapterError::UnknownField { .. }));
        assert!(matches!(resolve(&schema, "visitor"), Err(AdapterError::UnknownModel { .. })));
    }

    #[test]
    fn unique_conflict_ignores_own_row() {
        let schema = schema();
        let table = resolve(&schema, "domain").unwrap();
        let rows = [record(json!({"id": "dom_1", "name": "example.com"}))];
        let same = record(json!({"id": "dom_1", "name": "example.com"}));
        let other = record(json!({"id": "dom_2", "name": "example.com"}));
        assert!(unique_conflict(table, &rows, &same).is_none());
        assert_eq!(
            unique_conflict(table, &rows, &other),
            Some(("name".to_string(), "dom_1".to_string()))
        );
    }
}
