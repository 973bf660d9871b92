//! Field descriptors: the backend-agnostic description of one entity attribute.

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::generate_id;

/// Storage-independent type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Date,
    Json,
    Timezone,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date",
            FieldKind::Json => "json",
            FieldKind::Timezone => "timezone",
        };
        f.write_str(name)
    }
}

/// Zero-argument value generators invoked at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Generator {
    /// Current UTC time as an RFC 3339 string with millisecond precision.
    Now,
    /// Prefixed random identifier using the table's entity prefix.
    Id,
}

impl Generator {
    pub fn generate(&self, entity_prefix: &str) -> Value {
        match self {
            Generator::Now => Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            Generator::Id => Value::String(generate_id(entity_prefix)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Literal(Value),
    Generated(Generator),
}

impl DefaultValue {
    pub fn resolve(&self, entity_prefix: &str) -> Value {
        match self {
            DefaultValue::Literal(value) => value.clone(),
            DefaultValue::Generated(generator) => generator.generate(entity_prefix),
        }
    }
}

/// Lookup relation to a field of another entity. Carries no ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub entity: String,
    #[serde(default = "default_reference_field")]
    pub field: String,
}

fn default_reference_field() -> String {
    "id".to_string()
}

impl Reference {
    pub fn new(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            field: field.into(),
        }
    }
}

/// Names of transforms that can be selected from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Structured value stored as JSON text.
    JsonText,
}

type TransformFn = fn(Value) -> Result<Value, serde_json::Error>;

/// `to_storage`/`from_storage` pair applied by every adapter.
///
/// Transforms compare by name so schemas stay comparable.
#[derive(Clone, Copy)]
pub struct Transform {
    name: &'static str,
    to_storage: TransformFn,
    from_storage: TransformFn,
}

impl Transform {
    pub const fn new(name: &'static str, to_storage: TransformFn, from_storage: TransformFn) -> Self {
        Self {
            name,
            to_storage,
            from_storage,
        }
    }

    /// Any JSON value serialized to text, parsed back on read.
    pub const fn json_text() -> Self {
        Self::new("json_text", json_to_text, text_to_json)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn to_storage(&self, value: Value) -> Result<Value, serde_json::Error> {
        if value.is_null() {
            return Ok(value);
        }
        (self.to_storage)(value)
    }

    pub fn from_storage(&self, value: Value) -> Result<Value, serde_json::Error> {
        if value.is_null() {
            return Ok(value);
        }
        (self.from_storage)(value)
    }
}

impl From<TransformKind> for Transform {
    fn from(kind: TransformKind) -> Self {
        match kind {
            TransformKind::JsonText => Transform::json_text(),
        }
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transform").field(&self.name).finish()
    }
}

impl PartialEq for Transform {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

fn json_to_text(value: Value) -> Result<Value, serde_json::Error> {
    serde_json::to_string(&value).map(Value::String)
}

fn text_to_json(value: Value) -> Result<Value, serde_json::Error> {
    match value {
        Value::String(text) => serde_json::from_str(&text),
        other => Ok(other),
    }
}

/// Descriptor of a single column/attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub kind: FieldKind,
    pub required: bool,
    pub unique: bool,
    pub default_value: Option<DefaultValue>,
    /// Regenerate the default on every update (e.g. `updatedAt`).
    pub on_update: bool,
    /// Column name; `None` means the logical key is used.
    pub physical_name: Option<String>,
    pub reference: Option<Reference>,
    pub transform: Option<Transform>,
}

impl Field {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            required: false,
            unique: false,
            default_value: None,
            on_update: false,
            physical_name: None,
            reference: None,
            transform: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldKind::String)
    }

    pub fn number() -> Self {
        Self::new(FieldKind::Number)
    }

    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    pub fn date() -> Self {
        Self::new(FieldKind::Date)
    }

    pub fn json() -> Self {
        Self::new(FieldKind::Json)
    }

    pub fn timezone() -> Self {
        Self::new(FieldKind::Timezone)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_literal(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(DefaultValue::Literal(value.into()));
        self
    }

    pub fn default_generated(mut self, generator: Generator) -> Self {
        self.default_value = Some(DefaultValue::Generated(generator));
        self
    }

    /// Shorthand for a required timestamp that defaults to the write time.
    pub fn timestamp() -> Self {
        Self::date().required().default_generated(Generator::Now)
    }

    pub fn refreshed_on_update(mut self) -> Self {
        self.on_update = true;
        self
    }

    pub fn physical(mut self, name: impl Into<String>) -> Self {
        self.physical_name = Some(name.into());
        self
    }

    pub fn references(mut self, entity: impl Into<String>, field: impl Into<String>) -> Self {
        self.reference = Some(Reference::new(entity, field));
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// JSON field stored as text.
    pub fn json_text() -> Self {
        Self::json().with_transform(Transform::json_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_text_transform_round_trips_arrays() {
        let transform = Transform::json_text();
        let stored = transform.to_storage(json!(["a", "b"])).expect("to storage");
        assert_eq!(stored, json!("[\"a\",\"b\"]"));
        let restored = transform.from_storage(stored).expect("from storage");
        assert_eq!(restored, json!(["a", "b"]));
    }

    #[test]
    fn transforms_pass_null_through() {
        let transform = Transform::json_text();
        assert_eq!(transform.to_storage(Value::Null).unwrap(), Value::Null);
        assert_eq!(transform.from_storage(Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn id_generator_uses_prefix() {
        let value = Generator::Id.generate("cns");
        assert!(value.as_str().unwrap().starts_with("cns_"));
    }

    #[test]
    fn builder_sets_flags() {
        let field = Field::string().required().unique().physical("domain_name");
        assert!(field.required);
        assert!(field.unique);
        assert_eq!(field.physical_name.as_deref(), Some("domain_name"));
        assert_eq!(field.kind, FieldKind::String);
    }
}
