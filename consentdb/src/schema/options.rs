//! Deployment configuration consumed by schema assembly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SchemaError;

use super::field::{DefaultValue, Field, FieldKind, Generator, Reference, Transform, TransformKind};

/// Options object supplied by a deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Per-entity overrides keyed by logical entity name.
    #[serde(default)]
    pub tables: BTreeMap<String, EntityOptions>,
    /// Extensions in registration order.
    #[serde(default)]
    pub extensions: Vec<Extension>,
}

impl Options {
    pub fn entity(&self, entity: &str) -> Option<&EntityOptions> {
        self.tables.get(entity)
    }

    pub fn with_extension(mut self, extension: Extension) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn with_entity(mut self, entity: impl Into<String>, options: EntityOptions) -> Self {
        self.tables.insert(entity.into(), options);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityOptions {
    /// Physical table name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    /// Prefix used when generating ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_prefix: Option<String>,
    /// Logical field name -> physical column name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_fields: BTreeMap<String, FieldConfig>,
}

impl EntityOptions {
    pub fn rename_table(mut self, name: impl Into<String>) -> Self {
        self.entity_name = Some(name.into());
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.entity_prefix = Some(prefix.into());
        self
    }

    pub fn rename_field(mut self, logical: impl Into<String>, physical: impl Into<String>) -> Self {
        self.fields.insert(logical.into(), physical.into());
        self
    }

    pub fn additional_field(mut self, name: impl Into<String>, field: FieldConfig) -> Self {
        self.additional_fields.insert(name.into(), field);
        self
    }
}

/// External contributor of fields or whole entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extension {
    pub id: String,
    #[serde(default)]
    pub schema: BTreeMap<String, ExtensionTable>,
}

impl Extension {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            schema: BTreeMap::new(),
        }
    }

    pub fn table(mut self, entity: impl Into<String>, table: ExtensionTable) -> Self {
        self.schema.insert(entity.into(), table);
        self
    }
}

/// Fields an extension contributes to one entity.
///
/// `order`, `entity_prefix` and `entity_name` only apply when the extension
/// declares an entity the core does not know.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtensionTable {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
}

impl ExtensionTable {
    pub fn field(mut self, name: impl Into<String>, field: FieldConfig) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn order(mut self, order: u32) -> Self {
        self.order = Some(order);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultConfig {
    Generated { generator: Generator },
    Literal(Value),
}

/// Serializable form of [`Field`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultConfig>,
    #[serde(default)]
    pub on_update: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformKind>,
}

impl FieldConfig {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            required: false,
            unique: false,
            default: None,
            on_update: false,
            field_name: None,
            references: None,
            transform: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = Some(name.into());
        self
    }

    pub fn references(mut self, entity: impl Into<String>, field: impl Into<String>) -> Self {
        self.references = Some(Reference::new(entity, field));
        self
    }

    pub fn default(mut self, default: DefaultConfig) -> Self {
        self.default = Some(default);
        self
    }

    pub fn transform(mut self, transform: TransformKind) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn into_field(self, entity: &str, name: &str) -> Result<Field, SchemaError> {
        let default_value = match self.default {
            None => None,
            Some(DefaultConfig::Generated { generator }) => Some(DefaultValue::Generated(generator)),
            Some(DefaultConfig::Literal(value)) => {
                if !literal_matches_kind(&value, self.kind) {
                    return Err(SchemaError::InvalidField {
                        entity: entity.to_string(),
                        field: name.to_string(),
                        message: format!("default {value} is not a valid {} value", self.kind),
                    });
                }
                Some(DefaultValue::Literal(value))
            }
        };
        Ok(Field {
            kind: self.kind,
            required: self.required,
            unique: self.unique,
            default_value,
            on_update: self.on_update,
            physical_name: self.field_name,
            reference: self.references,
            transform: self.transform.map(Transform::from),
        })
    }
}

fn literal_matches_kind(value: &Value, kind: FieldKind) -> bool {
    match kind {
        FieldKind::String | FieldKind::Timezone | FieldKind::Date => value.is_string(),
        FieldKind::Number => value.is_number(),
        FieldKind::Boolean => value.is_boolean(),
        FieldKind::Json => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_parse_from_toml() {
        let source = r#"
            [tables.domain]
            entity_name = "domains"

            [tables.domain.fields]
            name = "domain_name"

            [[extensions]]
            id = "geo"

            [extensions.schema.visitor.fields.country]
            type = "string"
            required = true

            [extensions.schema.visitor.fields.firstSeen]
            type = "date"
            default = { generator = "now" }
        "#;
        let options: Options = toml::from_str(source).expect("parse options");
        let domain = options.entity("domain").expect("domain options");
        assert_eq!(domain.entity_name.as_deref(), Some("domains"));
        assert_eq!(domain.fields.get("name").map(String::as_str), Some("domain_name"));

        let visitor = &options.extensions[0].schema["visitor"];
        assert!(visitor.fields["country"].required);
        assert_eq!(
            visitor.fields["firstSeen"].default,
            Some(DefaultConfig::Generated {
                generator: Generator::Now
            })
        );
    }

    #[test]
    fn literal_default_must_match_kind() {
        let config = FieldConfig::new(FieldKind::Boolean).default(DefaultConfig::Literal(json!("yes")));
        let err = config.into_field("domain", "isVerified").unwrap_err();
        assert!(matches!(err, SchemaError::InvalidField { .. }));
    }

    #[test]
    fn into_field_keeps_reference_and_transform() {
        let field = FieldConfig::new(FieldKind::Json)
            .references("consent", "id")
            .transform(TransformKind::JsonText)
            .into_field("x", "y")
            .expect("field");
        assert_eq!(field.reference, Some(Reference::new("consent", "id")));
        assert_eq!(field.transform, Some(Transform::json_text()));
    }
}
