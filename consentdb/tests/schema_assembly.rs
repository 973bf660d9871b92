//! Schema assembly from deployment options and extensions.

use consentdb::SchemaError;
use consentdb::schema::{
    EntityOptions, Extension, ExtensionTable, FieldConfig, FieldKind, FieldSource, Options, assemble_schema, entities,
};

fn audit_extension() -> Extension {
    Extension::new("audit-trail")
        .table(
            entities::CONSENT,
            ExtensionTable::default().field("reviewedBy", FieldConfig::new(FieldKind::String)),
        )
        .table(
            "consentReview",
            ExtensionTable::default()
                .field("consentId", FieldConfig::new(FieldKind::String).required().references(entities::CONSENT, "id"))
                .field("outcome", FieldConfig::new(FieldKind::String).required()),
        )
}

#[test]
fn assembly_is_deterministic() {
    let options = Options::default()
        .with_extension(audit_extension())
        .with_entity(entities::SUBJECT, EntityOptions::default().rename_table("subjects"));
    let first = assemble_schema(&options).unwrap();
    let second = assemble_schema(&options).unwrap();
    assert_eq!(first, second);
}

#[test]
fn every_builtin_reference_targets_a_lower_order() {
    let schema = assemble_schema(&Options::default()).unwrap();
    for table in schema.tables_in_order() {
        for field in &table.fields {
            let Some(reference) = &field.field.reference else {
                continue;
            };
            let target = schema.table(&reference.entity).unwrap();
            assert!(
                target.order < table.order,
                "{}.{} -> {} ({} !< {})",
                table.entity_name,
                field.name,
                reference.entity,
                target.order,
                table.order
            );
        }
    }
}

#[test]
fn extensions_add_fields_and_new_entities() {
    let schema = assemble_schema(&Options::default().with_extension(audit_extension())).unwrap();

    let consent = schema.table(entities::CONSENT).unwrap();
    let reviewed_by = consent.field("reviewedBy").unwrap();
    assert_eq!(reviewed_by.source, FieldSource::Extension("audit-trail".into()));

    let review = schema.table("consentReview").unwrap();
    assert_eq!(review.order, consent.order + 1);
    assert_eq!(review.table_name, "consentReview");
    assert!(review.primary_key().is_some());
    let consent_id = review.field("consentId").unwrap();
    assert_eq!(consent_id.foreign_key.as_ref().map(|fk| fk.table.as_str()), Some("consent"));
    assert!(schema.reference_issues().is_empty());
}

#[test]
fn deployment_fields_take_precedence_over_extensions() {
    let options = Options::default()
        .with_extension(audit_extension())
        .with_entity(
            entities::CONSENT,
            EntityOptions::default().additional_field("reviewedBy", FieldConfig::new(FieldKind::Json)),
        );
    let schema = assemble_schema(&options).unwrap();
    let field = schema.table(entities::CONSENT).unwrap().field("reviewedBy").unwrap();
    assert_eq!(field.field.kind, FieldKind::Json);
    assert_eq!(field.source, FieldSource::Deployment);
}

#[test]
fn colliding_physical_names_fail_assembly() {
    let options = Options::default().with_entity(
        entities::DOMAIN,
        EntityOptions::default().rename_field("description", "name"),
    );
    let err = assemble_schema(&options).unwrap_err();
    assert!(matches!(err, SchemaError::PhysicalNameCollision { .. }));
}

#[test]
fn options_load_from_toml() {
    let options: Options = toml::from_str(
        r#"
[tables.consent]
entity_name = "consents"
entity_prefix = "c"

[tables.consent.fields]
subjectId = "subject_id"

[[extensions]]
id = "crm"

[extensions.schema.subject.fields.crmId]
type = "string"
unique = true
"#,
    )
    .unwrap();
    let schema = assemble_schema(&options).unwrap();
    let consent = schema.table(entities::CONSENT).unwrap();
    assert_eq!(consent.table_name, "consents");
    assert_eq!(consent.entity_prefix, "c");
    assert_eq!(consent.column_for("subjectId").unwrap(), "subject_id");
    assert!(schema.table(entities::SUBJECT).unwrap().field("crmId").unwrap().field.unique);
}
