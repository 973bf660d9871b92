//! Migration planning against introspected structure, without a database.

use consentdb::migration::{Dialect, LiveColumn, LiveSchema, LiveTable, compile, plan, render_migration_file};
use consentdb::schema::{Schema, entities};
use consentdb::{Options, assemble_schema};

fn domain_and_consent() -> Schema {
    let full = assemble_schema(&Options::default()).unwrap();
    Schema::from_tables(
        full.tables_in_order()
            .into_iter()
            .filter(|table| table.entity_name == entities::DOMAIN || table.entity_name == entities::CONSENT)
            .cloned(),
    )
}

fn live_table(name: &str, columns: &[&str]) -> LiveTable {
    LiveTable {
        name: name.to_string(),
        columns: columns
            .iter()
            .map(|column| LiveColumn {
                name: column.to_string(),
                data_type: "TEXT".into(),
                nullable: true,
            })
            .collect(),
    }
}

#[test]
fn empty_database_creates_referenced_tables_first() {
    let schema = domain_and_consent();
    let planned = plan(&schema, &LiveSchema::default());

    let created: Vec<&str> = planned.to_be_created.iter().map(|t| t.entity_name.as_str()).collect();
    assert_eq!(created, [entities::DOMAIN, entities::CONSENT]);
    assert!(planned.to_be_added.is_empty());

    for dialect in [Dialect::Postgres, Dialect::Sqlite, Dialect::Mysql] {
        let sql = compile(&planned, dialect).unwrap().forward();
        let domain = sql.find(&dialect.quote_ident("domain")).unwrap();
        let consent = sql.find(&format!("TABLE IF NOT EXISTS {}", dialect.quote_ident("consent"))).unwrap();
        assert!(domain < consent, "{dialect}: domain must precede consent");
    }
}

#[test]
fn existing_columns_are_never_touched() {
    let schema = domain_and_consent();
    let domain = schema.table(entities::DOMAIN).unwrap();
    let mut live_domain = live_table("DOMAIN", &domain.columns());
    live_domain.columns.push(LiveColumn {
        name: "legacyFlag".into(),
        data_type: "INTEGER".into(),
        nullable: false,
    });
    let live = LiveSchema {
        tables: vec![live_domain, live_table("consent", &["id", "subjectId", "domainId"])],
    };

    let planned = plan(&schema, &live);
    assert!(planned.to_be_created.is_empty());
    assert_eq!(planned.to_be_added.len(), 1);
    let addition = &planned.to_be_added[0];
    assert_eq!(addition.entity, entities::CONSENT);
    assert!(addition.fields.iter().all(|field| !["id", "subjectId", "domainId"].contains(&field.column())));

    let compiled = compile(&planned, Dialect::Postgres).unwrap();
    assert!(compiled.statements.iter().all(|statement| statement.starts_with("ALTER TABLE \"consent\" ADD COLUMN")
        || statement.starts_with("CREATE UNIQUE INDEX")));
    assert!(!compiled.forward().contains("DROP"));
    assert!(!compiled.forward().contains("legacyFlag"));
}

#[test]
fn up_to_date_database_renders_a_no_op_file() {
    let schema = domain_and_consent();
    let live = LiveSchema {
        tables: schema
            .tables_in_order()
            .into_iter()
            .map(|table| live_table(&table.table_name, &table.columns()))
            .collect(),
    };
    let planned = plan(&schema, &live);
    assert!(planned.is_empty());

    let compiled = compile(&planned, Dialect::Sqlite).unwrap();
    assert!(compiled.forward().is_empty());
    let file = render_migration_file(&compiled, "noop", chrono::Utc::now());
    assert!(file.contains("-- No changes"));
}
