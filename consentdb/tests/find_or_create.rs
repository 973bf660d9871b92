//! Concurrent find-or-create must never produce duplicate rows.

use std::sync::Arc;

use consentdb::migration::{Dialect, generate_migration};
use consentdb::schema::entities;
use consentdb::{Adapter, MemoryAdapter, Options, Pipeline, Registry, SqlAdapter, SubjectLookup, Where, assemble_schema};

async fn assert_single_domain<A: Adapter>(registry: &Registry<A>) {
    let (first, second) = tokio::join!(
        registry.find_or_create_domain("example.com"),
        registry.find_or_create_domain("example.com"),
    );
    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.id(), second.id());
    assert_eq!(
        registry
            .count(entities::DOMAIN, &[Where::eq("name", "example.com")])
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn concurrent_domain_creation_on_memory_backend() {
    let schema = Arc::new(assemble_schema(&Options::default()).unwrap());
    let registry = Registry::new(MemoryAdapter::new(Arc::clone(&schema)), Pipeline::new(schema));
    assert_single_domain(&registry).await;
}

#[tokio::test]
async fn concurrent_domain_creation_on_sqlite() {
    let schema = Arc::new(assemble_schema(&Options::default()).unwrap());
    let adapter = SqlAdapter::in_memory(Arc::clone(&schema)).await.unwrap();
    let migration = generate_migration(&adapter, &schema, Dialect::Sqlite).await.unwrap();
    adapter.apply_migration(&migration).await.unwrap();
    let registry = Registry::new(adapter, Pipeline::new(schema));
    assert_single_domain(&registry).await;
}

#[tokio::test]
async fn concurrent_domain_creation_on_file_backed_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("consent.db").display());
    let schema = Arc::new(assemble_schema(&Options::default()).unwrap());
    let adapter = SqlAdapter::connect(&url, Arc::clone(&schema)).await.unwrap();
    let migration = generate_migration(&adapter, &schema, Dialect::Sqlite).await.unwrap();
    adapter.apply_migration(&migration).await.unwrap();
    let registry = Registry::new(adapter, Pipeline::new(schema));

    for round in 0..20 {
        let name = format!("round-{round}.example");
        let (first, second) = tokio::join!(
            registry.find_or_create_domain(&name),
            registry.find_or_create_domain(&name),
        );
        assert_eq!(first.unwrap().id(), second.unwrap().id(), "round {round}");
    }
    assert_eq!(registry.count(entities::DOMAIN, &[]).await.unwrap(), 20);
}

#[tokio::test]
async fn concurrent_subject_lookups_share_one_row() {
    let schema = Arc::new(assemble_schema(&Options::default()).unwrap());
    let registry = Registry::new(MemoryAdapter::new(Arc::clone(&schema)), Pipeline::new(schema));

    let lookup = || registry.find_or_create_subject(SubjectLookup::by_external_id("ext-9"));
    let (a, b, c, d) = tokio::join!(lookup(), lookup(), lookup(), lookup());
    let ids: Vec<_> = [a, b, c, d]
        .into_iter()
        .map(|result| result.unwrap().id().map(str::to_string))
        .collect();
    assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(registry.count(entities::SUBJECT, &[]).await.unwrap(), 1);
}
