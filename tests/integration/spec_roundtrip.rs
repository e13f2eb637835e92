#![allow(missing_docs)]

use std::sync::Arc;
use vellum::kvstore::memory::MemoryKvStore;
use vellum::kvstore::KvStore;
use vellum::{
    Compression, ConfigConstraints, Result, Store, StoreSpec, StoreUuid, VellumError,
};

#[tokio::test]
async fn minimal_spec_fills_defaults_after_commit() -> Result<()> {
    let store = Store::open(StoreSpec::from_json(r#"{"base": {"driver": "memory"}}"#)?)?;
    store.put(&b"k"[..], &b"v"[..]).await?;

    let minimal = store.spec(false).await?;
    let full = store.spec(true).await?;

    // The committed manifest pins every config field either way.
    assert!(minimal.config.uuid.is_some());
    assert_eq!(full.config.compression, Some(Compression::Snappy));
    assert_eq!(full.config.max_decoded_node_bytes, Some(8_388_608));
    assert_eq!(full.config.max_inline_value_bytes, Some(100));
    assert_eq!(full.config.version_tree_arity_log2, Some(4));
    assert_eq!(minimal.config, full.config);

    let json = full.to_json()?;
    assert_eq!(StoreSpec::from_json(&json)?, full);
    Ok(())
}

#[tokio::test]
async fn spec_of_unwritten_store_keeps_constraints_open() -> Result<()> {
    let store = Store::open(StoreSpec::memory())?;
    let minimal = store.spec(false).await?;
    assert!(minimal.config.is_empty(), "nothing pinned before a commit");

    let full = store.spec(true).await?;
    assert!(full.config.uuid.is_none(), "uuid is chosen at first commit");
    assert_eq!(full.config.max_inline_value_bytes, Some(100));
    Ok(())
}

#[tokio::test]
async fn reopen_through_spec_reads_the_same_store() -> Result<()> {
    let base: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let store = Store::open_with_base(Arc::clone(&base), StoreSpec::memory())?;
    store.put(&b"k"[..], &b"v"[..]).await?;

    let spec = store.spec(true).await?;
    let reopened = Store::open_with_base(base, spec)?;
    assert_eq!(reopened.get(b"k").await?.unwrap(), &b"v"[..]);
    Ok(())
}

#[tokio::test]
async fn uuid_mismatch_is_rejected() -> Result<()> {
    let base: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let store = Store::open_with_base(Arc::clone(&base), StoreSpec::memory())?;
    store.put(&b"k"[..], &b"v"[..]).await?;

    let mut spec = StoreSpec::memory();
    spec.config.uuid = Some(StoreUuid::parse(&"ab".repeat(16))?);
    let wrong = Store::open_with_base(base, spec)?;
    match wrong.get(b"k").await {
        Err(VellumError::ConfigMismatch { field: "uuid", .. }) => {}
        other => panic!("expected uuid mismatch, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn compression_mismatch_is_rejected() -> Result<()> {
    let base: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let store = Store::open_with_base(Arc::clone(&base), StoreSpec::memory())?;
    store.put(&b"k"[..], &b"v"[..]).await?;

    let mut spec = StoreSpec::memory();
    spec.config.compression = Some(Compression::None);
    let wrong = Store::open_with_base(base, spec)?;
    match wrong.put(&b"k"[..], &b"other"[..]).await {
        Err(VellumError::ConfigMismatch {
            field: "compression",
            ..
        }) => {}
        other => panic!("expected compression mismatch, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn matching_constraints_are_accepted() -> Result<()> {
    let base: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let store = Store::open_with_base(
        Arc::clone(&base),
        StoreSpec {
            config: ConfigConstraints {
                max_inline_value_bytes: Some(10),
                ..Default::default()
            },
            ..StoreSpec::memory()
        },
    )?;
    store.put(&b"k"[..], &b"v"[..]).await?;

    let mut spec = StoreSpec::memory();
    spec.config.max_inline_value_bytes = Some(10);
    let reopened = Store::open_with_base(base, spec)?;
    assert_eq!(reopened.get(b"k").await?.unwrap(), &b"v"[..]);
    Ok(())
}
