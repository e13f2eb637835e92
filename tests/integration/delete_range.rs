#![allow(missing_docs)]

use bytes::Bytes;
use vellum::{ConfigConstraints, KeyRange, Result, Store, StoreSpec};

const KEYS: &[&str] = &["a/a", "a/b", "a/c/a", "a/c/b", "a/c/d", "a/d", "b", "b/a"];

async fn seeded_store(config: ConfigConstraints) -> Result<Store> {
    let mut spec = StoreSpec::memory();
    spec.config = config;
    let store = Store::open(spec)?;
    let mut batch = store.batch();
    for key in KEYS {
        batch.put(key.as_bytes().to_vec(), key.as_bytes().to_vec())?;
    }
    batch.commit().await?;
    Ok(store)
}

async fn keys_of(store: &Store) -> Result<Vec<String>> {
    Ok(store
        .list(b"")
        .await?
        .into_iter()
        .map(|k| String::from_utf8(k.to_vec()).unwrap())
        .collect())
}

#[tokio::test]
async fn prefix_delete_removes_only_the_prefix() -> Result<()> {
    for config in [
        ConfigConstraints::default(),
        ConfigConstraints {
            max_decoded_node_bytes: Some(1),
            ..Default::default()
        },
    ] {
        let store = seeded_store(config).await?;
        store.delete_range(KeyRange::prefix(&b"a/c/"[..])).await?;
        assert_eq!(
            keys_of(&store).await?,
            vec!["a/a", "a/b", "a/d", "b", "b/a"],
            "a/c/ subtree gone, neighbors intact"
        );
    }
    Ok(())
}

#[tokio::test]
async fn half_open_range_delete() -> Result<()> {
    let store = seeded_store(ConfigConstraints::default()).await?;
    store
        .delete_range(KeyRange::new(&b"a/c/b"[..], &b"b"[..]))
        .await?;
    assert_eq!(keys_of(&store).await?, vec!["a/a", "a/b", "a/c/a", "b", "b/a"]);
    Ok(())
}

#[tokio::test]
async fn unbounded_range_delete_empties_the_store() -> Result<()> {
    let store = seeded_store(ConfigConstraints::default()).await?;
    let version = store.delete_range(KeyRange::all()).await?;
    assert!(version.root.is_none(), "empty tree has no root");
    assert!(keys_of(&store).await?.is_empty());
    assert_eq!(store.get(b"a/a").await?, None);
    Ok(())
}

#[tokio::test]
async fn later_put_survives_earlier_range_delete_in_batch() -> Result<()> {
    let store = seeded_store(ConfigConstraints::default()).await?;
    let mut batch = store.batch();
    batch.put(&b"a/c/early"[..], &b"gone"[..])?;
    batch.delete_range(KeyRange::prefix(&b"a/c/"[..]))?;
    batch.put(&b"a/c/late"[..], &b"kept"[..])?;
    batch.commit().await?;

    assert_eq!(store.get(b"a/c/early").await?, None);
    assert_eq!(store.get(b"a/c/a").await?, None);
    assert_eq!(store.get(b"a/c/late").await?.unwrap(), Bytes::from("kept"));
    Ok(())
}

#[tokio::test]
async fn deleting_an_absent_range_reuses_the_root() -> Result<()> {
    let store = seeded_store(ConfigConstraints::default()).await?;
    let before = store.read_manifest().await?.unwrap();
    store.delete_range(KeyRange::prefix(&b"zzz/"[..])).await?;
    let after = store.read_manifest().await?.unwrap();

    let old_root = before.versions.last().unwrap().root.unwrap();
    let new_root = after.versions.last().unwrap().root.unwrap();
    assert_eq!(
        old_root.location, new_root.location,
        "untouched tree keeps its root node"
    );
    assert!(after.versions.last().unwrap().generation > before.versions.last().unwrap().generation);
    Ok(())
}
