#![allow(missing_docs)]

use bytes::Bytes;
use std::collections::BTreeMap;
use vellum::{ConfigConstraints, KeyRange, Result, Store, StoreSpec};

fn tiny_node_spec() -> StoreSpec {
    let mut spec = StoreSpec::memory();
    spec.config = ConfigConstraints {
        max_decoded_node_bytes: Some(1),
        ..Default::default()
    };
    spec
}

async fn full_map(store: &Store) -> Result<BTreeMap<Bytes, Bytes>> {
    let snapshot = store.snapshot(None).await?;
    Ok(snapshot
        .entries(KeyRange::all())
        .await?
        .into_iter()
        .collect())
}

#[tokio::test]
async fn sequential_inserts_stay_consistent_at_one_byte_budget() -> Result<()> {
    let store = Store::open(tiny_node_spec())?;
    let mut expected = BTreeMap::new();

    for (i, key) in ["testa", "testb", "testc", "a", "z", "m"]
        .iter()
        .enumerate()
    {
        let value = Bytes::from(vec![i as u8 + 1; 5]);
        store.put(key.as_bytes().to_vec(), value.clone()).await?;
        expected.insert(Bytes::from(key.as_bytes().to_vec()), value);
        assert_eq!(full_map(&store).await?, expected, "after inserting {key}");
    }
    Ok(())
}

#[tokio::test]
async fn tall_tree_reads_back_every_key() -> Result<()> {
    let store = Store::open(tiny_node_spec())?;
    let mut batch = store.batch();
    let mut expected = BTreeMap::new();
    for i in 0..200u32 {
        let key = format!("key/{i:04}");
        let value = Bytes::from(i.to_be_bytes().to_vec());
        batch.put(key.clone().into_bytes(), value.clone())?;
        expected.insert(Bytes::from(key.into_bytes()), value);
    }
    batch.commit().await?;

    // One entry per leaf forces several interior levels.
    let manifest = store.read_manifest().await?.expect("manifest");
    let root = manifest.versions.last().unwrap().root.expect("root");
    assert!(root.height >= 2, "expected a tall tree, got {}", root.height);
    assert_eq!(root.stats.num_keys, 200);

    assert_eq!(full_map(&store).await?, expected);
    for (key, value) in &expected {
        assert_eq!(store.get(key.clone()).await?.as_ref(), Some(value));
    }
    Ok(())
}

#[tokio::test]
async fn deleting_down_to_one_key_collapses_the_root() -> Result<()> {
    let store = Store::open(tiny_node_spec())?;
    let mut batch = store.batch();
    for key in ["testa", "testb", "testc"] {
        batch.put(key.as_bytes().to_vec(), &b"v"[..])?;
    }
    batch.commit().await?;

    let mut batch = store.batch();
    batch.delete(&b"testa"[..])?;
    batch.delete(&b"testb"[..])?;
    batch.commit().await?;

    let manifest = store.read_manifest().await?.expect("manifest");
    let root = manifest.versions.last().unwrap().root.expect("root");
    assert_eq!(root.height, 0, "single leaf needs no interior levels");
    assert_eq!(store.get(b"testc").await?.unwrap(), &b"v"[..]);
    Ok(())
}
