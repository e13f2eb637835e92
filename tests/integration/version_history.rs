#![allow(missing_docs)]

use bytes::Bytes;
use vellum::{ConfigConstraints, Result, Store, StoreSpec, VellumError};

fn low_arity_spec() -> StoreSpec {
    let mut spec = StoreSpec::memory();
    spec.config = ConfigConstraints {
        version_tree_arity_log2: Some(1),
        ..Default::default()
    };
    spec
}

#[tokio::test]
async fn every_generation_stays_readable() -> Result<()> {
    let store = Store::open(low_arity_spec())?;
    const COMMITS: u64 = 50;

    for i in 0..COMMITS {
        store
            .put(&b"counter"[..], i.to_be_bytes().to_vec())
            .await?;
    }

    // Arity 2 spills aggressively; almost everything is out of line.
    let manifest = store.read_manifest().await?.expect("manifest");
    assert_eq!(manifest.versions.last().unwrap().generation, COMMITS + 1);
    assert!(manifest.versions.len() <= 2);
    assert!(!manifest.version_nodes.is_empty());

    // Generation 1 is the empty bootstrap; generation g+2 saw counter = g.
    let bootstrap = store.snapshot(Some(1)).await?;
    assert_eq!(bootstrap.get(b"counter").await?, None);
    for i in 0..COMMITS {
        let snapshot = store.snapshot(Some(i + 2)).await?;
        assert_eq!(snapshot.generation(), i + 2);
        assert_eq!(
            snapshot.get(b"counter").await?.unwrap(),
            Bytes::from(i.to_be_bytes().to_vec()),
            "wrong value at generation {}",
            i + 2
        );
    }
    Ok(())
}

#[tokio::test]
async fn out_of_range_generations_fail() -> Result<()> {
    let store = Store::open(low_arity_spec())?;
    store.put(&b"k"[..], &b"v"[..]).await?;

    for bad in [0, 3, 100] {
        match store.snapshot(Some(bad)).await {
            Err(VellumError::NotFound("generation")) => {}
            other => panic!("generation {bad}: expected NotFound, got {other:?}"),
        }
    }
    Ok(())
}

#[tokio::test]
async fn snapshots_are_immutable_under_later_commits() -> Result<()> {
    let store = Store::open(low_arity_spec())?;
    store.put(&b"k"[..], &b"old"[..]).await?;
    let pinned = store.snapshot(None).await?;
    let pinned_generation = pinned.generation();

    for i in 0..20u8 {
        store.put(&b"k"[..], vec![i; 4]).await?;
    }

    assert_eq!(pinned.get(b"k").await?.unwrap(), &b"old"[..]);
    let reresolved = store.snapshot(Some(pinned_generation)).await?;
    assert_eq!(reresolved.get(b"k").await?.unwrap(), &b"old"[..]);
    Ok(())
}

#[tokio::test]
async fn default_arity_keeps_recent_versions_inline() -> Result<()> {
    let store = Store::open(StoreSpec::memory())?;
    for i in 0..10u8 {
        store.put(&b"k"[..], vec![i; 2]).await?;
    }
    let manifest = store.read_manifest().await?.expect("manifest");
    assert_eq!(manifest.versions.len(), 11, "11 versions fit inline at B=16");
    assert!(manifest.version_nodes.is_empty());
    Ok(())
}
