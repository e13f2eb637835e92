#![allow(missing_docs)]

use bytes::Bytes;
use vellum::format::key::key_successor;
use vellum::{ConfigConstraints, KeyRange, Result, Store, StoreSpec};

#[tokio::test]
async fn first_write_commits_generation_two() -> Result<()> {
    let _ = vellum::logging::init_logging("warn");
    let store = Store::open(StoreSpec::memory())?;
    assert!(store.read_manifest().await?.is_none(), "no manifest yet");

    let version = store.put(&b"hello"[..], &b"world"[..]).await?;
    assert_eq!(version.generation, 2, "bootstrap takes generation 1");

    let manifest = store.read_manifest().await?.expect("manifest written");
    assert_eq!(manifest.versions[0].generation, 1);
    assert!(manifest.versions[0].root.is_none(), "generation 1 is empty");
    assert!(manifest.versions[1].root.is_some());
    Ok(())
}

#[tokio::test]
async fn two_keys_roundtrip() -> Result<()> {
    let store = Store::open(StoreSpec::memory())?;
    let mut batch = store.batch();
    batch.put(&b"testa"[..], &b"a"[..])?;
    batch.put(&b"testb"[..], &b"b"[..])?;
    batch.commit().await?;

    assert_eq!(store.get(b"testa").await?.unwrap(), &b"a"[..]);
    assert_eq!(store.get(b"testb").await?.unwrap(), &b"b"[..]);
    assert_eq!(store.get(b"testc").await?, None);
    Ok(())
}

#[tokio::test]
async fn batch_is_atomic_and_last_write_wins() -> Result<()> {
    let store = Store::open(StoreSpec::memory())?;
    store.put(&b"k"[..], &b"initial"[..]).await?;

    let mut batch = store.batch();
    batch.put(&b"k"[..], &b"first"[..])?;
    batch.put(&b"other"[..], &b"x"[..])?;
    batch.put(&b"k"[..], &b"second"[..])?;
    let version = batch.commit().await?;

    assert_eq!(version.generation, 3, "one version for the whole batch");
    assert_eq!(store.get(b"k").await?.unwrap(), &b"second"[..]);
    assert_eq!(store.get(b"other").await?.unwrap(), &b"x"[..]);
    Ok(())
}

#[tokio::test]
async fn values_cross_the_inline_threshold() -> Result<()> {
    let store = Store::open(StoreSpec::memory())?;
    // Default inline threshold is 100 bytes.
    let exactly_inline = vec![1u8; 100];
    let out_of_line = vec![2u8; 101];
    let large = vec![3u8; 1 << 20];

    let mut batch = store.batch();
    batch.put(&b"inline"[..], exactly_inline.clone())?;
    batch.put(&b"indirect"[..], out_of_line.clone())?;
    batch.put(&b"large"[..], large.clone())?;
    batch.commit().await?;

    assert_eq!(store.get(b"inline").await?.unwrap(), Bytes::from(exactly_inline));
    assert_eq!(store.get(b"indirect").await?.unwrap(), Bytes::from(out_of_line));
    assert_eq!(store.get(b"large").await?.unwrap(), Bytes::from(large));
    Ok(())
}

#[tokio::test]
async fn empty_and_oversized_keys_rejected() -> Result<()> {
    let store = Store::open(StoreSpec::memory())?;
    let mut batch = store.batch();
    assert!(batch.put(Bytes::new(), &b"v"[..]).is_err(), "empty key");
    assert!(
        batch.put(vec![b'x'; 65_536], &b"v"[..]).is_err(),
        "key above 65535 bytes"
    );
    assert!(batch.put(vec![b'x'; 65_535], &b"v"[..]).is_ok());
    Ok(())
}

#[tokio::test]
async fn scan_resumes_from_the_last_key_successor() -> Result<()> {
    let mut spec = StoreSpec::memory();
    spec.config = ConfigConstraints {
        max_decoded_node_bytes: Some(64),
        ..Default::default()
    };
    let store = Store::open(spec)?;
    let mut batch = store.batch();
    for i in 0..30u32 {
        batch.put(format!("row/{i:02}").into_bytes(), format!("v{i}").into_bytes())?;
    }
    batch.commit().await?;

    let snapshot = store.snapshot(None).await?;
    let full = snapshot.entries(KeyRange::all()).await?;
    assert_eq!(full.len(), 30);

    // Abandon a scan after ten entries, then pick it up again with a fresh
    // scanner starting at the successor of the last key seen.
    let mut scanner = snapshot.scan(KeyRange::all());
    let mut last = Bytes::new();
    for _ in 0..10 {
        let (key, _) = scanner.next().await?.expect("scan has more entries");
        last = key;
    }
    drop(scanner);
    let resumed = snapshot
        .scan(KeyRange::new(key_successor(&last), Bytes::new()))
        .collect_resolved()
        .await?;
    assert_eq!(resumed[..], full[10..]);
    Ok(())
}

#[tokio::test]
async fn file_backed_store_persists_across_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let spec = StoreSpec::file(dir.path());

    let store = Store::open(spec.clone())?;
    store.put(&b"durable"[..], &b"yes"[..]).await?;
    drop(store);

    let reopened = Store::open(spec)?;
    assert_eq!(reopened.get(b"durable").await?.unwrap(), &b"yes"[..]);
    Ok(())
}
