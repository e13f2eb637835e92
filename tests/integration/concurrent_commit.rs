#![allow(missing_docs)]

use std::collections::HashSet;
use std::sync::Arc;
use vellum::kvstore::memory::MemoryKvStore;
use vellum::kvstore::KvStore;
use vellum::{Result, Store, StoreSpec};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_writers_lose_no_updates() -> Result<()> {
    const WRITERS: usize = 8;
    const KEYS_PER_WRITER: usize = 5;

    let base: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let mut handles = Vec::new();
    for w in 0..WRITERS {
        let store = Store::open_with_base(Arc::clone(&base), StoreSpec::memory())?;
        handles.push(tokio::spawn(async move {
            let mut generations = Vec::new();
            for i in 0..KEYS_PER_WRITER {
                let version = store
                    .put(
                        format!("w{w}/k{i}").into_bytes(),
                        format!("value-{w}-{i}").into_bytes(),
                    )
                    .await?;
                generations.push(version.generation);
            }
            Ok::<_, vellum::VellumError>(generations)
        }));
    }

    let mut all_generations = Vec::new();
    for handle in handles {
        let generations = handle.await.expect("writer task panicked")?;
        assert!(
            generations.windows(2).all(|w| w[0] < w[1]),
            "a writer's own commits must observe increasing generations"
        );
        all_generations.extend(generations);
    }

    let distinct: HashSet<u64> = all_generations.iter().copied().collect();
    assert_eq!(
        distinct.len(),
        WRITERS * KEYS_PER_WRITER,
        "every commit takes its own generation"
    );

    let store = Store::open_with_base(base, StoreSpec::memory())?;
    let manifest = store.read_manifest().await?.expect("manifest");
    assert_eq!(
        manifest.versions.last().unwrap().generation,
        (WRITERS * KEYS_PER_WRITER) as u64 + 1,
        "bootstrap plus one generation per commit"
    );
    for w in 0..WRITERS {
        for i in 0..KEYS_PER_WRITER {
            let key = format!("w{w}/k{i}");
            assert_eq!(
                store.get(key.as_bytes()).await?.unwrap(),
                format!("value-{w}-{i}").as_bytes(),
                "lost update for {key}"
            );
        }
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn conflicting_writers_last_one_wins() -> Result<()> {
    let base: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let mut handles = Vec::new();
    for w in 0..6u32 {
        let store = Store::open_with_base(Arc::clone(&base), StoreSpec::memory())?;
        handles.push(tokio::spawn(async move {
            let version = store.put(&b"contended"[..], w.to_be_bytes().to_vec()).await?;
            Ok::<_, vellum::VellumError>((version.generation, w))
        }));
    }
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.expect("writer task panicked")?);
    }
    outcomes.sort();

    let store = Store::open_with_base(base, StoreSpec::memory())?;
    let winner = outcomes.last().unwrap().1;
    assert_eq!(
        store.get(b"contended").await?.unwrap(),
        winner.to_be_bytes().to_vec(),
        "value must come from the commit with the highest generation"
    );
    Ok(())
}
