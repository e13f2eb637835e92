#![allow(missing_docs)]

use bytes::Bytes;
use std::collections::BTreeMap;
use vellum::{Compression, ConfigConstraints, KeyRange, Result, Store, StoreSpec};

async fn exercise(config: ConfigConstraints) -> Result<()> {
    let label = format!("{config:?}");
    let mut spec = StoreSpec::memory();
    spec.config = config;
    let store = Store::open(spec)?;
    let mut model: BTreeMap<Bytes, Bytes> = BTreeMap::new();

    // A mixed workload crossing the inline threshold and node budget.
    let mut batch = store.batch();
    for i in 0..40u32 {
        let key = Bytes::from(format!("row/{i:03}"));
        let value = Bytes::from(vec![i as u8; (i as usize % 7) * 30]);
        batch.put(key.clone(), value.clone())?;
        model.insert(key, value);
    }
    batch.commit().await?;

    let mut batch = store.batch();
    batch.delete_range(KeyRange::new(&b"row/010"[..], &b"row/020"[..]))?;
    batch.put(&b"row/015"[..], &b"revived"[..])?;
    batch.delete(&b"row/030"[..])?;
    batch.commit().await?;
    model.retain(|k, _| !(&k[..] >= &b"row/010"[..] && &k[..] < &b"row/020"[..]));
    model.insert(Bytes::from("row/015"), Bytes::from("revived"));
    model.remove(&Bytes::from("row/030"));

    let snapshot = store.snapshot(None).await?;
    let actual: BTreeMap<Bytes, Bytes> =
        snapshot.entries(KeyRange::all()).await?.into_iter().collect();
    assert_eq!(actual, model, "mismatch under {label}");

    for (key, value) in &model {
        assert_eq!(
            store.get(key.clone()).await?.as_ref(),
            Some(value),
            "get mismatch for {key:?} under {label}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn basic_functionality_across_the_config_grid() -> Result<()> {
    for node_bytes in [1u32, 64, 1024, 8_388_608] {
        for inline in [0u32, 16, 1024] {
            for arity in [1u8, 4] {
                for compression in [Compression::None, Compression::Snappy] {
                    exercise(ConfigConstraints {
                        max_decoded_node_bytes: Some(node_bytes),
                        max_inline_value_bytes: Some(inline),
                        version_tree_arity_log2: Some(arity),
                        compression: Some(compression),
                        ..Default::default()
                    })
                    .await?;
                }
            }
        }
    }
    Ok(())
}
