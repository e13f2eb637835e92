#![allow(missing_docs)]

use bytes::Bytes;
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use vellum::{ConfigConstraints, KeyRange, Result, Store, StoreSpec};

fn key(i: u8) -> Bytes {
    Bytes::from(format!("k{i:02}"))
}

fn small_store() -> Store {
    let mut spec = StoreSpec::memory();
    spec.config = ConfigConstraints {
        max_decoded_node_bytes: Some(128),
        max_inline_value_bytes: Some(8),
        version_tree_arity_log2: Some(2),
        ..Default::default()
    };
    Store::open(spec).expect("open in-memory store")
}

async fn assert_matches_model(store: &Store, model: &BTreeMap<Bytes, Bytes>) {
    let actual: BTreeMap<Bytes, Bytes> = store
        .snapshot(None)
        .await
        .expect("snapshot")
        .entries(KeyRange::all())
        .await
        .expect("scan")
        .into_iter()
        .collect();
    assert_eq!(&actual, model);
}

#[derive(Clone, Debug)]
enum Op {
    Put(u8, u16),
    Delete(u8),
    DeleteRange(u8, u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..24, 0u16..200).prop_map(|(k, n)| Op::Put(k, n)),
        1 => (0u8..24).prop_map(Op::Delete),
        1 => (0u8..24, 0u8..24).prop_map(|(a, b)| Op::DeleteRange(a, b)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 24, ..ProptestConfig::default() })]

    #[test]
    fn every_op_sequence_matches_a_btreemap(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        rt.block_on(async move {
            let store = small_store();
            let mut model: BTreeMap<Bytes, Bytes> = BTreeMap::new();
            for op in ops {
                match op {
                    Op::Put(k, n) => {
                        let value = Bytes::from(vec![k; n as usize]);
                        store.put(key(k), value.clone()).await.expect("put");
                        model.insert(key(k), value);
                    }
                    Op::Delete(k) => {
                        store.delete(key(k)).await.expect("delete");
                        model.remove(&key(k));
                    }
                    Op::DeleteRange(a, b) => {
                        let (lo, hi) = (a.min(b), a.max(b));
                        if lo == hi {
                            continue;
                        }
                        store
                            .delete_range(KeyRange::new(key(lo), key(hi)))
                            .await
                            .expect("delete_range");
                        let (lo, hi) = (key(lo), key(hi));
                        model.retain(|k, _| !(*k >= lo && *k < hi));
                    }
                }
            }
            assert_matches_model(&store, &model).await;
        });
    }
}

#[tokio::test]
async fn seeded_batch_stress_matches_a_btreemap() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    let store = small_store();
    let mut model: BTreeMap<Bytes, Bytes> = BTreeMap::new();

    for round in 0..8 {
        let mut batch = store.batch();
        // Anchor each batch with one put so it is never empty.
        let anchor = rng.gen_range(0..24u8);
        let anchor_value = Bytes::from(vec![round as u8; 4]);
        batch.put(key(anchor), anchor_value.clone())?;
        model.insert(key(anchor), anchor_value);

        for _ in 0..40 {
            match rng.gen_range(0..5u8) {
                0 | 1 | 2 => {
                    let k = rng.gen_range(0..24u8);
                    let value = Bytes::from(vec![k; rng.gen_range(0..200)]);
                    batch.put(key(k), value.clone())?;
                    model.insert(key(k), value);
                }
                3 => {
                    let k = rng.gen_range(0..24u8);
                    batch.delete(key(k))?;
                    model.remove(&key(k));
                }
                _ => {
                    let a = rng.gen_range(0..24u8);
                    let b = rng.gen_range(0..24u8);
                    let (lo, hi) = (a.min(b), a.max(b));
                    if lo == hi {
                        continue;
                    }
                    batch.delete_range(KeyRange::new(key(lo), key(hi)))?;
                    let (lo, hi) = (key(lo), key(hi));
                    model.retain(|k, _| !(*k >= lo && *k < hi));
                }
            }
        }
        batch.commit().await?;
        assert_matches_model(&store, &model).await;
    }
    Ok(())
}
