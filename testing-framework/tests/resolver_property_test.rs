// Property tests for the topology resolver's reference counting
//
// Failed cases can be reproduced by setting PROPTEST_RNG_SEED.

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use switchtest_framework::test_utils::MockTopology;
use switchtest_framework::{TopoTypeId, TopologyCatalog, TopologyResolver};

const TOPOLOGIES: [&str; 3] = ["single-switch", "dual-switch", "ring"];

#[derive(Debug, Clone, Copy)]
enum Op {
    Acquire(usize),
    Release(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..TOPOLOGIES.len()).prop_map(Op::Acquire),
        (0..TOPOLOGIES.len()).prop_map(Op::Release),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn check_sequence(ops: Vec<Op>) -> Result<(), TestCaseError> {
    let catalog = TopologyCatalog::new();
    let mocks: Vec<Arc<MockTopology>> = TOPOLOGIES
        .iter()
        .map(|name| {
            let mock = Arc::new(MockTopology::new(*name));
            catalog.register_shared(*name, mock.clone());
            mock
        })
        .collect();
    let resolver = TopologyResolver::new(Arc::new(catalog));
    let mut model: HashMap<usize, usize> = HashMap::new();

    for op in ops {
        match op {
            Op::Acquire(index) => {
                let handle = resolver
                    .acquire(&TopoTypeId::new(TOPOLOGIES[index]))
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(handle.id().as_str(), TOPOLOGIES[index]);
                *model.entry(index).or_default() += 1;
            }
            Op::Release(index) => {
                let count = model.entry(index).or_default();
                if *count == 0 {
                    continue;
                }
                resolver.release(&TopoTypeId::new(TOPOLOGIES[index])).await;
                *count -= 1;
            }
        }

        for (index, name) in TOPOLOGIES.iter().enumerate() {
            let expected = model.get(&index).copied().unwrap_or(0);
            let id = TopoTypeId::new(*name);
            prop_assert_eq!(resolver.ref_count(&id), expected);
            prop_assert_eq!(resolver.is_live(&id), expected > 0);

            // A live topology has been activated exactly once more than deactivated
            let mock = &mocks[index];
            let outstanding = mock.activations() - mock.deactivations();
            prop_assert_eq!(outstanding, usize::from(expected > 0));
        }
    }

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_ref_count_tracks_balanced_operations(ops in prop::collection::vec(op_strategy(), 0..40)) {
        runtime().block_on(check_sequence(ops))?;
    }

    #[test]
    fn prop_full_release_deactivates_everything(acquires in prop::collection::vec(0..TOPOLOGIES.len(), 1..20)) {
        runtime().block_on(async {
            let catalog = TopologyCatalog::new();
            let mock = Arc::new(MockTopology::new("ring"));
            catalog.register_shared("ring", mock.clone());
            let resolver = TopologyResolver::new(Arc::new(catalog));
            let id = TopoTypeId::new("ring");

            for _ in &acquires {
                resolver.acquire(&id).await.map_err(|e| TestCaseError::fail(e.to_string()))?;
            }
            prop_assert_eq!(resolver.ref_count(&id), acquires.len());
            prop_assert_eq!(mock.activations(), 1);

            for _ in &acquires {
                resolver.release(&id).await;
            }
            prop_assert_eq!(resolver.ref_count(&id), 0);
            prop_assert_eq!(mock.deactivations(), 1);
            prop_assert!(resolver.live_topologies().is_empty());
            Ok::<(), TestCaseError>(())
        })?;
    }
}
