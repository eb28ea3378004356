//! Shared setup for the integration tests.

use std::sync::Arc;

use cosmos_bulk::{BulkConfig, ContainerExecutor};
use cosmos_bulk_core::PartitionKeyRangeId;
use cosmos_bulk_routing::{HashRangeResolver, RangeMap};

use crate::simulated_container::SimulatedContainer;

/// An executor wired to a simulated container.
pub struct Harness {
    pub executor: ContainerExecutor,
    pub container: Arc<SimulatedContainer>,
    pub resolver: Arc<HashRangeResolver>,
}

/// Range ids `"0"..n`.
pub fn range_ids(n: usize) -> Vec<PartitionKeyRangeId> {
    (0..n).map(|i| PartitionKeyRangeId::new(i.to_string())).collect()
}

pub fn harness(ranges: usize, config: BulkConfig) -> Harness {
    harness_with(ranges, config, |container| container)
}

pub fn harness_with(
    ranges: usize,
    config: BulkConfig,
    customize: impl FnOnce(SimulatedContainer) -> SimulatedContainer,
) -> Harness {
    init_tracing();
    let resolver = Arc::new(HashRangeResolver::new(RangeMap::uniform(&range_ids(ranges))));
    let container = Arc::new(customize(SimulatedContainer::new(Arc::clone(&resolver))));
    let executor = ContainerExecutor::builder(resolver.clone(), container.clone())
        .with_config(config)
        .build()
        .unwrap();
    Harness {
        executor,
        container,
        resolver,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
