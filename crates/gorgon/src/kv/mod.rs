//! A key-value workload: single-key reads and writes of integers, checked against a map
//! model partitioned by key.

mod get_set;
mod instruction;
mod memory;
mod model;
mod partition_aware;
mod set_after_kill;

pub use {
    get_set::GetSetGenerator,
    instruction::KvInstruction,
    memory::{MemoryClient, MemoryDatabase},
    model::KvModel,
    partition_aware::{key_owner, PartitionAwareGenerator, DEFAULT_SETTLE_DELAY},
    set_after_kill::SetAfterKillGenerator,
};

use {
    crate::{generators::Stagger, runner::Workload, SplitMix64},
    std::{sync::Arc, time::Duration},
};

pub const DEFAULT_PACE: Duration = Duration::from_millis(1);

/// `key0`, `key1`, ... `key{n-1}`.
pub fn default_keys(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("key{i}")).collect()
}

/// Random reads and writes over `keys`, paced at one instruction per `pace` on average.
pub fn get_set_workload(keys: Vec<String>, pace: Duration, rng: &mut SplitMix64) -> Workload<KvModel> {
    let generator = GetSetGenerator::new(keys, rng.fork());
    Workload {
        model: KvModel,
        generators: vec![Arc::new(Stagger::new(generator, pace, rng.fork()))],
    }
}

/// Reads and writes aimed at whichever node the network-partition nemesis isolates.
pub fn partition_aware_workload(
    keys: Vec<String>,
    pace: Duration,
    rng: &mut SplitMix64,
) -> Workload<KvModel> {
    let generator = PartitionAwareGenerator::new(keys, rng.fork());
    Workload {
        model: KvModel,
        generators: vec![Arc::new(Stagger::new(generator, pace, rng.fork()))],
    }
}

/// Random reads and writes over `keys`, plus a single-writer pass over `keys` that starts
/// once the kill nemesis strikes.
pub fn set_after_kill_workload(
    keys: Vec<String>,
    pace: Duration,
    rng: &mut SplitMix64,
) -> Workload<KvModel> {
    let mut workload = get_set_workload(keys.clone(), pace, rng);
    workload.generators.push(Arc::new(SetAfterKillGenerator::new(keys)));
    workload
}
