use {
    super::KvInstruction,
    crate::{ClientId, Fault, Generator, Instruction, Next, Options, Output, Result, SplitMix64},
    parking_lot::Mutex,
    rand::Rng,
    std::{
        sync::Arc,
        time::{Duration, Instant},
    },
    tracing::{info, warn},
};

/// How long after a partition begins before traffic is aimed at the isolated node.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(20);

const VBUCKETS: usize = 1024;

fn vbucket(key: &str) -> usize {
    let crc = crc32fast::hash(key.as_bytes());
    ((crc >> 16) & 0x7fff) as usize % VBUCKETS
}

/// The index of the node owning `key` when hash buckets are split into `nodes` equal
/// contiguous ranges.
pub fn key_owner(key: &str, nodes: usize) -> usize {
    if nodes == 0 {
        return 0;
    }
    let vb = vbucket(key);
    (0..nodes)
        .find(|node| vb < (node + 1) * VBUCKETS / nodes)
        .unwrap_or(nodes - 1)
}

struct State {
    rng: SplitMix64,
    nodes: Vec<String>,
    isolated: Option<usize>,
    start: Instant,
    last_value: i64,
}

/// Reads and writes keys owned by whichever node a partition isolates. Clients mapped to
/// the isolated node read, the rest write decreasing values. Idle until a partition
/// begins plus a settle delay, and again once it heals.
pub struct PartitionAwareGenerator {
    keys: Vec<String>,
    settle_delay: Duration,
    state: Mutex<State>,
}

impl PartitionAwareGenerator {
    pub fn new(keys: Vec<String>, rng: SplitMix64) -> Self {
        PartitionAwareGenerator {
            keys,
            settle_delay: DEFAULT_SETTLE_DELAY,
            state: Mutex::new(State {
                rng,
                nodes: Vec::new(),
                isolated: None,
                start: Instant::now(),
                last_value: 0,
            }),
        }
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }
}

impl Generator for PartitionAwareGenerator {
    fn name(&self) -> String {
        "PartitionAwareGetSet".into()
    }

    fn set_up(&self, options: &Options) -> Result<()> {
        let mut state = self.state.lock();
        state.nodes = options.nodes.clone();
        state.isolated = None;
        Ok(())
    }

    fn next(&self, client: ClientId) -> Result<Next> {
        let Some(index) = client.index() else {
            return Ok(Next::Exhausted);
        };
        let mut state = self.state.lock();
        let Some(node) = state.isolated else {
            return Ok(Next::NotYet);
        };
        if self.keys.is_empty() || Instant::now() < state.start {
            return Ok(Next::NotYet);
        }
        let nodes = state.nodes.len();
        let key = &self.keys[state.rng.gen_range(0..self.keys.len())];
        if key_owner(key, nodes) != node {
            return Ok(Next::NotYet);
        }
        let instruction = if index % nodes == node {
            KvInstruction::get(key.clone())
        } else {
            state.last_value -= 1;
            KvInstruction::set(key.clone(), state.last_value)
        };
        Ok(Next::Instruction(Arc::new(instruction)))
    }

    fn on_return(&self, _client: ClientId, instruction: &dyn Instruction, _output: &Output) -> Result<()> {
        let mut state = self.state.lock();
        match instruction.fault() {
            Some(Fault::PartitionBegin { node }) => {
                match state.nodes.iter().position(|n| *n == node) {
                    Some(index) => {
                        info!(%node, delay = ?self.settle_delay, "Targeting isolated node.");
                        state.isolated = Some(index);
                        state.start = Instant::now() + self.settle_delay;
                    }
                    None => warn!(%node, "Partitioned node is not in the node list."),
                }
            }
            Some(Fault::Heal) => state.isolated = None,
            _ => {}
        }
        Ok(())
    }
}
