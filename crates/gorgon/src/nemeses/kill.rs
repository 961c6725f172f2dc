use {
    super::Agent,
    crate::{
        agent::{PkillArgs, KILL_SERVICE},
        ClientId, Error, Fault, Generator, Instruction, Next, Options, Output, Result, SplitMix64,
    },
    parking_lot::Mutex,
    rand::Rng,
    serde::{Deserialize, Serialize},
    std::{
        collections::HashMap,
        fmt::{self, Display, Formatter},
        sync::Arc,
        time::{Duration, Instant},
    },
    tracing::{info, warn},
};

pub const DEFAULT_FIRST_KILL: Duration = Duration::from_secs(4);
pub const DEFAULT_KILL_INTERVAL: Duration = Duration::from_secs(8);
pub const SIGKILL: i32 = 9;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct KillInstruction {
    pub node: String,
    pub process: String,
    pub signal: i32,
}

impl Display for KillInstruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Kill({:?}, {}, {:?})", self.node, self.signal, self.process)
    }
}

impl Instruction for KillInstruction {
    fn kind(&self) -> &'static str {
        "Kill"
    }

    fn is_self_directed(&self) -> bool {
        true
    }

    fn fault(&self) -> Option<Fault> {
        Some(Fault::Kill {
            node: self.node.clone(),
        })
    }

    fn encode(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self).ok()
    }
}

struct Schedule {
    rng: SplitMix64,
    next: Instant,
}

#[derive(Default)]
struct Targets {
    options: Option<Options>,
    agents: HashMap<String, Arc<Agent>>,
}

/// Kills a named process on a random node, first after `first` and then every
/// `interval`, until the scenario ends.
///
/// Set-up only requires one node's agent to be reachable. Agents on the other nodes are
/// dialed when a kill first targets them, and a kill whose agent cannot be reached is
/// recorded as not applied.
pub struct KillNemesis {
    process: String,
    first: Duration,
    interval: Duration,
    schedule: Mutex<Schedule>,
    targets: Mutex<Targets>,
}

impl KillNemesis {
    pub fn new(process: impl Into<String>, rng: SplitMix64) -> Self {
        KillNemesis {
            process: process.into(),
            first: DEFAULT_FIRST_KILL,
            interval: DEFAULT_KILL_INTERVAL,
            schedule: Mutex::new(Schedule {
                rng,
                next: Instant::now(),
            }),
            targets: Mutex::new(Targets::default()),
        }
    }

    pub fn with_schedule(mut self, first: Duration, interval: Duration) -> Self {
        self.first = first;
        self.interval = interval;
        self
    }

    fn agent(&self, node: &str) -> Result<Arc<Agent>> {
        let mut targets = self.targets.lock();
        if let Some(agent) = targets.agents.get(node) {
            return Ok(agent.clone());
        }
        let Some(options) = &targets.options else {
            return Err(Error::generator(self.name(), "not set up"));
        };
        if !options.nodes.iter().any(|n| n == node) {
            return Err(Error::generator(self.name(), format!("unknown node {node}")));
        }
        let agent = Arc::new(Agent::dial(node, options)?);
        targets.agents.insert(node.to_string(), agent.clone());
        Ok(agent)
    }
}

impl Generator for KillNemesis {
    fn name(&self) -> String {
        format!("Kill({})", self.process)
    }

    fn set_up(&self, options: &Options) -> Result<()> {
        let mut agents = HashMap::new();
        let mut unreachable = None;
        for node in &options.nodes {
            match Agent::dial(node, options) {
                Ok(agent) => {
                    agents.insert(node.clone(), Arc::new(agent));
                    break;
                }
                Err(err) => {
                    warn!(%node, %err, "Agent unreachable.");
                    unreachable = Some(err);
                }
            }
        }
        if agents.is_empty() {
            return Err(unreachable
                .unwrap_or_else(|| Error::InvalidOptions("at least one node is required".into())));
        }
        *self.targets.lock() = Targets {
            options: Some(options.clone()),
            agents,
        };
        self.schedule.lock().next = Instant::now() + self.first;
        Ok(())
    }

    fn next(&self, client: ClientId) -> Result<Next> {
        if !client.is_none() {
            return Ok(Next::Exhausted);
        }
        let mut schedule = self.schedule.lock();
        if Instant::now() < schedule.next {
            return Ok(Next::NotYet);
        }
        let nodes = match &self.targets.lock().options {
            Some(options) if !options.nodes.is_empty() => options.nodes.clone(),
            _ => return Err(Error::generator(self.name(), "not set up")),
        };
        let node = nodes[schedule.rng.gen_range(0..nodes.len())].clone();
        schedule.next += self.interval;
        Ok(Next::Instruction(Arc::new(KillInstruction {
            node,
            process: self.process.clone(),
            signal: SIGKILL,
        })))
    }

    fn invoke(&self, instruction: &dyn Instruction) -> Output {
        let Some(kill) = instruction.downcast_ref::<KillInstruction>() else {
            return Output::unsupported();
        };
        let agent = match self.agent(&kill.node) {
            Ok(agent) => agent,
            Err(err) => {
                warn!(node = %kill.node, %err, "No agent to kill through.");
                return Output::rejected(err.to_string());
            }
        };
        let args = PkillArgs {
            process: kill.process.clone(),
            signal: kill.signal,
        };
        match agent.call(&format!("{KILL_SERVICE}.Pkill"), &args) {
            Ok(()) => {
                info!(node = %kill.node, process = %kill.process, signal = kill.signal, "Killed.");
                Output::nil()
            }
            Err(err) => {
                warn!(node = %kill.node, process = %kill.process, %err, "Kill failed.");
                Output::ambiguous(err.to_string())
            }
        }
    }

    fn tear_down(&self) -> Result<()> {
        *self.targets.lock() = Targets::default();
        Ok(())
    }
}
