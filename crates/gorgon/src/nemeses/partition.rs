use {
    super::Agent,
    crate::{
        agent::IPTABLES_SERVICE, ClientId, Error, Fault, Generator, Instruction, Next, Options,
        Output, Result, SplitMix64,
    },
    parking_lot::Mutex,
    rand::Rng,
    serde::{Deserialize, Serialize},
    std::{
        fmt::{self, Display, Formatter},
        sync::Arc,
        time::{Duration, Instant},
    },
    tracing::{info, warn},
};

/// Cuts a node off from all traffic except the listed TCP ports.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PartitionInstruction {
    pub node: String,
    pub allowed_ports: Vec<u16>,
}

impl Display for PartitionInstruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Partition({:?}, {:?})", self.node, self.allowed_ports)
    }
}

impl Instruction for PartitionInstruction {
    fn kind(&self) -> &'static str {
        "Partition"
    }

    fn is_self_directed(&self) -> bool {
        true
    }

    fn fault(&self) -> Option<Fault> {
        Some(Fault::PartitionBegin {
            node: self.node.clone(),
        })
    }

    fn encode(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self).ok()
    }
}

/// Restores default-accept rules on a node and flushes the injected ones.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct HealInstruction {
    pub node: String,
}

impl Display for HealInstruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Heal({:?})", self.node)
    }
}

impl Instruction for HealInstruction {
    fn kind(&self) -> &'static str {
        "Heal"
    }

    fn is_self_directed(&self) -> bool {
        true
    }

    fn fault(&self) -> Option<Fault> {
        Some(Fault::Heal)
    }

    fn encode(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self).ok()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    Stable,
    Partitioned,
    Healed,
}

struct State {
    rng: SplitMix64,
    phase: Phase,
    partition_at: Instant,
    heal_at: Instant,
    agent: Option<Arc<Agent>>,
}

/// Isolates one random node for the middle half of the scenario: the partition begins
/// at a quarter of the workload duration and heals at three quarters.
pub struct PartitionNemesis {
    allowed_ports: Vec<u16>,
    state: Mutex<State>,
}

fn iptables(agent: &Agent, args: &[&str]) -> Result<()> {
    agent.call(&format!("{IPTABLES_SERVICE}.IpTables"), args)
}

fn accept_port(agent: &Agent, port: u16) -> Result<()> {
    let port = port.to_string();
    iptables(agent, &["-A", "INPUT", "-p", "tcp", "--dport", &port, "-j", "ACCEPT"])?;
    iptables(agent, &["-A", "OUTPUT", "-p", "tcp", "--sport", &port, "-j", "ACCEPT"])
}

fn heal(agent: &Agent) -> Result<()> {
    iptables(agent, &["-P", "INPUT", "ACCEPT"])?;
    iptables(agent, &["-P", "OUTPUT", "ACCEPT"])?;
    iptables(agent, &["-F"])
}

impl PartitionNemesis {
    /// `allowed_ports` stay reachable on the isolated node, in addition to the agent's
    /// own port.
    pub fn new(allowed_ports: Vec<u16>, rng: SplitMix64) -> Self {
        let now = Instant::now();
        PartitionNemesis {
            allowed_ports,
            state: Mutex::new(State {
                rng,
                phase: Phase::Stable,
                partition_at: now,
                heal_at: now,
                agent: None,
            }),
        }
    }

    fn agent_for(&self, node: &str) -> Option<Arc<Agent>> {
        self.state.lock().agent.clone().filter(|a| a.node == node)
    }

    fn partition(&self, agent: &Agent) -> Result<()> {
        for port in &self.allowed_ports {
            accept_port(agent, *port)?;
        }
        iptables(agent, &["-A", "INPUT", "-j", "DROP"])?;
        iptables(agent, &["-A", "OUTPUT", "-j", "DROP"])
    }
}

impl Generator for PartitionNemesis {
    fn name(&self) -> String {
        "NetworkPartition".into()
    }

    fn set_up(&self, options: &Options) -> Result<()> {
        if options.nodes.is_empty() {
            return Err(Error::InvalidOptions("at least one node is required".into()));
        }
        let mut state = self.state.lock();
        let node = &options.nodes[state.rng.gen_range(0..options.nodes.len())];
        let agent = Agent::dial(node, options)?;
        accept_port(&agent, options.rpc_port)?;
        let now = Instant::now();
        state.partition_at = now + options.workload_duration / 4;
        state.heal_at = now + options.workload_duration * 3 / 4;
        state.phase = Phase::Stable;
        state.agent = Some(Arc::new(agent));
        info!(%node, "Partition target selected.");
        Ok(())
    }

    fn next(&self, client: ClientId) -> Result<Next> {
        if !client.is_none() {
            return Ok(Next::Exhausted);
        }
        let mut state = self.state.lock();
        let Some(node) = state.agent.as_ref().map(|a| a.node.clone()) else {
            return Err(Error::generator(self.name(), "not set up"));
        };
        let now = Instant::now();
        let instruction: Arc<dyn Instruction> = match state.phase {
            Phase::Stable if now >= state.partition_at => {
                state.phase = Phase::Partitioned;
                Arc::new(PartitionInstruction {
                    node,
                    allowed_ports: self.allowed_ports.clone(),
                })
            }
            Phase::Partitioned if now >= state.heal_at => {
                state.phase = Phase::Healed;
                Arc::new(HealInstruction { node })
            }
            Phase::Healed => return Ok(Next::Exhausted),
            _ => return Ok(Next::NotYet),
        };
        Ok(Next::Instruction(instruction))
    }

    fn invoke(&self, instruction: &dyn Instruction) -> Output {
        let (node, result) = if let Some(partition) = instruction.downcast_ref::<PartitionInstruction>() {
            let result = match self.agent_for(&partition.node) {
                Some(agent) => self.partition(&agent),
                None => return Output::rejected(format!("no agent for node {}", partition.node)),
            };
            (&partition.node, result)
        } else if let Some(heal_node) = instruction.downcast_ref::<HealInstruction>() {
            let result = match self.agent_for(&heal_node.node) {
                Some(agent) => heal(&agent),
                None => return Output::rejected(format!("no agent for node {}", heal_node.node)),
            };
            (&heal_node.node, result)
        } else {
            return Output::unsupported();
        };
        match result {
            Ok(()) => {
                info!(%node, %instruction, "Partition rules applied.");
                Output::nil()
            }
            Err(err) => {
                warn!(%node, %instruction, %err, "Partition rules failed.");
                Output::ambiguous(err.to_string())
            }
        }
    }

    /// Heals unconditionally, so no rules outlive the scenario.
    fn tear_down(&self) -> Result<()> {
        let agent = self.state.lock().agent.take();
        match agent {
            Some(agent) => heal(&agent),
            None => Ok(()),
        }
    }
}
