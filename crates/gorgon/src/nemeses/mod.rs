//! Fault injectors. A nemesis is a [`Generator`](crate::Generator) that only serves the
//! self-directed worker and executes its own instructions by calling node agents.

mod kill;
mod partition;

pub use {
    kill::{KillInstruction, KillNemesis, DEFAULT_FIRST_KILL, DEFAULT_KILL_INTERVAL, SIGKILL},
    partition::{HealInstruction, PartitionInstruction, PartitionNemesis},
};

use {
    crate::{Error, Options, Result},
    gorgon_rpc::BlockingClient,
    parking_lot::Mutex,
    serde::Serialize,
    tracing::{debug, info},
};

/// A connection to the agent on one node.
struct Agent {
    node: String,
    rpc: Mutex<BlockingClient>,
}

impl Agent {
    fn dial(node: &str, options: &Options) -> Result<Self> {
        let address = options.rpc_address(node);
        let rpc = BlockingClient::dial(&address, options.rpc_password.as_bytes())
            .map_err(|err| Error::remote(format!("dial {address}"), err))?;
        info!(%node, %address, "Agent connected.");
        Ok(Agent {
            node: node.to_string(),
            rpc: Mutex::new(rpc),
        })
    }

    fn call<A: Serialize + ?Sized>(&self, method: &str, arg: &A) -> Result<()> {
        let reply: String = self
            .rpc
            .lock()
            .call(method, arg)
            .map_err(|err| Error::remote(method, err))?;
        debug!(node = %self.node, %method, %reply, "Agent replied.");
        Ok(())
    }
}
