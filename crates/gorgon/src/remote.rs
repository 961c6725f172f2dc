//! Drives clients that live on a remote agent, for systems whose client library cannot
//! be linked into the runner.

use {
    crate::{
        agent::{InvokeArgs, OpenClientArgs, CLIENT_SERVICE},
        Client, ClientId, Database, Error, Instruction, Options, Output, Result,
    },
    gorgon_rpc::BlockingClient,
    serde::de::DeserializeOwned,
    serde_json::Value as Json,
    std::{
        collections::HashMap,
        fmt::{self, Debug, Formatter},
        sync::Arc,
    },
    tracing::{info, warn},
};

type Decoder = fn(Json) -> serde_json::Result<Arc<dyn Instruction>>;

fn decode<T>(value: Json) -> serde_json::Result<Arc<dyn Instruction>>
where
    T: Instruction + DeserializeOwned + 'static,
{
    let instruction: T = serde_json::from_value(value)?;
    Ok(Arc::new(instruction))
}

/// Maps instruction kinds to decoders, so an agent can rebuild instructions it receives.
#[derive(Clone, Default)]
pub struct InstructionRegistry {
    decoders: HashMap<&'static str, Decoder>,
}

impl Debug for InstructionRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.decoders.keys().collect();
        kinds.sort();
        f.debug_struct("InstructionRegistry").field("kinds", &kinds).finish()
    }
}

impl InstructionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T>(mut self, kind: &'static str) -> Self
    where
        T: Instruction + DeserializeOwned + 'static,
    {
        self.decoders.insert(kind, decode::<T>);
        self
    }

    pub fn decode(&self, kind: &str, value: Json) -> Result<Arc<dyn Instruction>> {
        let decoder = self
            .decoders
            .get(kind)
            .ok_or_else(|| Error::UnsupportedInstruction(kind.to_string()))?;
        Ok(decoder(value)?)
    }
}

/// A [`Client`] whose session is hosted by the agent's `ClientRpc` service.
pub struct ClientOverRpc {
    id: ClientId,
    address: String,
    password: String,
    rpc: Option<BlockingClient>,
}

impl ClientOverRpc {
    pub fn new(id: ClientId, address: impl Into<String>, password: impl Into<String>) -> Self {
        ClientOverRpc {
            id,
            address: address.into(),
            password: password.into(),
            rpc: None,
        }
    }
}

impl Client for ClientOverRpc {
    fn id(&self) -> ClientId {
        self.id
    }

    fn open(&mut self, config: &str) -> Result<()> {
        let method = format!("{CLIENT_SERVICE}.OpenClient");
        let mut rpc = BlockingClient::dial(&self.address, self.password.as_bytes())
            .map_err(|err| Error::remote(&method, err))?;
        let args = OpenClientArgs {
            id: self.id,
            config: config.to_string(),
        };
        let _: String = rpc.call(&method, &args).map_err(|err| Error::remote(&method, err))?;
        info!(client = %self.id, address = %self.address, "Remote client opened.");
        self.rpc = Some(rpc);
        Ok(())
    }

    fn invoke(&mut self, instruction: &dyn Instruction) -> Output {
        let Some(rpc) = self.rpc.as_mut() else {
            return Output::rejected("client is not open");
        };
        let Some(value) = instruction.encode() else {
            return Output::unsupported();
        };
        let args = InvokeArgs {
            id: self.id,
            kind: instruction.kind().to_string(),
            value,
        };
        match rpc.call::<_, Output>(&format!("{CLIENT_SERVICE}.Invoke"), &args) {
            Ok(output) => output,
            Err(err) => {
                warn!(client = %self.id, %instruction, %err, "Remote invoke failed.");
                Output::ambiguous(err.to_string())
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut rpc) = self.rpc.take() else {
            return Ok(());
        };
        let method = format!("{CLIENT_SERVICE}.CloseClient");
        let _: String = rpc.call(&method, &self.id).map_err(|err| Error::remote(&method, err))?;
        Ok(())
    }
}

/// A database reached only through agents. Client `i` is hosted by node
/// `i % nodes.len()`.
pub struct RemoteDatabase {
    name: String,
    addresses: Vec<String>,
    password: String,
    config: String,
}

impl RemoteDatabase {
    pub fn new(name: impl Into<String>, options: &Options) -> Self {
        RemoteDatabase {
            name: name.into(),
            addresses: options.nodes.iter().map(|node| options.rpc_address(node)).collect(),
            password: options.rpc_password.clone(),
            config: String::new(),
        }
    }

    /// Sets the configuration passed to every remote client when it opens.
    pub fn with_config(mut self, config: impl Into<String>) -> Self {
        self.config = config.into();
        self
    }
}

impl Database for RemoteDatabase {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn new_client(&self, id: ClientId) -> Result<Box<dyn Client>> {
        let index = id
            .index()
            .ok_or_else(|| Error::Client {
                client: id,
                message: "reserved id".into(),
            })?;
        if self.addresses.is_empty() {
            return Err(Error::InvalidOptions("at least one node is required".into()));
        }
        let address = &self.addresses[index % self.addresses.len()];
        Ok(Box::new(ClientOverRpc::new(id, address.clone(), self.password.clone())))
    }

    fn client_config(&self) -> String {
        self.config.clone()
    }
}
