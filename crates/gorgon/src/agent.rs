//! Procedures served by the agent that runs on every node of the system under test.

use {
    crate::{remote::InstructionRegistry, Client, ClientId, Database, Output},
    gorgon_rpc::{decode_param, Registry, Service},
    parking_lot::Mutex,
    serde::{Deserialize, Serialize},
    serde_json::Value as Json,
    std::{collections::HashMap, io, process::Command, sync::Arc},
    tracing::{debug, info, warn},
};

pub const KILL_SERVICE: &str = "KillRpc";
pub const IPTABLES_SERVICE: &str = "IpTablesRpc";
pub const CLIENT_SERVICE: &str = "ClientRpc";

/// The reply of procedures that have nothing to return.
pub const OK_REPLY: &str = "ok";

/// Runs external commands. Swapped out in tests to record commands instead.
pub trait Shell: Send + Sync + 'static {
    /// Runs `program` to completion, failing if it cannot start or exits unsuccessfully.
    fn run(&self, program: &str, args: &[String]) -> io::Result<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemShell;

impl Shell for SystemShell {
    fn run(&self, program: &str, args: &[String]) -> io::Result<()> {
        let status = Command::new(program).args(args).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::Other, format!("{program} {status}")))
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PkillArgs {
    pub process: String,
    pub signal: i32,
}

/// `KillRpc.Pkill`: delivers a signal to every process with the given name.
pub struct KillService {
    shell: Arc<dyn Shell>,
}

impl KillService {
    pub fn new(shell: Arc<dyn Shell>) -> Self {
        KillService { shell }
    }
}

impl Service for KillService {
    fn name(&self) -> &'static str {
        KILL_SERVICE
    }

    fn call(&self, method: &str, param: Json) -> Result<Json, String> {
        if method != "Pkill" {
            return Err(format!("rpc: can't find method {KILL_SERVICE}.{method}"));
        }
        let args: PkillArgs = decode_param(param)?;
        let argv = vec![format!("-{}", args.signal), args.process.clone()];
        let result = self.shell.run("pkill", &argv);
        info!(signal = args.signal, process = %args.process, ?result, "Pkill.");
        result.map_err(|err| err.to_string())?;
        Ok(Json::from(OK_REPLY))
    }
}

/// `IpTablesRpc.IpTables`: runs `iptables` with the given arguments.
pub struct IpTablesService {
    shell: Arc<dyn Shell>,
}

impl IpTablesService {
    pub fn new(shell: Arc<dyn Shell>) -> Self {
        IpTablesService { shell }
    }
}

impl Service for IpTablesService {
    fn name(&self) -> &'static str {
        IPTABLES_SERVICE
    }

    fn call(&self, method: &str, param: Json) -> Result<Json, String> {
        if method != "IpTables" {
            return Err(format!("rpc: can't find method {IPTABLES_SERVICE}.{method}"));
        }
        let args: Vec<String> = decode_param(param)?;
        let result = self.shell.run("iptables", &args);
        info!(?args, ?result, "IpTables.");
        result.map_err(|err| err.to_string())?;
        Ok(Json::from(OK_REPLY))
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OpenClientArgs {
    pub id: ClientId,
    pub config: String,
}

/// An instruction in transit: its kind selects the decoder for its value.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct InvokeArgs {
    pub id: ClientId,
    pub kind: String,
    pub value: Json,
}

type SharedClient = Arc<Mutex<Box<dyn Client>>>;

/// `ClientRpc`: hosts clients of the system under test on behalf of a remote runner.
///
/// `OpenClient` creates and opens a client, `Invoke` runs an instruction on it and
/// replies with its [`Output`], `CloseClient` closes and forgets it.
pub struct ClientService {
    database: Arc<dyn Database>,
    instructions: InstructionRegistry,
    clients: Mutex<HashMap<ClientId, SharedClient>>,
}

impl ClientService {
    pub fn new(database: Arc<dyn Database>, instructions: InstructionRegistry) -> Self {
        ClientService {
            database,
            instructions,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, id: ClientId) -> Option<SharedClient> {
        self.clients.lock().get(&id).cloned()
    }

    fn open(&self, args: OpenClientArgs) -> Result<Json, String> {
        let mut client = self.database.new_client(args.id).map_err(|err| err.to_string())?;
        client.open(&args.config).map_err(|err| err.to_string())?;
        let previous = self
            .clients
            .lock()
            .insert(args.id, Arc::new(Mutex::new(client)));
        if let Some(previous) = previous {
            warn!(client = %args.id, "Replacing open client.");
            if let Err(err) = previous.lock().close() {
                warn!(client = %args.id, %err, "Closing replaced client failed.");
            }
        }
        info!(client = %args.id, "Client opened.");
        Ok(Json::from(OK_REPLY))
    }

    fn invoke(&self, args: InvokeArgs) -> Result<Json, String> {
        let output = match (self.client(args.id), self.instructions.decode(&args.kind, args.value)) {
            (None, _) => Output::rejected(format!("client {} is not open", args.id)),
            (_, Err(err)) => Output::rejected(err.to_string()),
            (Some(client), Ok(instruction)) => {
                let output = client.lock().invoke(&*instruction);
                debug!(client = %args.id, %instruction, %output, "Invoked.");
                output
            }
        };
        serde_json::to_value(output).map_err(|err| err.to_string())
    }

    fn close(&self, id: ClientId) -> Result<Json, String> {
        let Some(client) = self.clients.lock().remove(&id) else {
            return Err(format!("client {id} is not open"));
        };
        let closed = client.lock().close();
        info!(client = %id, ?closed, "Client closed.");
        closed.map_err(|err| err.to_string())?;
        Ok(Json::from(OK_REPLY))
    }
}

impl Service for ClientService {
    fn name(&self) -> &'static str {
        CLIENT_SERVICE
    }

    fn call(&self, method: &str, param: Json) -> Result<Json, String> {
        match method {
            "OpenClient" => self.open(decode_param(param)?),
            "Invoke" => self.invoke(decode_param(param)?),
            "CloseClient" => self.close(decode_param(param)?),
            _ => Err(format!("rpc: can't find method {CLIENT_SERVICE}.{method}")),
        }
    }
}

/// The fault-injection procedures, plus client hosting when a database is given.
pub fn registry(shell: Arc<dyn Shell>, clients: Option<ClientService>) -> Registry {
    let registry = Registry::new()
        .register(KillService::new(shell.clone()))
        .register(IpTablesService::new(shell));
    match clients {
        Some(clients) => registry.register(clients),
        None => registry,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use {
        super::*,
        crate::kv::{KvInstruction, MemoryDatabase},
        crate::Value,
        serde_json::json,
    };

    /// Records commands instead of running them. Fails any command whose program is
    /// listed in `failing`.
    #[derive(Default)]
    pub(crate) struct RecordingShell {
        pub(crate) commands: Mutex<Vec<Vec<String>>>,
        pub(crate) failing: Vec<String>,
    }

    impl Shell for RecordingShell {
        fn run(&self, program: &str, args: &[String]) -> io::Result<()> {
            let mut command = vec![program.to_string()];
            command.extend(args.iter().cloned());
            self.commands.lock().push(command);
            if self.failing.iter().any(|p| p == program) {
                return Err(io::Error::new(io::ErrorKind::Other, "exit status: 1"));
            }
            Ok(())
        }
    }

    #[test]
    fn pkill_runs_with_the_signal_flag() {
        let shell = Arc::new(RecordingShell::default());
        let registry = registry(shell.clone(), None);
        let reply = registry.dispatch("KillRpc.Pkill", json!({"process": "memcached", "signal": 9}));
        assert_eq!(reply, Ok(json!("ok")));
        assert_eq!(*shell.commands.lock(), vec![vec!["pkill", "-9", "memcached"]]);
    }

    #[test]
    fn iptables_passes_arguments_through() {
        let shell = Arc::new(RecordingShell::default());
        let registry = registry(shell.clone(), None);
        let reply = registry.dispatch("IpTablesRpc.IpTables", json!(["-A", "INPUT", "-j", "DROP"]));
        assert_eq!(reply, Ok(json!("ok")));
        assert_eq!(*shell.commands.lock(), vec![vec!["iptables", "-A", "INPUT", "-j", "DROP"]]);
    }

    #[test]
    fn command_failures_are_reported() {
        let shell = Arc::new(RecordingShell {
            failing: vec!["pkill".into()],
            ..RecordingShell::default()
        });
        let registry = registry(shell, None);
        let reply = registry.dispatch("KillRpc.Pkill", json!({"process": "x", "signal": 15}));
        assert_eq!(reply, Err("exit status: 1".to_string()));
        assert!(registry.dispatch("KillRpc.Nope", json!(null)).is_err());
        assert!(registry.dispatch("KillRpc.Pkill", json!("oops")).is_err());
    }

    #[test]
    fn hosts_clients_for_a_remote_runner() {
        let instructions = InstructionRegistry::new().register::<KvInstruction>(KvInstruction::KIND);
        let service = ClientService::new(Arc::new(MemoryDatabase::new()), instructions);
        let registry = registry(Arc::new(RecordingShell::default()), Some(service));
        let invoke = |instruction: KvInstruction| {
            let reply = registry
                .dispatch(
                    "ClientRpc.Invoke",
                    json!({"id": 0, "kind": "Kv", "value": serde_json::to_value(instruction).unwrap()}),
                )
                .unwrap();
            serde_json::from_value::<Output>(reply).unwrap()
        };

        assert_eq!(invoke(KvInstruction::get("k")).effect, crate::Effect::NotApplied);
        let opened = registry.dispatch("ClientRpc.OpenClient", json!({"id": 0, "config": ""}));
        assert_eq!(opened, Ok(json!("ok")));
        assert_eq!(invoke(KvInstruction::set("k", 4)), Output::nil());
        assert_eq!(invoke(KvInstruction::get("k")), Output::ok(Value::Int(4)));

        let unknown = registry
            .dispatch("ClientRpc.Invoke", json!({"id": 0, "kind": "Nope", "value": null}))
            .unwrap();
        assert_eq!(serde_json::from_value::<Output>(unknown).unwrap().effect, crate::Effect::NotApplied);

        assert_eq!(registry.dispatch("ClientRpc.CloseClient", json!(0)), Ok(json!("ok")));
        assert!(registry.dispatch("ClientRpc.CloseClient", json!(0)).is_err());
    }
}
