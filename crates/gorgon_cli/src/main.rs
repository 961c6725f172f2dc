//! The `gorgon` command.
//!
//! ```bash
//! # On every node of the system under test
//! gorgon --rpc-password secret rpc
//!
//! # On the control machine
//! gorgon --nodes n1,n2,n3 --rpc-password secret run --database remote --nemesis none,kill,partition
//! ```

#![deny(unused_must_use)]
#![warn(rust_2018_idioms)]

use {
    anyhow::{bail, Context, Result},
    clap::{Args, Parser, Subcommand, ValueEnum},
    gorgon::{
        agent::{self, ClientService, SystemShell},
        kv::{self, KvInstruction, MemoryDatabase},
        nemeses::{KillNemesis, PartitionNemesis},
        remote::{InstructionRegistry, RemoteDatabase},
        run_scenario, CheckResult, Database, Generator, Options, Runner, Scenario, SplitMix64,
    },
    rand::{rngs::OsRng, RngCore},
    std::{path::PathBuf, sync::Arc, time::Duration},
    tracing::{error, info, warn},
    tracing_subscriber::EnvFilter,
};

const MIN_WORKLOAD_DURATION: Duration = Duration::from_secs(10);

/// Black-box fault injection and linearizability checking for distributed databases.
#[derive(Parser)]
#[command(name = "gorgon", author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    options: OptionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct OptionArgs {
    /// TOML file with run options. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated list of nodes.
    #[arg(long, value_delimiter = ',')]
    nodes: Vec<String>,

    /// Number of clients to use.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Intended workload and nemesis duration, in seconds.
    #[arg(long)]
    workload_duration: Option<f64>,

    /// Keep going after a client returns an error with unknown effect.
    #[arg(long)]
    continue_on_ambiguous: bool,

    #[arg(long)]
    rpc_port: Option<u16>,

    #[arg(long)]
    rpc_password: Option<String>,

    /// Seeds every generator. Drawn from OS entropy when absent or zero.
    #[arg(long)]
    seed: Option<u64>,

    /// Per-partition linearizability check timeout, in seconds.
    #[arg(long)]
    check_timeout: Option<f64>,

    /// Where visualizations of failed checks are written.
    #[arg(long)]
    artifact_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one scenario per selected nemesis.
    Run(RunArgs),

    /// Serve fault-injection procedures to a remote runner.
    Rpc(RpcArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, value_enum, default_value_t = DatabaseKind::Memory)]
    database: DatabaseKind,

    /// Name reported for a remote database.
    #[arg(long, default_value = "Remote")]
    remote_name: String,

    #[arg(long, value_enum, default_value_t = WorkloadKind::GetSet)]
    workload: WorkloadKind,

    /// Number of distinct keys.
    #[arg(long, default_value_t = 8)]
    keys: usize,

    /// Mean delay between instructions, in milliseconds.
    #[arg(long, default_value_t = 1.0)]
    pace: f64,

    /// Comma-separated nemeses.
    #[arg(long, value_enum, value_delimiter = ',', default_value = "none")]
    nemesis: Vec<NemesisKind>,

    /// Process signalled by the kill nemesis.
    #[arg(long, default_value = "memcached")]
    kill_process: String,

    /// Ports left open on a partitioned node, besides the RPC port.
    #[arg(long, value_delimiter = ',')]
    allowed_ports: Vec<u16>,
}

#[derive(Args)]
struct RpcArgs {
    /// Also host clients of an in-memory store for remote runners.
    #[arg(long)]
    serve_memory: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DatabaseKind {
    Memory,
    /// An in-memory store whose reads lag one write behind.
    Stale,
    /// Clients hosted by the agents on `--nodes`.
    Remote,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum WorkloadKind {
    GetSet,
    PartitionAware,
    /// Get/set traffic plus one writer at a time after each kill.
    SetAfterKill,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum NemesisKind {
    #[value(name = "none")]
    Nil,
    Kill,
    Partition,
}

fn seconds(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).with_context(|| format!("invalid duration: {secs}"))
}

fn load_options(args: OptionArgs) -> Result<Options> {
    let mut options = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => Options::default(),
    };
    let nodes: Vec<String> = args
        .nodes
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .map(String::from)
        .collect();
    if !nodes.is_empty() {
        options.nodes = nodes;
    }
    if let Some(concurrency) = args.concurrency {
        options.concurrency = concurrency;
    }
    if let Some(secs) = args.workload_duration {
        options.workload_duration = seconds(secs)?;
    }
    options.continue_on_ambiguous |= args.continue_on_ambiguous;
    if let Some(port) = args.rpc_port {
        options.rpc_port = port;
    }
    if let Some(password) = args.rpc_password {
        options.rpc_password = password;
    }
    if let Some(seed) = args.seed {
        options.seed = seed;
    }
    if options.seed == 0 {
        options.seed = OsRng.next_u64();
    }
    if let Some(secs) = args.check_timeout {
        options.check_timeout = seconds(secs)?;
    }
    if let Some(dir) = args.artifact_dir {
        options.artifact_dir = dir;
    }
    options.validate()?;
    Ok(options)
}

fn run(options: Options, args: &RunArgs) -> Result<()> {
    if options.workload_duration < MIN_WORKLOAD_DURATION {
        bail!("minimum workload duration is {}s", MIN_WORKLOAD_DURATION.as_secs());
    }
    info!(seed = options.seed, nodes = ?options.nodes, "Starting run.");
    let mut rng = SplitMix64::new(options.seed);
    let database: Arc<dyn Database> = match args.database {
        DatabaseKind::Memory => Arc::new(MemoryDatabase::new()),
        DatabaseKind::Stale => Arc::new(MemoryDatabase::stale()),
        DatabaseKind::Remote => Arc::new(RemoteDatabase::new(args.remote_name.clone(), &options)),
    };
    let pace = seconds(args.pace / 1000.0)?;

    let mut inconsistent = Vec::new();
    for nemesis in &args.nemesis {
        let keys = kv::default_keys(args.keys);
        let workload = match args.workload {
            WorkloadKind::GetSet => kv::get_set_workload(keys, pace, &mut rng),
            WorkloadKind::PartitionAware => kv::partition_aware_workload(keys, pace, &mut rng),
            WorkloadKind::SetAfterKill => kv::set_after_kill_workload(keys, pace, &mut rng),
        };
        let nemesis: Option<Arc<dyn Generator>> = match nemesis {
            NemesisKind::Nil => None,
            NemesisKind::Kill => Some(Arc::new(KillNemesis::new(args.kill_process.clone(), rng.fork()))),
            NemesisKind::Partition => {
                Some(Arc::new(PartitionNemesis::new(args.allowed_ports.clone(), rng.fork())))
            }
        };
        let scenario = Scenario::new(workload, nemesis);
        let mut runner = Runner::new(database.clone(), scenario, options.clone());
        match run_scenario(&mut runner) {
            Ok(report) => {
                let verdict = report.verdict();
                if verdict == CheckResult::Illegal {
                    warn!(scenario = %report.name, artifacts = ?report.artifacts, "Scenario is not linearizable.");
                    inconsistent.push(report.name);
                } else {
                    info!(scenario = %report.name, ?verdict, operations = report.operations, "Scenario finished.");
                }
            }
            Err(err) => {
                error!(scenario = %runner.name(), %err, "Scenario failed.");
                return Err(err.into());
            }
        }
    }
    if !inconsistent.is_empty() {
        bail!("not linearizable: {}", inconsistent.join(", "));
    }
    Ok(())
}

fn rpc(options: Options, args: &RpcArgs) -> Result<()> {
    let clients = args.serve_memory.then(|| {
        let instructions = InstructionRegistry::new().register::<KvInstruction>(KvInstruction::KIND);
        ClientService::new(Arc::new(MemoryDatabase::new()), instructions)
    });
    let registry = agent::registry(Arc::new(SystemShell), clients);
    let address = format!("0.0.0.0:{}", options.rpc_port);
    let runtime = tokio::runtime::Runtime::new()?;
    runtime
        .block_on(gorgon_rpc::listen(address, options.rpc_password.as_bytes(), registry))
        .context("rpc")?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let options = load_options(cli.options)?;
    match cli.command {
        Command::Run(args) => run(options, &args),
        Command::Rpc(args) => rpc(options, &args),
    }
}
