use {
    crate::{
        escape_file_name,
        generators::{Pull, Synchronized},
        history::{reconcile, History, Operation},
        CheckResult, Client, ClientId, Database, Error, Generator, Instruction, Model, Options,
        Output, Result,
    },
    consistency_model::{check_operations, visualize_path},
    std::{
        any::Any,
        path::PathBuf,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    },
    tracing::{debug, error, info, warn},
};

/// How long a worker sleeps when no generator has an instruction for it.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

const ARTIFACT_TIME_FORMAT: &str = "%Y-%m-%d-%H%M%S%z";

/// The generators that drive clients, and the model their history is checked against.
pub struct Workload<M> {
    pub model: M,
    pub generators: Vec<Arc<dyn Generator>>,
}

pub struct Scenario<M> {
    pub workload: Workload<M>,
    pub nemesis: Option<Arc<dyn Generator>>,
}

impl<M> Scenario<M> {
    pub fn new(workload: Workload<M>, nemesis: Option<Arc<dyn Generator>>) -> Self {
        Scenario { workload, nemesis }
    }
}

/// The outcome of checking one scenario.
#[derive(Clone, Debug)]
pub struct Report {
    pub name: String,
    /// One verdict per history partition.
    pub verdicts: Vec<CheckResult>,
    /// Visualizations written for partitions that did not check `Ok`.
    pub artifacts: Vec<PathBuf>,
    /// Number of operations recorded, including self-directed ones.
    pub operations: usize,
}

impl Report {
    pub fn is_consistent(&self) -> bool {
        self.verdicts.iter().all(|v| *v == CheckResult::Ok)
    }

    /// `Illegal` if any partition is, else `Unknown` if any partition is, else `Ok`.
    pub fn verdict(&self) -> CheckResult {
        if self.verdicts.contains(&CheckResult::Illegal) {
            CheckResult::Illegal
        } else if self.verdicts.contains(&CheckResult::Unknown) {
            CheckResult::Unknown
        } else {
            CheckResult::Ok
        }
    }
}

/// Executes one scenario against one database.
pub struct Runner<M> {
    name: String,
    database: Arc<dyn Database>,
    model: M,
    /// Workload generators first, then the nemesis if any.
    synchronized: Synchronized,
    workload_generators: usize,
    options: Options,
    clients: Vec<Box<dyn Client>>,
    history: History,
    report: Option<Report>,
}

impl<M> Runner<M>
where
    M: Model<Input = Arc<dyn Instruction>, Output = Output>,
{
    pub fn new(database: Arc<dyn Database>, scenario: Scenario<M>, options: Options) -> Self {
        let Scenario { workload, nemesis } = scenario;
        let mut name = database.name();
        for generator in workload.generators.iter().chain(&nemesis) {
            name.push('~');
            name.push_str(&generator.name());
        }
        let workload_generators = workload.generators.len();
        let mut generators = workload.generators;
        generators.extend(nemesis);
        Runner {
            name,
            database,
            model: workload.model,
            synchronized: Synchronized::new(generators),
            workload_generators,
            options,
            clients: Vec::new(),
            history: History::new(),
            report: None,
        }
    }

    /// The database name followed by `~` and the name of each generator.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The report of the last [`run_scenario`], kept even when the run itself failed.
    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    fn has_nemesis(&self) -> bool {
        self.synchronized.generators().len() > self.workload_generators
    }

    /// Brings up the database, opens one client per unit of concurrency, then sets up the
    /// workload generators and finally the nemesis. On failure, everything already
    /// acquired is released again.
    pub fn set_up(&mut self) -> Result<()> {
        self.options.validate()?;
        info!(scenario = %self.name, "Database set-up.");
        if let Err(err) = self.database.set_up(&self.options) {
            error!(scenario = %self.name, %err, "Database set-up failed.");
            return Err(err);
        }

        info!(scenario = %self.name, concurrency = self.options.concurrency, "Opening clients.");
        let config = self.database.client_config();
        for i in 0..self.options.concurrency {
            let id = ClientId::from(i);
            let opened = self.database.new_client(id).and_then(|mut client| {
                client.open(&config)?;
                Ok(client)
            });
            match opened {
                Ok(client) => self.clients.push(client),
                Err(err) => {
                    error!(scenario = %self.name, client = %id, %err, "Opening client failed.");
                    self.release(0);
                    return Err(err);
                }
            }
        }

        info!(scenario = %self.name, "Generator set-up.");
        let generators = self.synchronized.generators().to_vec();
        for (i, generator) in generators.iter().enumerate() {
            if let Err(err) = generator.set_up(&self.options) {
                error!(scenario = %self.name, generator = %generator.name(), %err, "Generator set-up failed.");
                self.release(i);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Undoes a partial set-up in which the first `generators` generators succeeded.
    fn release(&mut self, generators: usize) {
        for generator in self.synchronized.generators()[..generators].iter().rev() {
            if let Err(err) = generator.tear_down() {
                error!(scenario = %self.name, generator = %generator.name(), %err, "Generator tear-down failed.");
            }
        }
        self.close_clients();
        if let Err(err) = self.database.tear_down() {
            error!(scenario = %self.name, %err, "Database tear-down failed.");
        }
    }

    fn close_clients(&mut self) {
        for mut client in self.clients.drain(..) {
            if let Err(err) = client.close() {
                error!(scenario = %self.name, client = %client.id(), %err, "Closing client failed.");
            }
        }
    }

    /// Runs one worker per client, plus one for self-directed instructions if the
    /// scenario has a nemesis, until the workload duration elapses, the workload or the
    /// nemesis finishes, or a client reports an ambiguous outcome. Timestamps count from
    /// the start of the run, and operations accumulate in the runner's history.
    pub fn run(&mut self) -> Result<()> {
        self.history.restart();
        let control = Control {
            stop: AtomicBool::new(false),
            live_workers: AtomicUsize::new(self.clients.len()),
            deadline: Instant::now() + self.options.workload_duration,
        };
        let shared = Shared {
            name: &self.name,
            synchronized: &self.synchronized,
            history: &self.history,
            stop_on_ambiguous: !self.options.continue_on_ambiguous,
            control: &control,
        };
        let has_nemesis = self.has_nemesis();
        info!(scenario = %self.name, workers = self.clients.len(), nemesis = has_nemesis, "Starting workers.");

        let results: Vec<Result<()>> = thread::scope(|s| {
            let shared = &shared;
            let mut handles = Vec::new();
            for client in self.clients.iter_mut() {
                handles.push(s.spawn(move || {
                    let _guard = WorkloadWorker(shared.control);
                    let id = client.id();
                    shared.work(id, Some(client))
                }));
            }
            if has_nemesis {
                handles.push(s.spawn(move || {
                    let _guard = NemesisWorker(shared.control);
                    shared.work(ClientId::NONE, None)
                }));
            }
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|panic| Err(worker_panic(panic))))
                .collect()
        });

        info!(scenario = %self.name, operations = self.history.len(), "Workers finished.");
        results.into_iter().collect()
    }

    /// Tears down the nemesis, the workload generators, the clients, and the database,
    /// in that order. Every step runs; the first generator or database error is returned.
    pub fn tear_down(&mut self) -> Result<()> {
        let mut first = None;
        for generator in self.synchronized.generators().iter().rev() {
            if let Err(err) = generator.tear_down() {
                error!(scenario = %self.name, generator = %generator.name(), %err, "Generator tear-down failed.");
                first = first.or(Some(err));
            }
        }
        self.close_clients();
        info!(scenario = %self.name, "Database tear-down.");
        if let Err(err) = self.database.tear_down() {
            error!(scenario = %self.name, %err, "Database tear-down failed.");
            first = first.or(Some(err));
        }
        first.map_or(Ok(()), Err)
    }

    /// Checks everything recorded so far for linearizability, partition by partition.
    /// Writes a visualization for each partition that does not check `Ok`.
    pub fn check(&self) -> Result<Report> {
        let history = self.history.extract();
        let recorded = history.len();
        let history: Vec<Operation> = history
            .into_iter()
            .filter(|op| !op.input.is_self_directed())
            .collect();
        let partitions = self.model.partition(reconcile(history));
        let timestamp = chrono::Local::now().format(ARTIFACT_TIME_FORMAT).to_string();

        let mut report = Report {
            name: self.name.clone(),
            verdicts: Vec::with_capacity(partitions.len()),
            artifacts: Vec::new(),
            operations: recorded,
        };
        let mut visualize_error = None;
        for (i, partition) in partitions.iter().enumerate() {
            let (verdict, info) = check_operations(&self.model, partition, self.options.check_timeout);
            if verdict == CheckResult::Ok {
                info!(scenario = %self.name, partition = i, ?verdict, "Checked partition.");
            } else {
                warn!(scenario = %self.name, partition = i, ?verdict, "Checked partition.");
                let file_name = escape_file_name(&format!("{timestamp}.{}.{i}.html", self.name));
                let path = self.options.artifact_dir.join(file_name);
                match visualize_path(&info, &path) {
                    Ok(()) => report.artifacts.push(path),
                    Err(err) => {
                        error!(scenario = %self.name, path = %path.display(), %err, "Writing visualization failed.");
                        visualize_error = visualize_error.or(Some(err));
                    }
                }
            }
            report.verdicts.push(verdict);
        }
        match visualize_error {
            Some(err) => Err(err.into()),
            None => Ok(report),
        }
    }
}

/// Sets up, runs, tears down, and checks a scenario. The check runs even if the workload
/// failed, so partial histories are still examined, and the report stays available through
/// [`Runner::report`]. A run error takes precedence over a check error, which takes
/// precedence over a tear-down error.
pub fn run_scenario<M>(runner: &mut Runner<M>) -> Result<Report>
where
    M: Model<Input = Arc<dyn Instruction>, Output = Output>,
{
    runner.set_up()?;
    let ran = runner.run();
    let torn_down = runner.tear_down();
    let checked = runner.check();
    runner.report = checked.as_ref().ok().cloned();
    if let Err(err) = ran {
        if let Some(report) = &runner.report {
            error!(
                scenario = %runner.name,
                %err,
                verdict = ?report.verdict(),
                operations = report.operations,
                artifacts = ?report.artifacts,
                "Workload failed. Partial history checked."
            );
        }
        return Err(err);
    }
    let report = checked?;
    torn_down?;
    Ok(report)
}

struct Control {
    stop: AtomicBool,
    live_workers: AtomicUsize,
    deadline: Instant,
}

impl Control {
    fn running(&self) -> bool {
        !self.stop.load(Ordering::Acquire) && Instant::now() < self.deadline
    }

    fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Stops the nemesis once the last workload worker exits, however it exits.
struct WorkloadWorker<'a>(&'a Control);

impl Drop for WorkloadWorker<'_> {
    fn drop(&mut self) {
        if self.0.live_workers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.stop();
        }
    }
}

/// Stops the workload once the nemesis is done, however it finishes.
struct NemesisWorker<'a>(&'a Control);

impl Drop for NemesisWorker<'_> {
    fn drop(&mut self) {
        self.0.stop();
    }
}

struct Shared<'a> {
    name: &'a str,
    synchronized: &'a Synchronized,
    history: &'a History,
    stop_on_ambiguous: bool,
    control: &'a Control,
}

impl Shared<'_> {
    fn work(&self, id: ClientId, mut client: Option<&mut Box<dyn Client>>) -> Result<()> {
        while self.control.running() {
            let ready = match self.synchronized.pull(id)? {
                Pull::Ready(ready) => ready,
                Pull::NotYet => {
                    thread::sleep(IDLE_BACKOFF);
                    continue;
                }
                Pull::Exhausted => {
                    debug!(scenario = %self.name, client = %id, "Worker exhausted.");
                    return Ok(());
                }
            };
            let instruction = ready.instruction;
            let self_directed = instruction.is_self_directed();
            if !self_directed && client.is_none() {
                error!(scenario = %self.name, %instruction, "Client instruction without a client.");
                return Err(Error::UnsupportedInstruction(instruction.to_string()));
            }

            self.synchronized.notify_call(id, &*instruction)?;
            let call = self.history.now();
            let output = match client.as_mut() {
                Some(client) if !self_directed => client.invoke(&*instruction),
                _ => self.synchronized.invoke(ready.source, &*instruction),
            };
            let ret = self.history.now();

            let ambiguous = !self_directed && output.is_indeterminate();
            self.history.append(Operation {
                client_id: id,
                input: instruction.clone(),
                call,
                output: output.clone(),
                ret: (!ambiguous).then_some(ret),
            });
            self.synchronized.notify_return(id, &*instruction, &output)?;
            if ambiguous && self.stop_on_ambiguous {
                warn!(scenario = %self.name, client = %id, %instruction, %output, "Ambiguous outcome. Stopping.");
                self.control.stop();
                return Ok(());
            }
        }
        Ok(())
    }
}

fn worker_panic(panic: Box<dyn Any + Send>) -> Error {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into());
    Error::WorkerPanic(message)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            generators::Limit,
            kv::{GetSetGenerator, KvInstruction, KvModel, MemoryDatabase},
            Next, SplitMix64, Value,
        },
        parking_lot::Mutex,
        std::fmt,
    };

    fn options(concurrency: usize) -> Options {
        Options {
            concurrency,
            workload_duration: Duration::from_secs(30),
            ..Options::default()
        }
    }

    fn limited_workload(limit: usize) -> Workload<KvModel> {
        let generator = GetSetGenerator::new(vec!["a".into(), "b".into()], SplitMix64::new(5));
        Workload {
            model: KvModel,
            generators: vec![Arc::new(Limit::new(generator, limit))],
        }
    }

    #[derive(Debug)]
    struct Ping;

    impl fmt::Display for Ping {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("Ping")
        }
    }

    impl Instruction for Ping {
        fn kind(&self) -> &'static str {
            "Ping"
        }

        fn is_self_directed(&self) -> bool {
            true
        }
    }

    /// Emits a bounded number of self-directed pings and records lifecycle events.
    #[derive(Default)]
    struct Pinger {
        remaining: Mutex<usize>,
        events: Arc<Mutex<Vec<String>>>,
        fail_set_up: bool,
    }

    impl Generator for Pinger {
        fn name(&self) -> String {
            "Pinger".into()
        }

        fn set_up(&self, _options: &Options) -> Result<()> {
            self.events.lock().push("set_up".into());
            if self.fail_set_up {
                return Err(Error::SetUp("refused".into()));
            }
            *self.remaining.lock() = 3;
            Ok(())
        }

        fn next(&self, client: ClientId) -> Result<Next> {
            if !client.is_none() {
                return Ok(Next::Exhausted);
            }
            let mut remaining = self.remaining.lock();
            if *remaining == 0 {
                return Ok(Next::Exhausted);
            }
            *remaining -= 1;
            Ok(Next::Instruction(Arc::new(Ping)))
        }

        fn invoke(&self, instruction: &dyn Instruction) -> Output {
            self.events.lock().push(format!("invoke {instruction}"));
            Output::ok(Value::Text("pong".into()))
        }

        fn tear_down(&self) -> Result<()> {
            self.events.lock().push("tear_down".into());
            Ok(())
        }
    }

    /// Times out every write.
    struct FlakyDatabase;

    struct FlakyClient(ClientId);

    impl Client for FlakyClient {
        fn id(&self) -> ClientId {
            self.0
        }

        fn open(&mut self, _config: &str) -> Result<()> {
            Ok(())
        }

        fn invoke(&mut self, instruction: &dyn Instruction) -> Output {
            match instruction.downcast_ref::<KvInstruction>() {
                Some(KvInstruction::Set { .. }) => Output::ambiguous("timeout"),
                _ => Output::nil(),
            }
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    impl Database for FlakyDatabase {
        fn name(&self) -> String {
            "Flaky".into()
        }

        fn new_client(&self, id: ClientId) -> Result<Box<dyn Client>> {
            Ok(Box::new(FlakyClient(id)))
        }
    }

    #[test]
    fn names_database_then_generators() {
        let scenario = Scenario::new(limited_workload(1), Some(Arc::new(Pinger::default())));
        let runner = Runner::new(Arc::new(MemoryDatabase::new()), scenario, options(1));
        assert_eq!(runner.name(), "Memory~GetSet(1)~Pinger");
    }

    #[test]
    fn workload_exhaustion_ends_the_run() {
        let scenario = Scenario::new(limited_workload(25), None);
        let mut runner = Runner::new(Arc::new(MemoryDatabase::new()), scenario, options(2));
        let report = run_scenario(&mut runner).unwrap();
        assert_eq!(report.operations, 50);
        assert!(report.is_consistent());
        assert_eq!(report.verdict(), CheckResult::Ok);
        assert!(report.artifacts.is_empty());
    }

    #[test]
    fn self_directed_instructions_are_recorded_but_not_checked() {
        let pinger = Arc::new(Pinger::default());
        let events = pinger.events.clone();
        let scenario = Scenario::new(limited_workload(10), Some(pinger));
        let mut runner = Runner::new(Arc::new(MemoryDatabase::new()), scenario, options(1));
        runner.set_up().unwrap();
        runner.run().unwrap();
        runner.tear_down().unwrap();

        let history = runner.history.extract();
        let pings: Vec<_> = history.iter().filter(|op| op.input.is_self_directed()).collect();
        assert!(pings.len() <= 3);
        assert!(pings.iter().all(|op| op.client_id.is_none() && op.ret.is_some()));
        let events = events.lock();
        assert_eq!(events.first().map(String::as_str), Some("set_up"));
        assert_eq!(events.last().map(String::as_str), Some("tear_down"));
    }

    #[test]
    fn finished_nemesis_stops_the_workload() {
        let mut rng = SplitMix64::new(4);
        let workload = crate::kv::get_set_workload(crate::kv::default_keys(2), crate::kv::DEFAULT_PACE, &mut rng);
        let scenario = Scenario::new(workload, Some(Arc::new(Pinger::default())));
        let mut runner = Runner::new(Arc::new(MemoryDatabase::new()), scenario, options(2));
        let started = Instant::now();
        let report = run_scenario(&mut runner).unwrap();
        assert!(started.elapsed() < Duration::from_secs(20));
        assert!(report.is_consistent());
    }

    /// Hands out nothing and fails once it has been asked `remaining` times.
    struct FailAfter(Mutex<usize>);

    impl Generator for FailAfter {
        fn name(&self) -> String {
            "FailAfter".into()
        }

        fn next(&self, _client: ClientId) -> Result<Next> {
            let mut remaining = self.0.lock();
            if *remaining == 0 {
                return Err(Error::generator(self.name(), "boom"));
            }
            *remaining -= 1;
            Ok(Next::NotYet)
        }
    }

    #[test]
    fn failed_run_still_reports_the_partial_history() {
        let mut workload = limited_workload(100);
        workload.generators.push(Arc::new(FailAfter(Mutex::new(20))));
        let mut runner = Runner::new(Arc::new(MemoryDatabase::new()), Scenario::new(workload, None), options(1));
        assert!(runner.report().is_none());
        assert!(matches!(run_scenario(&mut runner), Err(Error::Generator { .. })));
        let report = runner.report().unwrap();
        assert_eq!(report.operations, 20);
        assert_eq!(report.verdict(), CheckResult::Ok);
    }

    /// Spends a while in set-up before serving in-memory clients.
    struct SlowDatabase(MemoryDatabase);

    impl Database for SlowDatabase {
        fn name(&self) -> String {
            "Slow".into()
        }

        fn set_up(&self, options: &Options) -> Result<()> {
            thread::sleep(Duration::from_millis(200));
            self.0.set_up(options)
        }

        fn new_client(&self, id: ClientId) -> Result<Box<dyn Client>> {
            self.0.new_client(id)
        }
    }

    #[test]
    fn timestamps_count_from_the_start_of_the_run() {
        let scenario = Scenario::new(limited_workload(5), None);
        let mut runner = Runner::new(Arc::new(SlowDatabase(MemoryDatabase::new())), scenario, options(1));
        runner.set_up().unwrap();
        runner.run().unwrap();
        runner.tear_down().unwrap();
        let history = runner.history.extract();
        assert_eq!(history.len(), 5);
        assert!(history[0].call < 200_000, "first call at {}µs", history[0].call);
    }

    #[test]
    fn ambiguous_outcome_stops_the_run() {
        let scenario = Scenario::new(limited_workload(1000), None);
        let mut runner = Runner::new(Arc::new(FlakyDatabase), scenario, options(2));
        runner.set_up().unwrap();
        runner.run().unwrap();
        let history = runner.history.extract();
        assert!(history.len() < 2000);
        let ambiguous: Vec<_> = history.iter().filter(|op| op.ret.is_none()).collect();
        // Only the writer can time out, and it stops at its first timeout.
        assert_eq!(ambiguous.len(), 1);
        assert!(ambiguous[0].output.is_indeterminate());
    }

    #[test]
    fn continue_on_ambiguous_keeps_going() {
        let scenario = Scenario::new(limited_workload(100), None);
        let options = Options {
            continue_on_ambiguous: true,
            ..options(2)
        };
        let mut runner = Runner::new(Arc::new(FlakyDatabase), scenario, options);
        let report = run_scenario(&mut runner).unwrap();
        assert_eq!(report.operations, 200);
        // Timed-out writes may or may not have happened; reads of nil stay explainable.
        assert!(report.is_consistent());
    }

    #[test]
    fn failed_set_up_releases_earlier_generators() {
        let first = Arc::new(Pinger::default());
        let events = first.events.clone();
        let failing = Arc::new(Pinger {
            fail_set_up: true,
            ..Pinger::default()
        });
        let workload = Workload {
            model: KvModel,
            generators: vec![first, failing.clone()],
        };
        let mut runner = Runner::new(Arc::new(MemoryDatabase::new()), Scenario::new(workload, None), options(1));
        assert!(matches!(runner.set_up(), Err(Error::SetUp(_))));
        assert_eq!(*events.lock(), vec!["set_up".to_string(), "tear_down".to_string()]);
        assert_eq!(*failing.events.lock(), vec!["set_up".to_string()]);
        assert!(runner.clients.is_empty());
    }

    #[test]
    fn invalid_options_fail_before_set_up() {
        let scenario = Scenario::new(limited_workload(1), None);
        let mut runner = Runner::new(Arc::new(MemoryDatabase::new()), scenario, options(0));
        assert!(matches!(runner.set_up(), Err(Error::InvalidOptions(_))));
    }
}
