use {
    crate::{ClientId, Generator, Instruction, Next, Options, Output, Result, SplitMix64},
    parking_lot::Mutex,
    rand::Rng,
    std::time::{Duration, Instant},
};

/// Once the schedule falls this many paces behind, it restarts from the present instead
/// of bursting to catch up.
const MAX_LAG_PACES: u32 = 8;

struct Schedule {
    next: Instant,
    rng: SplitMix64,
}

/// Paces another generator: after each instruction, the next one is withheld for a random
/// interval in `[0, 2 * pace)`, so the mean rate is one instruction per `pace`.
pub struct Stagger<G> {
    inner: G,
    pace: Duration,
    schedule: Mutex<Schedule>,
}

impl<G: Generator> Stagger<G> {
    pub fn new(inner: G, pace: Duration, rng: SplitMix64) -> Self {
        Stagger {
            inner,
            pace,
            schedule: Mutex::new(Schedule {
                next: Instant::now(),
                rng,
            }),
        }
    }
}

impl<G: Generator> Generator for Stagger<G> {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn set_up(&self, options: &Options) -> Result<()> {
        self.inner.set_up(options)
    }

    fn next(&self, client: ClientId) -> Result<Next> {
        let now = Instant::now();
        let mut schedule = self.schedule.lock();
        if now < schedule.next {
            return Ok(Next::NotYet);
        }
        let next = self.inner.next(client)?;
        if matches!(next, Next::Instruction(_)) && !self.pace.is_zero() {
            let max = 2 * self.pace.as_nanos() as u64;
            let delay = Duration::from_nanos(schedule.rng.gen_range(0..max));
            let mut at = schedule.next + delay;
            if now.saturating_duration_since(at) > self.pace * MAX_LAG_PACES {
                at = now + delay;
            }
            schedule.next = at;
        }
        Ok(next)
    }

    fn invoke(&self, instruction: &dyn Instruction) -> Output {
        self.inner.invoke(instruction)
    }

    fn on_call(&self, client: ClientId, instruction: &dyn Instruction) -> Result<()> {
        self.inner.on_call(client, instruction)
    }

    fn on_return(&self, client: ClientId, instruction: &dyn Instruction, output: &Output) -> Result<()> {
        self.inner.on_return(client, instruction, output)
    }

    fn tear_down(&self) -> Result<()> {
        self.inner.tear_down()
    }
}
