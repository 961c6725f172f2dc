use {
    crate::{ClientId, Generator, Instruction, Next, Options, Output, Result},
    parking_lot::Mutex,
    std::collections::HashMap,
};

/// Exhausts after `limit` instructions for each client.
pub struct Limit<G> {
    inner: G,
    limit: usize,
    counts: Mutex<HashMap<ClientId, usize>>,
}

impl<G: Generator> Limit<G> {
    pub fn new(inner: G, limit: usize) -> Self {
        Limit {
            inner,
            limit,
            counts: Mutex::new(HashMap::new()),
        }
    }
}

impl<G: Generator> Generator for Limit<G> {
    fn name(&self) -> String {
        format!("{}({})", self.inner.name(), self.limit)
    }

    fn set_up(&self, options: &Options) -> Result<()> {
        self.counts.lock().clear();
        self.inner.set_up(options)
    }

    fn next(&self, client: ClientId) -> Result<Next> {
        let mut counts = self.counts.lock();
        let count = counts.entry(client).or_default();
        if *count >= self.limit {
            return Ok(Next::Exhausted);
        }
        let next = self.inner.next(client)?;
        if matches!(next, Next::Instruction(_)) {
            *count += 1;
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
