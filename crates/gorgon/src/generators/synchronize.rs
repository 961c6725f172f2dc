use {
    crate::{ClientId, Generator, Instruction, Next, Output, Result},
    parking_lot::Mutex,
    std::sync::Arc,
    tracing::error,
};

/// An instruction handed to exactly one worker, with the index of the generator that
/// produced it.
#[derive(Clone, Debug)]
pub struct Ready {
    pub instruction: Arc<dyn Instruction>,
    pub source: usize,
}

#[derive(Clone, Debug)]
pub enum Pull {
    Ready(Ready),
    NotYet,
    /// Every generator is exhausted for the requesting client.
    Exhausted,
}

/// Serializes access to a scenario's generators. Pulling an instruction, notifying a
/// call, and notifying a return are each one critical section spanning every generator,
/// so all generators observe the same order of events.
pub struct Synchronized {
    generators: Vec<Arc<dyn Generator>>,
    critical: Mutex<()>,
}

impl Synchronized {
    pub fn new(generators: Vec<Arc<dyn Generator>>) -> Self {
        Synchronized {
            generators,
            critical: Mutex::new(()),
        }
    }

    pub fn generators(&self) -> &[Arc<dyn Generator>] {
        &self.generators
    }

    /// Asks each generator in turn, last registered first, for an instruction for `client`.
    pub fn pull(&self, client: ClientId) -> Result<Pull> {
        let _guard = self.critical.lock();
        let mut exhausted = true;
        for (source, generator) in self.generators.iter().enumerate().rev() {
            match generator.next(client) {
                Ok(Next::Instruction(instruction)) => {
                    return Ok(Pull::Ready(Ready {
                        instruction,
                        source,
                    }))
                }
                Ok(Next::NotYet) => exhausted = false,
                Ok(Next::Exhausted) => {}
                Err(err) => {
                    error!(generator = %generator.name(), %client, %err, "Generator failed.");
                    return Err(err);
                }
            }
        }
        Ok(if exhausted { Pull::Exhausted } else { Pull::NotYet })
    }

    pub fn notify_call(&self, client: ClientId, instruction: &dyn Instruction) -> Result<()> {
        let _guard = self.critical.lock();
        for generator in &self.generators {
            if let Err(err) = generator.on_call(client, instruction) {
                error!(generator = %generator.name(), %client, %err, "OnCall failed.");
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn notify_return(
        &self,
        client: ClientId,
        instruction: &dyn Instruction,
        output: &Output,
    ) -> Result<()> {
        let _guard = self.critical.lock();
        for generator in &self.generators {
            if let Err(err) = generator.on_return(client, instruction, output) {
                error!(generator = %generator.name(), %client, %err, "OnReturn failed.");
                return Err(err);
            }
        }
        Ok(())
    }

    /// Runs a self-directed instruction on the generator that produced it. Runs outside
    /// the critical section so a slow fault injection does not stall other workers.
    pub fn invoke(&self, source: usize, instruction: &dyn Instruction) -> Output {
        match self.generators.get(source) {
            Some(generator) => generator.invoke(instruction),
            None => Output::unsupported(),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::kv::KvInstruction,
        std::{
            collections::HashSet,
            sync::atomic::{AtomicBool, AtomicI64, Ordering},
            thread,
        },
    };

    /// Fails the test if two threads are ever inside it at once.
    #[derive(Default)]
    struct Counter {
        busy: AtomicBool,
        next: AtomicI64,
        calls: AtomicI64,
        returns: AtomicI64,
    }

    impl Counter {
        fn enter(&self) {
            assert!(!self.busy.swap(true, Ordering::SeqCst), "overlapping access");
            thread::yield_now();
        }

        fn exit(&self) {
            self.busy.store(false, Ordering::SeqCst);
        }
    }

    impl Generator for Counter {
        fn name(&self) -> String {
            "Counter".into()
        }

        fn next(&self, _client: ClientId) -> Result<Next> {
            self.enter();
            let n = self.next.load(Ordering::SeqCst);
            self.next.store(n + 1, Ordering::SeqCst);
            self.exit();
            Ok(Next::Instruction(Arc::new(KvInstruction::set("k", n))))
        }

        fn on_call(&self, _client: ClientId, _instruction: &dyn Instruction) -> Result<()> {
            self.enter();
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.exit();
            Ok(())
        }

        fn on_return(&self, _client: ClientId, _instruction: &dyn Instruction, _output: &Output) -> Result<()> {
            self.enter();
            self.returns.fetch_add(1, Ordering::SeqCst);
            self.exit();
            Ok(())
        }
    }

    struct Done;

    impl Generator for Done {
        fn name(&self) -> String {
            "Done".into()
        }

        fn next(&self, _client: ClientId) -> Result<Next> {
            Ok(Next::Exhausted)
        }
    }

    #[test]
    fn hands_each_instruction_to_exactly_one_caller() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 250;
        let counter = Arc::new(Counter::default());
        let synchronized = Synchronized::new(vec![counter.clone(), Arc::new(Done)]);

        let values: Vec<i64> = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|t| {
                    let synchronized = &synchronized;
                    s.spawn(move || {
                        let client = ClientId::from(t);
                        let mut values = Vec::new();
                        while values.len() < PER_THREAD {
                            let Pull::Ready(ready) = synchronized.pull(client).unwrap() else {
                                panic!("counter never runs dry");
                            };
                            synchronized.notify_call(client, &*ready.instruction).unwrap();
                            synchronized
                                .notify_return(client, &*ready.instruction, &Output::nil())
                                .unwrap();
                            let set = ready.instruction.downcast_ref::<KvInstruction>().unwrap();
                            values.push(set.value().unwrap());
                        }
                        values
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        assert_eq!(values.len(), THREADS * PER_THREAD);
        assert_eq!(values.iter().collect::<HashSet<_>>().len(), THREADS * PER_THREAD);
        assert_eq!(counter.calls.load(Ordering::SeqCst), (THREADS * PER_THREAD) as i64);
        assert_eq!(counter.returns.load(Ordering::SeqCst), (THREADS * PER_THREAD) as i64);
    }

    #[test]
    fn exhausted_only_when_every_generator_is() {
        let synchronized = Synchronized::new(vec![Arc::new(Done), Arc::new(Done)]);
        assert!(matches!(synchronized.pull(ClientId::NONE), Ok(Pull::Exhausted)));

        let counter: Arc<dyn Generator> = Arc::new(Counter::default());
        let synchronized = Synchronized::new(vec![counter, Arc::new(Done)]);
        let Ok(Pull::Ready(ready)) = synchronized.pull(ClientId::from(0)) else {
            panic!("expected an instruction");
        };
        assert_eq!(ready.source, 0);
        assert_eq!(synchronized.invoke(7, &*ready.instruction), Output::unsupported());
    }
}
