use {
    super::KvInstruction,
    crate::{ClientId, Fault, Generator, Instruction, Next, Options, Output, Result},
    parking_lot::Mutex,
    std::sync::Arc,
    tracing::info,
};

#[derive(Default)]
struct State {
    /// The one client allowed to write, if a kill or an ambiguous write has been seen.
    writer: Option<usize>,
    key: usize,
    last_value: i64,
}

/// Writes decreasing values over every key, one pass at a time, from a single client once
/// a process has been killed. Whenever the writer's set comes back ambiguous, writing
/// moves on to the next odd client, so each client stops at its first uncertain write.
pub struct SetAfterKillGenerator {
    keys: Vec<String>,
    state: Mutex<State>,
}

impl SetAfterKillGenerator {
    pub fn new(keys: Vec<String>) -> Self {
        SetAfterKillGenerator {
            keys,
            state: Mutex::new(State::default()),
        }
    }

    /// The client currently allowed to write.
    pub fn writer(&self) -> Option<ClientId> {
        self.state.lock().writer.map(ClientId::from)
    }
}

impl Generator for SetAfterKillGenerator {
    fn name(&self) -> String {
        "SetAfterKill".into()
    }

    fn set_up(&self, _options: &Options) -> Result<()> {
        *self.state.lock() = State::default();
        Ok(())
    }

    fn next(&self, client: ClientId) -> Result<Next> {
        let Some(index) = client.index() else {
            return Ok(Next::Exhausted);
        };
        let mut state = self.state.lock();
        if state.writer != Some(index) {
            return Ok(Next::NotYet);
        }
        let Some(key) = self.keys.get(state.key) else {
            state.key = 0;
            return Ok(Next::NotYet);
        };
        state.key += 1;
        state.last_value -= 1;
        Ok(Next::Instruction(Arc::new(KvInstruction::set(key.clone(), state.last_value))))
    }

    fn on_call(&self, _client: ClientId, instruction: &dyn Instruction) -> Result<()> {
        if let Some(Fault::Kill { node }) = instruction.fault() {
            let mut state = self.state.lock();
            if state.writer.is_none() {
                info!(%node, "Writing after kill.");
                state.writer = Some(1);
            }
        }
        Ok(())
    }

    fn on_return(&self, client: ClientId, instruction: &dyn Instruction, output: &Output) -> Result<()> {
        let is_set = matches!(
            instruction.downcast_ref::<KvInstruction>(),
            Some(KvInstruction::Set { .. })
        );
        if !is_set || !output.is_indeterminate() {
            return Ok(());
        }
        let mut state = self.state.lock();
        match state.writer {
            None => state.writer = Some(1),
            Some(writer) if client.index() == Some(writer) => {
                state.writer = Some(writer + 2);
                info!(%client, next = writer + 2, "Ambiguous write. Handing off.");
            }
            Some(_) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{kv::default_keys, nemeses::KillInstruction},
    };

    fn kill() -> KillInstruction {
        KillInstruction {
            node: "n1".into(),
            process: "memcached".into(),
            signal: 9,
        }
    }

    fn set(generator: &SetAfterKillGenerator, client: usize) -> (String, i64) {
        match generator.next(ClientId::from(client)).unwrap() {
            Next::Instruction(instruction) => {
                let set = instruction.downcast_ref::<KvInstruction>().unwrap();
                (set.key().to_string(), set.value().unwrap())
            }
            other => panic!("expected a set, got {other:?}"),
        }
    }

    #[test]
    fn idle_until_a_kill() {
        let generator = SetAfterKillGenerator::new(default_keys(8));
        generator.set_up(&Options::default()).unwrap();
        for client in 0..4 {
            assert!(matches!(generator.next(ClientId::from(client)), Ok(Next::NotYet)));
        }
        assert!(matches!(generator.next(ClientId::NONE), Ok(Next::Exhausted)));

        generator.on_call(ClientId::NONE, &kill()).unwrap();
        assert_eq!(generator.writer(), Some(ClientId::from(1)));
        assert!(matches!(generator.next(ClientId::from(0)), Ok(Next::NotYet)));
        assert_eq!(set(&generator, 1), ("key0".to_string(), -1));
    }

    #[test]
    fn passes_over_keys_with_decreasing_values() {
        let generator = SetAfterKillGenerator::new(default_keys(3));
        generator.on_call(ClientId::NONE, &kill()).unwrap();
        let first: Vec<_> = (0..3).map(|_| set(&generator, 1)).collect();
        assert_eq!(
            first,
            vec![("key0".into(), -1), ("key1".into(), -2), ("key2".into(), -3)]
        );
        assert!(matches!(generator.next(ClientId::from(1)), Ok(Next::NotYet)));
        assert_eq!(set(&generator, 1), ("key0".to_string(), -4));
    }

    #[test]
    fn ambiguous_write_hands_off_to_the_next_odd_client() {
        let generator = SetAfterKillGenerator::new(default_keys(8));
        generator.on_call(ClientId::NONE, &kill()).unwrap();
        let write = KvInstruction::set("key0", -1);

        // Other clients' outcomes and determinate failures leave the writer alone.
        generator
            .on_return(ClientId::from(3), &write, &Output::ambiguous("timeout"))
            .unwrap();
        generator
            .on_return(ClientId::from(1), &write, &Output::rejected("busy"))
            .unwrap();
        generator
            .on_return(ClientId::from(1), &KvInstruction::get("key0"), &Output::ambiguous("timeout"))
            .unwrap();
        assert_eq!(generator.writer(), Some(ClientId::from(1)));

        generator
            .on_return(ClientId::from(1), &write, &Output::ambiguous("timeout"))
            .unwrap();
        assert_eq!(generator.writer(), Some(ClientId::from(3)));
        assert!(matches!(generator.next(ClientId::from(1)), Ok(Next::NotYet)));
        assert_eq!(set(&generator, 3).0, "key0");

        // A later kill does not take writing back.
        generator.on_call(ClientId::NONE, &kill()).unwrap();
        assert_eq!(generator.writer(), Some(ClientId::from(3)));
    }

    #[test]
    fn ambiguous_write_before_a_kill_starts_writing() {
        let generator = SetAfterKillGenerator::new(default_keys(8));
        generator
            .on_return(ClientId::from(0), &KvInstruction::set("key0", 1), &Output::ambiguous("timeout"))
            .unwrap();
        assert_eq!(generator.writer(), Some(ClientId::from(1)));
        generator.set_up(&Options::default()).unwrap();
        assert_eq!(generator.writer(), None);
    }
}
