use {
    super::KvInstruction,
    crate::{ClientId, Error, Generator, Next, Result, SplitMix64},
    parking_lot::Mutex,
    rand::Rng,
    std::sync::Arc,
};

struct State {
    rng: SplitMix64,
    last_value: i64,
}

/// Random single-key reads and writes. Odd clients only read. Even clients read or write
/// with equal probability, writing values that increase across the whole run so every
/// write is distinguishable.
pub struct GetSetGenerator {
    keys: Vec<String>,
    state: Mutex<State>,
}

impl GetSetGenerator {
    pub fn new(keys: Vec<String>, rng: SplitMix64) -> Self {
        GetSetGenerator {
            keys,
            state: Mutex::new(State { rng, last_value: 0 }),
        }
    }
}

impl Generator for GetSetGenerator {
    fn name(&self) -> String {
        "GetSet".into()
    }

    fn next(&self, client: ClientId) -> Result<Next> {
        let Some(index) = client.index() else {
            return Ok(Next::Exhausted);
        };
        if self.keys.is_empty() {
            return Err(Error::generator(self.name(), "no keys"));
        }
        let mut state = self.state.lock();
        let key = self.keys[state.rng.gen_range(0..self.keys.len())].clone();
        let instruction = if index % 2 == 1 || state.rng.gen::<bool>() {
            KvInstruction::get(key)
        } else {
            state.last_value += 1;
            KvInstruction::set(key, state.last_value)
        };
        Ok(Next::Instruction(Arc::new(instruction)))
    }
}
