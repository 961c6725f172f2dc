use {
    super::KvInstruction,
    crate::{Client, ClientId, Database, Error, Instruction, Options, Output, Result, Value},
    parking_lot::Mutex,
    std::{collections::HashMap, sync::Arc},
    tracing::debug,
};

struct Cell {
    previous: Option<i64>,
    current: i64,
}

type Store = Arc<Mutex<HashMap<String, Cell>>>;

/// An in-process key-value store. The default store is linearizable. The stale store
/// answers every read with the value before the latest write.
#[derive(Default)]
pub struct MemoryDatabase {
    store: Store,
    stale: bool,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stale() -> Self {
        MemoryDatabase {
            store: Store::default(),
            stale: true,
        }
    }
}

impl Database for MemoryDatabase {
    fn name(&self) -> String {
        if self.stale {
            "StaleMemory".into()
        } else {
            "Memory".into()
        }
    }

    fn set_up(&self, _options: &Options) -> Result<()> {
        self.store.lock().clear();
        Ok(())
    }

    fn new_client(&self, id: ClientId) -> Result<Box<dyn Client>> {
        Ok(Box::new(MemoryClient {
            id,
            store: self.store.clone(),
            stale: self.stale,
            open: false,
        }))
    }

    fn tear_down(&self) -> Result<()> {
        debug!(keys = self.store.lock().len(), "Memory store dropped.");
        self.store.lock().clear();
        Ok(())
    }
}

pub struct MemoryClient {
    id: ClientId,
    store: Store,
    stale: bool,
    open: bool,
}

impl Client for MemoryClient {
    fn id(&self) -> ClientId {
        self.id
    }

    fn open(&mut self, _config: &str) -> Result<()> {
        if self.open {
            return Err(Error::Client {
                client: self.id,
                message: "already open".into(),
            });
        }
        self.open = true;
        Ok(())
    }

    fn invoke(&mut self, instruction: &dyn Instruction) -> Output {
        if !self.open {
            return Output::rejected("client is not open");
        }
        let Some(instruction) = instruction.downcast_ref::<KvInstruction>() else {
            return Output::unsupported();
        };
        let mut store = self.store.lock();
        match instruction {
            KvInstruction::Get { key } => {
                let read = store.get(key).and_then(|cell| {
                    if self.stale {
                        cell.previous
                    } else {
                        Some(cell.current)
                    }
                });
                Output::ok(read.map_or(Value::Nil, Value::Int))
            }
            KvInstruction::Set { key, value } => {
                match store.get_mut(key) {
                    Some(cell) => {
                        cell.previous = Some(cell.current);
                        cell.current = *value;
                    }
                    None => {
                        let cell = Cell {
                            previous: None,
                            current: *value,
                        };
                        store.insert(key.clone(), cell);
                    }
                }
                Output::nil()
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}
