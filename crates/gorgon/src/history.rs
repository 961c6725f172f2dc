use {
    crate::{ClientId, Instruction, Output},
    parking_lot::Mutex,
    std::{
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        time::Instant,
    },
};

/// The record of one dispatched instruction.
#[derive(Clone, Debug)]
pub struct Operation {
    pub client_id: ClientId,
    pub input: Arc<dyn Instruction>,
    pub call: u64,
    pub output: Output,
    /// `None` while the outcome is indeterminate. See [`reconcile`].
    pub ret: Option<u64>,
}

/// An operation ready for the checker: every timestamp is definite.
pub type CheckedOperation = consistency_model::Operation<Arc<dyn Instruction>, Output>;

/// An append-only log of operations with a strictly monotonic logical clock.
pub struct History {
    start: Instant,
    clock: AtomicU64,
    operations: Mutex<Vec<Operation>>,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    pub fn new() -> Self {
        History {
            start: Instant::now(),
            clock: AtomicU64::new(0),
            operations: Mutex::new(Vec::new()),
        }
    }

    /// Microseconds since the history was created, bumped to one past the previously
    /// issued value whenever the wall clock has not advanced. Values are unique across
    /// all threads.
    pub fn now(&self) -> u64 {
        let elapsed = self.start.elapsed().as_micros() as u64;
        let tick = |prev: u64| elapsed.max(prev + 1);
        match self
            .clock
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |prev| Some(tick(prev)))
        {
            Ok(prev) | Err(prev) => tick(prev),
        }
    }

    /// Empties the log and starts the clock over from now.
    pub fn restart(&mut self) {
        *self = History::new();
    }

    pub fn append(&self, operation: Operation) {
        self.operations.lock().push(operation);
    }

    /// Detaches every operation appended so far, oldest call first.
    pub fn extract(&self) -> Vec<Operation> {
        let mut operations = std::mem::take(&mut *self.operations.lock());
        operations.sort_by_key(|op| op.call);
        operations
    }

    pub fn len(&self) -> usize {
        self.operations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Assigns every indeterminate operation a return timestamp after all timestamps of the
/// history (`max + 1`, `max + 2`, ... in order), so the checker may treat it as still
/// pending at the end. Determinate operations pass through unchanged.
pub fn reconcile(operations: Vec<Operation>) -> Vec<CheckedOperation> {
    let max = operations
        .iter()
        .map(|op| op.ret.unwrap_or(op.call).max(op.call))
        .max()
        .unwrap_or(0);
    let mut next = max;
    operations
        .into_iter()
        .map(|op| CheckedOperation {
            client_id: op.client_id.into(),
            ret: op.ret.unwrap_or_else(|| {
                next += 1;
                next
            }),
            input: op.input,
            call: op.call,
            output: op.output,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::kv::KvInstruction,
        std::{collections::HashSet, thread},
    };

    fn op(call: u64, ret: Option<u64>) -> Operation {
        Operation {
            client_id: ClientId::from(0),
            input: Arc::new(KvInstruction::get("k")),
            call,
            output: if ret.is_some() {
                Output::nil()
            } else {
                Output::ambiguous("timeout")
            },
            ret,
        }
    }

    #[test]
    fn clock_is_strictly_increasing_across_threads() {
        let history = History::new();
        let per_thread: Vec<Vec<u64>> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| (0..1000).map(|_| history.now()).collect::<Vec<_>>()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for values in &per_thread {
            assert!(values.windows(2).all(|w| w[0] < w[1]));
        }
        let all: HashSet<u64> = per_thread.iter().flatten().copied().collect();
        assert_eq!(all.len(), 8000);
    }

    #[test]
    fn restart_rewinds_the_clock() {
        let mut history = History::new();
        history.append(op(1, Some(2)));
        thread::sleep(std::time::Duration::from_millis(50));
        assert!(history.now() >= 50_000);
        history.restart();
        assert!(history.is_empty());
        assert!(history.now() < 50_000);
    }

    #[test]
    fn extract_returns_call_order_and_resets() {
        let history = History::new();
        history.append(op(5, Some(6)));
        history.append(op(1, Some(9)));
        history.append(op(3, Some(4)));
        let calls: Vec<_> = history.extract().iter().map(|op| op.call).collect();
        assert_eq!(calls, vec![1, 3, 5]);
        assert!(history.is_empty());
        assert!(history.extract().is_empty());
    }

    #[test]
    fn reconcile_is_identity_for_determinate_histories() {
        let operations = vec![op(1, Some(2)), op(3, Some(7)), op(4, Some(5))];
        let reconciled = reconcile(operations.clone());
        for (before, after) in operations.iter().zip(&reconciled) {
            assert_eq!(before.call, after.call);
            assert_eq!(before.ret, Some(after.ret));
        }
    }

    #[test]
    fn reconcile_places_indeterminate_operations_last_in_order() {
        let operations = vec![op(1, None), op(2, Some(10)), op(3, None), op(4, Some(6))];
        let reconciled = reconcile(operations);
        let rets: Vec<_> = reconciled.iter().map(|op| op.ret).collect();
        assert_eq!(rets, vec![11, 10, 12, 6]);
        assert!(reconciled[0].output.is_indeterminate());
    }
}
