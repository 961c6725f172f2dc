use {
    crate::{Model, Operation},
    serde::Serialize,
    std::{
        collections::HashMap,
        time::{Duration, Instant},
    },
    tracing::debug,
};

/// How often (in search iterations) the deadline is consulted.
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

/// The verdict for one history.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum CheckResult {
    Ok,
    Illegal,
    /// The search did not finish before the timeout.
    Unknown,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct DescribedOperation {
    pub client_id: usize,
    pub call: u64,
    pub ret: u64,
    pub description: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LinearizationStep {
    /// Index into [`LinearizationInfo::operations`].
    pub index: usize,
    /// The model state(s) after applying the operation.
    pub state: String,
}

/// Diagnostic state for rendering a checked history.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct LinearizationInfo {
    pub operations: Vec<DescribedOperation>,
    /// The longest prefix of a sequential ordering found by the search. Covers every
    /// operation when the verdict is [`CheckResult::Ok`].
    pub longest: Vec<LinearizationStep>,
}

#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
struct Bitset(Vec<u64>);

impl Bitset {
    fn new(bits: usize) -> Self {
        Bitset(vec![0; (bits + 63) / 64])
    }

    fn set(&mut self, bit: usize) {
        self.0[bit / 64] |= 1 << (bit % 64);
    }

    fn clear(&mut self, bit: usize) {
        self.0[bit / 64] &= !(1 << (bit % 64));
    }
}

// Entries of the doubly linked list of call/return events. Index 0 is the head sentinel.
struct Node {
    op: usize,
    is_call: bool,
    matching: usize,
    prev: usize,
    next: Option<usize>,
}

fn build_list<I, O>(history: &[Operation<I, O>]) -> Vec<Node> {
    let mut events: Vec<(u64, bool, usize)> = history
        .iter()
        .enumerate()
        .flat_map(|(i, op)| [(op.call, true, i), (op.ret, false, i)])
        .collect();
    // Calls sort before returns that share a timestamp.
    events.sort_by_key(|&(time, is_call, i)| (time, !is_call, i));

    let mut nodes = Vec::with_capacity(events.len() + 1);
    nodes.push(Node {
        op: usize::MAX,
        is_call: false,
        matching: 0,
        prev: 0,
        next: None,
    });
    let mut return_node = vec![0; history.len()];
    for (time_index, &(_, is_call, op)) in events.iter().enumerate() {
        let index = time_index + 1;
        nodes[index - 1].next = Some(index);
        nodes.push(Node {
            op,
            is_call,
            matching: 0,
            prev: index - 1,
            next: None,
        });
        if !is_call {
            return_node[op] = index;
        }
    }
    for node in nodes.iter_mut().skip(1) {
        if node.is_call {
            node.matching = return_node[node.op];
        }
    }
    nodes
}

fn unlink(nodes: &mut [Node], i: usize) {
    let (prev, next) = (nodes[i].prev, nodes[i].next);
    nodes[prev].next = next;
    if let Some(next) = next {
        nodes[next].prev = prev;
    }
}

fn relink(nodes: &mut [Node], i: usize) {
    let (prev, next) = (nodes[i].prev, nodes[i].next);
    nodes[prev].next = Some(i);
    if let Some(next) = next {
        nodes[next].prev = i;
    }
}

fn lift(nodes: &mut [Node], call: usize) {
    unlink(nodes, call);
    unlink(nodes, nodes[call].matching);
}

fn unlift(nodes: &mut [Node], call: usize) {
    relink(nodes, nodes[call].matching);
    relink(nodes, call);
}

fn successors<M: Model>(
    model: &M,
    states: &[M::State],
    input: &M::Input,
    output: &M::Output,
) -> Vec<M::State> {
    let mut next = Vec::<M::State>::new();
    for state in states {
        for candidate in model.step(state, input, output) {
            if !next.iter().any(|s| model.equal(s, &candidate)) {
                next.push(candidate);
            }
        }
    }
    next
}

fn same_set<M: Model>(model: &M, a: &[M::State], b: &[M::State]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| model.equal(x, y)))
}

fn describe_states<M: Model>(model: &M, states: &[M::State]) -> String {
    states
        .iter()
        .map(|s| model.describe_state(s))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Decides whether `history` is linearizable with respect to `model`.
///
/// The search explores sequential orderings consistent with real-time order, tracking the
/// set of possible model states at each point and memoizing visited (linearized set,
/// state set) pairs. A zero `timeout` means no limit.
pub fn check_operations<M: Model>(
    model: &M,
    history: &[Operation<M::Input, M::Output>],
    timeout: Duration,
) -> (CheckResult, LinearizationInfo) {
    let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
    let mut nodes = build_list(history);

    let mut init = Vec::<M::State>::new();
    for state in model.init() {
        if !init.iter().any(|s| model.equal(s, &state)) {
            init.push(state);
        }
    }

    let mut states = init.clone();
    let mut linearized = Bitset::new(history.len());
    let mut cache = HashMap::<Bitset, Vec<Vec<M::State>>>::new();
    let mut calls = Vec::<(usize, Vec<M::State>)>::new();
    let mut longest = Vec::<usize>::new();
    let mut iterations = 0u64;
    let mut entry = nodes[0].next;

    let verdict = loop {
        let Some(e) = entry else {
            break CheckResult::Ok;
        };
        iterations += 1;
        if iterations % DEADLINE_CHECK_INTERVAL == 0 {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    break CheckResult::Unknown;
                }
            }
        }

        let (op_index, is_call) = (nodes[e].op, nodes[e].is_call);
        if is_call {
            let op = &history[op_index];
            let next_states = successors(model, &states, &op.input, &op.output);
            if !next_states.is_empty() {
                let mut next_linearized = linearized.clone();
                next_linearized.set(op_index);
                let seen = cache.get(&next_linearized).map_or(false, |prior| {
                    prior.iter().any(|p| same_set(model, p, &next_states))
                });
                if !seen {
                    cache
                        .entry(next_linearized.clone())
                        .or_default()
                        .push(next_states.clone());
                    calls.push((e, std::mem::replace(&mut states, next_states)));
                    linearized = next_linearized;
                    lift(&mut nodes, e);
                    if calls.len() > longest.len() {
                        longest = calls.iter().map(|&(n, _)| nodes[n].op).collect();
                    }
                    entry = nodes[0].next;
                    continue;
                }
            }
            entry = nodes[e].next;
        } else {
            // A return was reached before its call could be linearized: backtrack.
            let Some((call, prior)) = calls.pop() else {
                break CheckResult::Illegal;
            };
            linearized.clear(nodes[call].op);
            states = prior;
            unlift(&mut nodes, call);
            entry = nodes[call].next;
        }
    };
    debug!(?verdict, operations = history.len(), iterations, "Checked history.");

    let operations = history
        .iter()
        .map(|op| DescribedOperation {
            client_id: op.client_id,
            call: op.call,
            ret: op.ret,
            description: model.describe_operation(&op.input, &op.output),
        })
        .collect();
    let mut states = init;
    let longest = longest
        .into_iter()
        .map(|index| {
            let op = &history[index];
            states = successors(model, &states, &op.input, &op.output);
            LinearizationStep {
                index,
                state: describe_states(model, &states),
            }
        })
        .collect();
    (verdict, LinearizationInfo { operations, longest })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A register whose writes may time out, in which case they may or may not apply.
    struct Register;

    #[derive(Clone, Debug)]
    enum Input {
        Read,
        Write(u8),
    }

    #[derive(Clone, Debug)]
    enum Output {
        Value(u8),
        Ok,
        Timeout,
    }

    impl Model for Register {
        type State = u8;
        type Input = Input;
        type Output = Output;

        fn init(&self) -> Vec<u8> {
            vec![0]
        }

        fn step(&self, state: &u8, input: &Input, output: &Output) -> Vec<u8> {
            match (input, output) {
                (Input::Read, Output::Value(v)) if v == state => vec![*state],
                (Input::Write(v), Output::Ok) => vec![*v],
                (Input::Write(v), Output::Timeout) => vec![*state, *v],
                _ => vec![],
            }
        }

        fn describe_operation(&self, input: &Input, output: &Output) -> String {
            format!("{input:?} → {output:?}")
        }
    }

    fn op(client_id: usize, input: Input, call: u64, output: Output, ret: u64) -> Operation<Input, Output> {
        Operation {
            client_id,
            input,
            call,
            output,
            ret,
        }
    }

    #[test]
    fn accepts_concurrent_read_of_either_value() {
        let history = vec![
            op(0, Input::Write(1), 0, Output::Ok, 10),
            op(1, Input::Read, 1, Output::Value(1), 2),
            op(2, Input::Read, 3, Output::Value(1), 11),
        ];
        let (verdict, info) = check_operations(&Register, &history, Duration::ZERO);
        assert_eq!(verdict, CheckResult::Ok);
        assert_eq!(info.longest.len(), 3);
        assert_eq!(info.longest[0].index, 0);
    }

    #[test]
    fn rejects_stale_read_after_completed_write() {
        let history = vec![
            op(0, Input::Write(1), 0, Output::Ok, 1),
            op(1, Input::Read, 2, Output::Value(0), 3),
        ];
        let (verdict, info) = check_operations(&Register, &history, Duration::ZERO);
        assert_eq!(verdict, CheckResult::Illegal);
        assert_eq!(info.longest.len(), 1);
        assert_eq!(info.longest[0].state, "1");
        assert_eq!(info.operations[1].description, "Read → Value(0)");
    }

    #[test]
    fn rejects_values_that_flip_back() {
        let history = vec![
            op(0, Input::Write(1), 0, Output::Ok, 100),
            op(1, Input::Read, 1, Output::Value(1), 2),
            op(1, Input::Read, 3, Output::Value(0), 4),
        ];
        let (verdict, _) = check_operations(&Register, &history, Duration::ZERO);
        assert_eq!(verdict, CheckResult::Illegal);
    }

    #[test]
    fn timed_out_write_may_or_may_not_apply() {
        let applied = vec![
            op(0, Input::Write(1), 0, Output::Timeout, 100),
            op(1, Input::Read, 1, Output::Value(0), 2),
            op(1, Input::Read, 3, Output::Value(1), 4),
        ];
        assert_eq!(check_operations(&Register, &applied, Duration::ZERO).0, CheckResult::Ok);

        let not_applied = vec![
            op(0, Input::Write(1), 0, Output::Timeout, 1),
            op(1, Input::Read, 2, Output::Value(0), 3),
        ];
        assert_eq!(
            check_operations(&Register, &not_applied, Duration::ZERO).0,
            CheckResult::Ok
        );
    }

    #[test]
    fn empty_history_is_linearizable() {
        let (verdict, info) = check_operations(&Register, &[], Duration::from_secs(1));
        assert_eq!(verdict, CheckResult::Ok);
        assert!(info.operations.is_empty());
    }

    #[test]
    fn times_out_as_unknown() {
        // Many overlapping writes followed by an impossible read force an exhaustive search.
        let mut history: Vec<_> = (0..24u8)
            .map(|i| op(i as usize, Input::Write(i), 0, Output::Ok, 1000))
            .collect();
        history.push(op(99, Input::Read, 1001, Output::Value(200), 1002));
        let (verdict, _) = check_operations(&Register, &history, Duration::from_nanos(1));
        assert_eq!(verdict, CheckResult::Unknown);
    }
}
