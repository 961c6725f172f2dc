//! This library provides code to define and verify the correctness of
//! an object or system based on how it responds to a collection of potentially
//! concurrent (i.e. partially ordered) operations.
//!
//! # Defining Correctness Via A Nondeterministic Model
//!
//! [`Model`] is a trait for defining correctness via an abstract state machine
//! (e.g. "*this system should behave like a map from keys to integers*"). Unlike a
//! deterministic reference implementation, the step function returns the *set* of
//! states that are consistent with an observed output, which allows a model to express
//! uncertainty such as "this write may or may not have taken effect". An empty set means
//! the output is impossible from that state.
//!
//! # Verifying Histories
//!
//! A recorded history of [`Operation`]s (each with an invocation and a return timestamp)
//! can be checked for [linearizability] with [`check_operations`]. Histories are usually
//! split into independent partitions first via [`Model::partition`] (see [`partition_by`]),
//! since checking cost is exponential in the number of concurrent operations. When the
//! verdict is not [`CheckResult::Ok`], [`visualize_path`] renders the returned
//! [`LinearizationInfo`] as a standalone HTML page.
//!
//! # Additional Reading
//!
//! - ["Testing for Linearizability"](https://www.cs.ox.ac.uk/people/gavin.lowe/LinearizabiltyTesting/)
//!   by Lowe
//! - ["Faster linearizability checking via P-compositionality"](https://arxiv.org/abs/1504.00204)
//!   by Horn and Kroening
//!
//! [linearizability]: https://en.wikipedia.org/wiki/Linearizability

#![deny(unused_must_use)]
#![warn(rust_2018_idioms, unreachable_pub)]

mod linearizability;
mod visualize;

pub use linearizability::{
    check_operations, CheckResult, DescribedOperation, LinearizationInfo, LinearizationStep,
};
pub use visualize::{visualize, visualize_path};

use std::{collections::BTreeMap, fmt::Debug};

/// One completed operation: who invoked it, what it was, when it was invoked, what it
/// returned, and when it returned. Timestamps share one total order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Operation<I, O> {
    pub client_id: usize,
    pub input: I,
    pub call: u64,
    pub output: O,
    pub ret: u64,
}

/// A nondeterministic abstract state machine against which a history is checked.
pub trait Model {
    type State: Clone + Debug + PartialEq;
    type Input;
    type Output;

    /// The legal starting states.
    fn init(&self) -> Vec<Self::State>;

    /// The states consistent with observing `output` after applying `input` to `state`.
    /// Returns an empty vector if the output is impossible from `state`.
    fn step(
        &self,
        state: &Self::State,
        input: &Self::Input,
        output: &Self::Output,
    ) -> Vec<Self::State>;

    /// Used to deduplicate states. Defaults to [`PartialEq`].
    fn equal(&self, a: &Self::State, b: &Self::State) -> bool {
        a == b
    }

    /// Splits a history into sub-histories that can be checked independently.
    fn partition(
        &self,
        history: Vec<Operation<Self::Input, Self::Output>>,
    ) -> Vec<Vec<Operation<Self::Input, Self::Output>>> {
        vec![history]
    }

    fn describe_operation(&self, input: &Self::Input, output: &Self::Output) -> String;

    fn describe_state(&self, state: &Self::State) -> String {
        format!("{state:?}")
    }
}

/// Groups operations by key in ascending key order. Operations without a key are dropped,
/// since they cannot affect any keyed sub-model.
pub fn partition_by<I, O, K: Ord>(
    history: Vec<Operation<I, O>>,
    key: impl Fn(&Operation<I, O>) -> Option<K>,
) -> Vec<Vec<Operation<I, O>>> {
    let mut partitions = BTreeMap::<K, Vec<Operation<I, O>>>::new();
    for op in history {
        if let Some(k) = key(&op) {
            partitions.entry(k).or_default().push(op);
        }
    }
    partitions.into_values().collect()
}
