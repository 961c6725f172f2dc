//! This module specifies the core types for the Gorgon test harness: the open
//! [`Instruction`] capability, the [`Generator`] protocol shared by workloads and nemeses,
//! the [`Client`] and [`Database`] contracts for a system under test, and run [`Options`].
//!
//! # Usage
//!
//! Please see the `gorgon` crate, which runs scenarios built from these types.

#![deny(unused_must_use)]
#![warn(rust_2018_idioms, unreachable_pub)]

mod error;
mod id;
mod instruction;
mod options;
mod output;
mod splitmix;

pub use error::{Error, Result};
pub use id::ClientId;
pub use instruction::{AsAny, Fault, Instruction};
pub use options::Options;
pub use output::{Effect, Output, Value};
pub use splitmix::SplitMix64;

use std::sync::Arc;

/// The answer to a [`Generator::next`] request.
#[derive(Clone, Debug)]
pub enum Next {
    Instruction(Arc<dyn Instruction>),
    /// Nothing to do right now. The caller retries after a short delay.
    NotYet,
    /// Nothing more will ever be produced for the requesting client.
    Exhausted,
}

/// Produces instructions on demand. Workload generators, nemeses, and combinators all
/// implement this.
///
/// Methods take `&self` because a generator is shared by every worker of a scenario.
/// The runner serializes `next`, `on_call`, and `on_return` across all generators of a
/// scenario, so implementations only need interior mutability, not fine-grained locking.
pub trait Generator: Send + Sync {
    fn name(&self) -> String;

    fn set_up(&self, _options: &Options) -> Result<()> {
        Ok(())
    }

    /// Pulls the next instruction for `client`, which is [`ClientId::NONE`] for the
    /// thread that serves self-directed instructions.
    fn next(&self, client: ClientId) -> Result<Next>;

    /// Executes a self-directed instruction that this generator produced.
    fn invoke(&self, _instruction: &dyn Instruction) -> Output {
        Output::unsupported()
    }

    /// Fired before every dispatch, including instructions from other generators.
    fn on_call(&self, _client: ClientId, _instruction: &dyn Instruction) -> Result<()> {
        Ok(())
    }

    /// Fired after every dispatch, including instructions from other generators.
    fn on_return(
        &self,
        _client: ClientId,
        _instruction: &dyn Instruction,
        _output: &Output,
    ) -> Result<()> {
        Ok(())
    }

    fn tear_down(&self) -> Result<()> {
        Ok(())
    }
}

impl<G: Generator + ?Sized> Generator for Arc<G> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn set_up(&self, options: &Options) -> Result<()> {
        (**self).set_up(options)
    }

    fn next(&self, client: ClientId) -> Result<Next> {
        (**self).next(client)
    }

    fn invoke(&self, instruction: &dyn Instruction) -> Output {
        (**self).invoke(instruction)
    }

    fn on_call(&self, client: ClientId, instruction: &dyn Instruction) -> Result<()> {
        (**self).on_call(client, instruction)
    }

    fn on_return(&self, client: ClientId, instruction: &dyn Instruction, output: &Output) -> Result<()> {
        (**self).on_return(client, instruction, output)
    }

    fn tear_down(&self) -> Result<()> {
        (**self).tear_down()
    }
}

/// One session against the system under test. Owned by exactly one worker thread.
pub trait Client: Send {
    fn id(&self) -> ClientId;

    fn open(&mut self, config: &str) -> Result<()>;

    /// Executes an instruction. Failures are reported through the [`Output`], with an
    /// [`Effect`] stating whether the system under test may have applied it.
    fn invoke(&mut self, instruction: &dyn Instruction) -> Output;

    fn close(&mut self) -> Result<()>;
}

/// The system under test.
pub trait Database: Send + Sync {
    fn name(&self) -> String;

    fn set_up(&self, _options: &Options) -> Result<()> {
        Ok(())
    }

    fn new_client(&self, id: ClientId) -> Result<Box<dyn Client>>;

    /// Passed to [`Client::open`].
    fn client_config(&self) -> String {
        String::new()
    }

    fn tear_down(&self) -> Result<()> {
        Ok(())
    }
}
