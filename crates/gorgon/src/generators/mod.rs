//! Generator combinators.

mod limit;
mod stagger;
mod synchronize;

pub use {
    limit::Limit,
    stagger::Stagger,
    synchronize::{Pull, Ready, Synchronized},
};
