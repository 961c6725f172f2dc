use std::{
    any::Any,
    fmt::{Debug, Display},
};

/// Enables downcasting through `dyn Instruction`. Implemented for every `'static` type.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A fault event that an instruction represents, observable by generators through
/// [`Generator::on_return`](crate::Generator::on_return).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Fault {
    PartitionBegin { node: String },
    Heal,
    Kill { node: String },
}

/// One immutable unit of work. New kinds are added by implementing this trait.
///
/// [`Display`] is the human-readable description used in logs and visualizations.
pub trait Instruction: AsAny + Debug + Display + Send + Sync {
    /// A stable name for this kind of instruction, used to decode it on a remote agent.
    fn kind(&self) -> &'static str;

    /// Whether the generator that produced this instruction executes it, rather than a
    /// client of the system under test.
    fn is_self_directed(&self) -> bool {
        false
    }

    /// The key of the independent sub-history this instruction belongs to, if any.
    fn partition_key(&self) -> Option<&str> {
        None
    }

    fn fault(&self) -> Option<Fault> {
        None
    }

    /// A JSON encoding for shipping this instruction to a remote agent, if supported.
    fn encode(&self) -> Option<serde_json::Value> {
        None
    }
}

impl<'a> dyn Instruction + 'a {
    pub fn downcast_ref<T: Instruction + 'static>(&self) -> Option<&T> {
        AsAny::as_any(self).downcast_ref()
    }

    pub fn is<T: Instruction + 'static>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }
}
