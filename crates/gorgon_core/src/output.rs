use std::fmt::{Display, Formatter};

const MAX_DESCRIBED_ERROR_CHARS: usize = 30;

/// A value returned by the system under test.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Nil,
    Int(i64),
    Text(String),
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Int(n) => Display::fmt(n, f),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// Whether an invocation took effect on the system under test.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum Effect {
    Applied,
    /// The system under test guarantees the invocation had no effect.
    NotApplied,
    /// The effect cannot be determined, e.g. after a timeout.
    Unknown,
}

/// The outcome of one invocation.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Output {
    pub result: Result<Value, String>,
    pub effect: Effect,
}

impl Output {
    pub fn ok(value: Value) -> Self {
        Output {
            result: Ok(value),
            effect: Effect::Applied,
        }
    }

    pub fn nil() -> Self {
        Output::ok(Value::Nil)
    }

    /// An error that the system under test guarantees had no effect.
    pub fn rejected(message: impl Into<String>) -> Self {
        Output {
            result: Err(message.into()),
            effect: Effect::NotApplied,
        }
    }

    /// An error whose effect is unknown.
    pub fn ambiguous(message: impl Into<String>) -> Self {
        Output {
            result: Err(message.into()),
            effect: Effect::Unknown,
        }
    }

    pub fn unsupported() -> Self {
        Output::rejected("gorgon: unsupported instruction")
    }

    pub fn is_indeterminate(&self) -> bool {
        self.effect == Effect::Unknown
    }

    pub fn value(&self) -> Option<&Value> {
        self.result.as_ref().ok()
    }
}

impl Display for Output {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.result {
            Ok(value) => Display::fmt(value, f),
            Err(message) if message.chars().count() > MAX_DESCRIBED_ERROR_CHARS => {
                let mut truncated: String =
                    message.chars().take(MAX_DESCRIBED_ERROR_CHARS).collect();
                truncated.push('…');
                write!(f, "error:{truncated:?}")
            }
            Err(message) => write!(f, "error:{message:?}"),
        }
    }
}
