use {
    crate::Instruction,
    serde::{Deserialize, Serialize},
    std::fmt::{self, Display, Formatter},
};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum KvInstruction {
    Get { key: String },
    Set { key: String, value: i64 },
}

impl KvInstruction {
    pub const KIND: &'static str = "Kv";

    pub fn get(key: impl Into<String>) -> Self {
        KvInstruction::Get { key: key.into() }
    }

    pub fn set(key: impl Into<String>, value: i64) -> Self {
        KvInstruction::Set {
            key: key.into(),
            value,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            KvInstruction::Get { key } | KvInstruction::Set { key, .. } => key,
        }
    }

    /// The value written, for a set.
    pub fn value(&self) -> Option<i64> {
        match self {
            KvInstruction::Get { .. } => None,
            KvInstruction::Set { value, .. } => Some(*value),
        }
    }
}

impl Display for KvInstruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            KvInstruction::Get { key } => write!(f, "Get({key:?})"),
            KvInstruction::Set { key, value } => write!(f, "Set({key:?}, {value})"),
        }
    }
}

impl Instruction for KvInstruction {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn partition_key(&self) -> Option<&str> {
        Some(self.key())
    }

    fn encode(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self).ok()
    }
}
