use std::fmt::{Debug, Display, Formatter};

/// Identifies a client session. [`ClientId::NONE`] is reserved for self-directed
/// instructions that no client executes.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ClientId(usize);

impl ClientId {
    pub const NONE: ClientId = ClientId(usize::MAX);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// The zero-based index, if this is a real client.
    pub fn index(self) -> Option<usize> {
        (!self.is_none()).then_some(self.0)
    }
}

impl Debug for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            f.write_str(":none")
        } else {
            f.write_str(":")?;
            Display::fmt(&self.0, f)
        }
    }
}

impl From<usize> for ClientId {
    fn from(n: usize) -> Self {
        ClientId(n)
    }
}

impl From<ClientId> for usize {
    fn from(id: ClientId) -> Self {
        id.0
    }
}

// On the wire, the reserved id is -1.
impl<'de> serde::Deserialize<'de> for ClientId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let n = i64::deserialize(deserializer)?;
        if n < 0 {
            Ok(ClientId::NONE)
        } else {
            usize::try_from(n)
                .map(ClientId)
                .map_err(serde::de::Error::custom)
        }
    }
}

impl serde::Serialize for ClientId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self.index() {
            None => serializer.serialize_i64(-1),
            Some(n) => serializer.serialize_u64(n as u64),
        }
    }
}
