use {
    crate::{Error, Result},
    serde::{Deserialize, Serialize},
    std::{path::PathBuf, time::Duration},
};

/// Settings shared by every scenario of a run.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Options {
    pub nodes: Vec<String>,
    /// Number of concurrent client sessions.
    pub concurrency: usize,
    #[serde(with = "seconds")]
    pub workload_duration: Duration,
    /// Keep running after a client reports an error whose effect is unknown.
    pub continue_on_ambiguous: bool,
    pub rpc_port: u16,
    pub rpc_password: String,
    /// Seeds every generator's PRNG.
    pub seed: u64,
    #[serde(with = "seconds")]
    pub check_timeout: Duration,
    /// Where visualizations of failed checks are written.
    pub artifact_dir: PathBuf,
    /// Database or workload specific settings.
    pub extras: serde_json::Map<String, serde_json::Value>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            nodes: vec!["localhost".into()],
            concurrency: 3,
            workload_duration: Duration::from_secs(60),
            continue_on_ambiguous: false,
            rpc_port: 9090,
            rpc_password: String::new(),
            seed: 0,
            check_timeout: Duration::from_secs(40),
            artifact_dir: PathBuf::from("."),
            extras: serde_json::Map::new(),
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::InvalidOptions("concurrency must be at least 1".into()));
        }
        if self.nodes.is_empty() {
            return Err(Error::InvalidOptions("at least one node is required".into()));
        }
        if self.rpc_port == 0 {
            return Err(Error::InvalidOptions("rpc port must be non-zero".into()));
        }
        Ok(())
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extras.get(key).and_then(|v| v.as_str())
    }

    pub fn rpc_address(&self, node: &str) -> String {
        format!("{node}:{}", self.rpc_port)
    }
}

mod seconds {
    use {
        serde::{Deserialize, Deserializer, Serializer},
        std::time::Duration,
    };

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
