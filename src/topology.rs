//! Cluster topology: resolves logical node names to network endpoints.
//!
//! The topology is a read-only table supplied at startup. It is usually loaded from a JSON object
//! mapping each node name to a `host:port` string:
//!
//! ```
//! use kameo_cluster_client::topology::{Endpoint, Topology};
//!
//! let topology = Topology::from_json_str(r#"{ "db1": "10.0.0.5:9000" }"#).unwrap();
//! assert_eq!(topology.resolve("db1"), Some(&Endpoint::new("10.0.0.5", 9000)));
//! assert_eq!(topology.resolve("db2"), None);
//! ```

use std::{collections::HashMap, fmt, fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A resolved network address of a cluster node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates a new endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    /// The host name or IP address, without IPv6 brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidEndpoint(s.to_string());
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|host| host.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse().map_err(|_| invalid())?;
        Ok(Endpoint::new(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

/// Read-only mapping of logical node names to endpoints.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topology {
    nodes: HashMap<String, Endpoint>,
}

impl Topology {
    /// Creates an empty topology.
    pub fn new() -> Self {
        Topology::default()
    }

    /// Adds a node, returning the topology.
    pub fn with_node(mut self, name: impl Into<String>, endpoint: Endpoint) -> Self {
        self.insert(name, endpoint);
        self
    }

    /// Adds or replaces a node, returning the endpoint it previously mapped to.
    pub fn insert(&mut self, name: impl Into<String>, endpoint: Endpoint) -> Option<Endpoint> {
        self.nodes.insert(name.into(), endpoint)
    }

    /// Resolves a node name to its endpoint.
    pub fn resolve(&self, node: &str) -> Option<&Endpoint> {
        self.nodes.get(node)
    }

    /// The number of known nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no nodes are known.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Parses a topology from a JSON object of `"node": "host:port"` pairs.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let nodes: HashMap<String, String> = serde_json::from_str(json)?;
        nodes
            .into_iter()
            .map(|(name, endpoint)| Ok::<_, ConfigError>((name, endpoint.parse::<Endpoint>()?)))
            .collect()
    }

    /// Loads a topology from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Topology::from_json_str(&json)
    }
}

impl FromIterator<(String, Endpoint)> for Topology {
    fn from_iter<I: IntoIterator<Item = (String, Endpoint)>>(iter: I) -> Self {
        Topology {
            nodes: iter.into_iter().collect(),
        }
    }
}
