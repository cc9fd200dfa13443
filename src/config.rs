//! Configuration of a cluster client.

use std::path::Path;

use crate::{error::ConfigError, topology::Topology};

/// Tag embedded in every request frame when none is configured.
pub const DEFAULT_REQUEST_TAG: u32 = 1;

/// Largest inbound frame body accepted by the TCP transport when none is configured.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// The configuration for a [`ClusterClient`](crate::client::ClusterClient).
#[derive(Clone, Debug, Default)]
pub struct ClientConfig {
    topology: Topology,
    request_tag: Option<u32>,
    max_frame_size: Option<usize>,
}

impl ClientConfig {
    /// Creates a configuration for the given cluster topology.
    pub fn new(topology: Topology) -> Self {
        ClientConfig {
            topology,
            request_tag: None,
            max_frame_size: None,
        }
    }

    /// Loads the cluster topology from a JSON file of `"node": "host:port"` pairs.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(ClientConfig::new(Topology::load(path)?))
    }

    /// Sets the protocol tag embedded in every request frame.
    pub fn with_request_tag(mut self, tag: u32) -> Self {
        self.request_tag = Some(tag);
        self
    }

    /// Sets the limit for inbound frame bodies, in bytes.
    pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = Some(bytes);
        self
    }

    /// The cluster topology.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The protocol tag embedded in every request frame.
    pub fn request_tag(&self) -> u32 {
        self.request_tag.unwrap_or(DEFAULT_REQUEST_TAG)
    }

    /// The limit for inbound frame bodies, in bytes.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size.unwrap_or(DEFAULT_MAX_FRAME_SIZE)
    }

    pub(crate) fn into_topology(self) -> Topology {
        self.topology
    }
}
