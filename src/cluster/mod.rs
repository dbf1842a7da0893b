/// Cluster lifecycle: provisioning, teardown and status
pub mod destroy;
pub mod provision;
pub mod status;

use std::sync::Arc;

use crate::hcloud::models::Server;
use crate::hcloud::{CloudApi, NodeRole};
use crate::utils::command::CommandRunner;
use crate::utils::probe::NetworkProbe;

pub use destroy::Deprovisioner;
pub use provision::Provisioner;
pub use status::StatusReporter;

/// The outside world a lifecycle operation talks to
#[derive(Clone)]
pub struct Backends {
    pub cloud: Arc<dyn CloudApi>,
    pub runner: Arc<dyn CommandRunner>,
    pub probe: Arc<dyn NetworkProbe>,
}

/// A server that will become a Talos node
#[derive(Debug, Clone)]
pub struct NodeTarget {
    pub server: Server,
    pub role: NodeRole,
    /// Public IPv4 the Talos API is reached on
    pub ip: String,
}

impl NodeTarget {
    pub fn name(&self) -> &str {
        &self.server.name
    }
}
