/// Cluster status report
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{ClusterConfig, ClusterPaths};
use crate::hcloud::server::ServerInfo;
use crate::hcloud::{
    ClusterEndpoint, CloudApi, EndpointManager, FirewallManager, NetworkManager, NodeRole,
    ServerManager,
};
use crate::k8s::nodes::count_qualifying;
use crate::k8s::{KubernetesClient, NodeManager};
use crate::utils::command::CommandRunner;

/// What exists for a cluster right now
#[derive(Debug)]
pub struct ClusterStatus {
    pub servers: Vec<ServerInfo>,
    pub endpoint: Option<ClusterEndpoint>,
    pub firewalls: Vec<String>,
    pub networks: Vec<String>,
    /// Ready nodes with a provider ID, when a kubeconfig is available
    pub ready_nodes: Option<usize>,
}

impl ClusterStatus {
    /// No cloud resource of the cluster is left, an orphaned endpoint included
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
            && self.endpoint.is_none()
            && self.firewalls.is_empty()
            && self.networks.is_empty()
    }
}

pub struct StatusReporter<'a> {
    config: &'a ClusterConfig,
    paths: &'a ClusterPaths,
    cloud: Arc<dyn CloudApi>,
    runner: Arc<dyn CommandRunner>,
}

impl<'a> StatusReporter<'a> {
    pub fn new(
        config: &'a ClusterConfig,
        paths: &'a ClusterPaths,
        cloud: Arc<dyn CloudApi>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            config,
            paths,
            cloud,
            runner,
        }
    }

    /// Collect the status and log it
    pub async fn report(&self) -> Result<ClusterStatus> {
        let status = self.collect().await?;
        self.log(&status);
        Ok(status)
    }

    async fn collect(&self) -> Result<ClusterStatus> {
        let name = &self.config.cluster_name;

        let mut servers = ServerManager::new(self.cloud.clone())
            .list_cluster_servers(name)
            .await?;
        servers.sort_by(|a, b| a.server.name.cmp(&b.server.name));

        // Only read here; the wait settings are irrelevant
        let endpoint = EndpointManager::new(self.cloud.clone(), Duration::ZERO, Duration::ZERO)
            .current(name)
            .await?;

        let firewalls = FirewallManager::new(self.cloud.clone())
            .list_cluster_firewalls(name)
            .await?
            .into_iter()
            .map(|f| f.name)
            .collect();
        let networks = NetworkManager::new(self.cloud.clone())
            .list_cluster_networks(name)
            .await?
            .into_iter()
            .map(|n| format!("{} ({})", n.name, n.ip_range))
            .collect();

        let ready_nodes = if self.paths.kubeconfig.exists() {
            let kube = KubernetesClient::new(self.runner.clone(), self.paths.kubeconfig.clone());
            match NodeManager::new(&kube).list_nodes().await {
                Ok(nodes) => Some(count_qualifying(&nodes)),
                Err(e) => {
                    warn!("Could not get node status: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(ClusterStatus {
            servers,
            endpoint,
            firewalls,
            networks,
            ready_nodes,
        })
    }

    fn log(&self, status: &ClusterStatus) {
        let name = &self.config.cluster_name;

        if status.is_empty() {
            info!("No resources found for cluster: {}", name);
            return;
        }

        info!("Cluster: {}", name);
        info!("");
        info!("Servers:");
        for (title, role) in [
            ("Control Planes", NodeRole::ControlPlane),
            ("Workers", NodeRole::Worker),
        ] {
            info!("  {}:", title);
            for server_info in status.servers.iter().filter(|s| s.role == role) {
                let ip = ServerManager::get_server_ip(&server_info.server)
                    .unwrap_or_else(|| "N/A".to_string());
                let private_ip = ServerManager::get_server_private_ip(&server_info.server)
                    .unwrap_or_else(|| "N/A".to_string());
                info!(
                    "    - {} (ID: {}, Status: {}, IP: {}, Private IP: {})",
                    server_info.server.name,
                    server_info.server.id,
                    server_info.server.status,
                    ip,
                    private_ip
                );
            }
        }

        info!("");
        match &status.endpoint {
            Some(endpoint) => info!("Endpoint: {} -> {}", self.config.dns_name, endpoint),
            None => info!("Endpoint: none"),
        }
        info!("Firewalls: {}", status.firewalls.join(", "));
        info!("Networks: {}", status.networks.join(", "));

        if let Some(ready) = status.ready_nodes {
            info!(
                "Nodes Ready: {}/{}",
                ready,
                self.config.total_node_count()
            );
        }
    }
}
