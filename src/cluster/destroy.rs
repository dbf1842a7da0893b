/// Cluster teardown
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::config::{ClusterPaths, Waits};
use crate::hcloud::{CloudApi, EndpointManager, FirewallManager, NetworkManager, ServerManager};
use crate::utils::fs::remove_path;
use crate::utils::prompt::{confirm, Prompt};

/// Deletes everything labelled with the cluster name, then the local files
pub struct Deprovisioner<'a> {
    cluster_name: &'a str,
    paths: &'a ClusterPaths,
    cloud: Arc<dyn CloudApi>,
    waits: Waits,
}

impl<'a> Deprovisioner<'a> {
    pub fn new(
        cluster_name: &'a str,
        paths: &'a ClusterPaths,
        cloud: Arc<dyn CloudApi>,
        waits: Waits,
    ) -> Self {
        Self {
            cluster_name,
            paths,
            cloud,
            waits,
        }
    }

    pub async fn run(&self, prompt: &dyn Prompt, assume_yes: bool) -> Result<()> {
        confirm(
            prompt,
            &format!(
                "Delete all resources of cluster {} and its local files?",
                self.cluster_name
            ),
            assume_yes,
        )?;

        info!("Destroying cluster {}...", self.cluster_name);

        // Servers first so the firewall and network are no longer attached
        let servers = ServerManager::new(self.cloud.clone())
            .delete_cluster_servers(self.cluster_name)
            .await?;
        let endpoints = EndpointManager::new(
            self.cloud.clone(),
            self.waits.interval,
            self.waits.load_balancer,
        )
        .delete_cluster_endpoints(self.cluster_name)
        .await?;
        let firewalls = FirewallManager::new(self.cloud.clone())
            .with_retry_delay(self.waits.interval)
            .delete_cluster_firewalls(self.cluster_name)
            .await?;
        let networks = NetworkManager::new(self.cloud.clone())
            .delete_cluster_networks(self.cluster_name)
            .await?;

        for path in [&self.paths.config_dir, &self.paths.kubeconfig] {
            if remove_path(path).await? {
                info!("Removed {}", path.display());
            }
        }

        info!(
            "✓ Cluster {} destroyed ({} servers, {} endpoints, {} firewalls, {} networks)",
            self.cluster_name, servers, endpoints, firewalls, networks
        );
        Ok(())
    }
}
