/// Network management for Hetzner Cloud
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use super::api::CloudApi;
use super::client::{CreateNetworkRequest, SubnetRequest};
use super::models::Network;
use super::{cluster_labels, label_selector};
use crate::config::NetworkConfig;

/// Name of a cluster's private network
pub fn network_name(cluster_name: &str) -> String {
    format!("{}-network", cluster_name)
}

/// Network manager for handling Hetzner Cloud networks
pub struct NetworkManager {
    cloud: Arc<dyn CloudApi>,
}

impl NetworkManager {
    /// Create a new network manager
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self { cloud }
    }

    /// Create or get existing network for the cluster
    pub async fn ensure_network(
        &self,
        cluster_name: &str,
        config: &NetworkConfig,
    ) -> Result<Network> {
        let name = network_name(cluster_name);

        // Check if network already exists
        if let Some(network) = self.cloud.find_network(&name).await? {
            info!(
                "Found existing network: {} (ID: {})",
                network.name, network.id
            );
            return Ok(network);
        }

        info!("Creating new private network: {}", name);

        let request = CreateNetworkRequest {
            name,
            ip_range: config.cidr.clone(),
            subnets: vec![SubnetRequest {
                ip_range: config.subnet_cidr.clone(),
                network_zone: config.zone.clone(),
                subnet_type: "cloud".to_string(),
            }],
            labels: cluster_labels(cluster_name),
        };

        let network = self
            .cloud
            .create_network(request)
            .await
            .context("Failed to create network")?;

        info!(
            "Network created successfully: {} (ID: {})",
            network.name, network.id
        );

        Ok(network)
    }

    /// Networks carrying the cluster label
    pub async fn list_cluster_networks(&self, cluster_name: &str) -> Result<Vec<Network>> {
        self.cloud
            .list_networks(&label_selector(cluster_name))
            .await
            .context("Failed to list networks")
    }

    /// Delete every network carrying the cluster label
    pub async fn delete_cluster_networks(&self, cluster_name: &str) -> Result<usize> {
        let networks = self.list_cluster_networks(cluster_name).await?;

        if networks.is_empty() {
            info!("No networks found for cluster {}", cluster_name);
            return Ok(0);
        }

        for network in &networks {
            info!("Deleting network: {} (ID: {})", network.name, network.id);
            self.cloud
                .delete_network(network.id)
                .await
                .with_context(|| format!("Failed to delete network {}", network.name))?;
        }

        info!("Networks deleted");
        Ok(networks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::testing::FakeCloud;

    #[tokio::test]
    async fn test_network_created_once_then_adopted() {
        let cloud = FakeCloud::new();
        let manager = NetworkManager::new(cloud.clone());
        let config = ClusterConfig::example();

        let created = manager
            .ensure_network("test-cluster", &config.hcloud.network)
            .await
            .unwrap();
        assert_eq!(created.name, "test-cluster-network");
        assert_eq!(created.labels.get("cluster").unwrap(), "test-cluster");
        assert_eq!(cloud.count("create_network"), 1);

        let adopted = manager
            .ensure_network("test-cluster", &config.hcloud.network)
            .await
            .unwrap();
        assert_eq!(adopted.id, created.id);
        assert_eq!(cloud.count("create_network"), 1);
    }

    #[tokio::test]
    async fn test_delete_only_touches_cluster_networks() {
        let cloud = FakeCloud::new();
        let manager = NetworkManager::new(cloud.clone());
        let config = ClusterConfig::example();

        manager
            .ensure_network("test-cluster", &config.hcloud.network)
            .await
            .unwrap();
        manager
            .ensure_network("other-cluster", &config.hcloud.network)
            .await
            .unwrap();

        assert_eq!(manager.delete_cluster_networks("test-cluster").await.unwrap(), 1);
        assert!(cloud.labelled("cluster=test-cluster").is_empty());
        assert_eq!(cloud.labelled("cluster=other-cluster").len(), 1);
        assert_eq!(manager.delete_cluster_networks("test-cluster").await.unwrap(), 0);
    }
}
