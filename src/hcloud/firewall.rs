/// Firewall management for Hetzner Cloud
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::api::CloudApi;
use super::client::CreateFirewallRequest;
use super::models::{Firewall, FirewallRule};
use super::{cluster_labels, label_selector};
use crate::config::FirewallConfig;

const DELETE_ATTEMPTS: u32 = 12;

/// Name of a cluster's firewall
pub fn firewall_name(cluster_name: &str) -> String {
    format!("{}-firewall", cluster_name)
}

fn inbound(
    protocol: &str,
    port: Option<&str>,
    sources: &[String],
    description: &str,
) -> FirewallRule {
    FirewallRule {
        direction: "in".to_string(),
        source_ips: sources.to_vec(),
        destination_ips: vec![],
        protocol: protocol.to_string(),
        port: port.map(str::to_string),
        description: Some(description.to_string()),
    }
}

/// Inbound rules for the public interface of every node.
/// Private network traffic is not filtered by Hetzner Cloud firewalls.
pub fn cluster_rules(config: &FirewallConfig) -> Vec<FirewallRule> {
    let anywhere = vec!["0.0.0.0/0".to_string(), "::/0".to_string()];
    let api = &config.api_source_cidrs;

    vec![
        inbound("tcp", Some("6443"), api, "Kubernetes API"),
        inbound("tcp", Some("50000"), api, "Talos API"),
        inbound("tcp", Some("50001"), &anywhere, "Talos trustd"),
        inbound("udp", Some("51820"), &anywhere, "KubeSpan"),
        inbound("tcp", Some("80"), &anywhere, "HTTP ingress"),
        inbound("tcp", Some("443"), &anywhere, "HTTPS ingress"),
        inbound("icmp", None, &anywhere, "ICMP"),
    ]
}

/// Firewall manager
pub struct FirewallManager {
    cloud: Arc<dyn CloudApi>,
    retry_delay: Duration,
}

impl FirewallManager {
    /// Create a new firewall manager
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self {
            cloud,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Pause between delete attempts while servers detach
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Create or get existing firewall for the cluster
    pub async fn ensure_firewall(
        &self,
        cluster_name: &str,
        config: &FirewallConfig,
    ) -> Result<Firewall> {
        let name = firewall_name(cluster_name);

        // Check if firewall already exists
        if let Some(firewall) = self.cloud.find_firewall(&name).await? {
            info!(
                "Found existing firewall: {} (ID: {})",
                firewall.name, firewall.id
            );
            return Ok(firewall);
        }

        info!(
            "Creating firewall {} (API access from {})",
            name,
            config.api_source_cidrs.join(", ")
        );

        let request = CreateFirewallRequest {
            name,
            rules: cluster_rules(config),
            labels: cluster_labels(cluster_name),
        };

        let firewall = self
            .cloud
            .create_firewall(request)
            .await
            .context("Failed to create firewall")?;

        info!(
            "Firewall created successfully: {} (ID: {})",
            firewall.name, firewall.id
        );

        Ok(firewall)
    }

    /// Firewalls carrying the cluster label
    pub async fn list_cluster_firewalls(&self, cluster_name: &str) -> Result<Vec<Firewall>> {
        self.cloud
            .list_firewalls(&label_selector(cluster_name))
            .await
            .context("Failed to list firewalls")
    }

    /// Delete every firewall carrying the cluster label
    pub async fn delete_cluster_firewalls(&self, cluster_name: &str) -> Result<usize> {
        let firewalls = self.list_cluster_firewalls(cluster_name).await?;

        if firewalls.is_empty() {
            info!("No firewalls found for cluster {}", cluster_name);
            return Ok(0);
        }

        for firewall in &firewalls {
            info!("Deleting firewall: {} (ID: {})", firewall.name, firewall.id);
            self.delete_with_retry(firewall).await?;
        }

        info!("Firewalls deleted");
        Ok(firewalls.len())
    }

    /// Retry deletion if firewall is still in use (servers may still be deleting)
    async fn delete_with_retry(&self, firewall: &Firewall) -> Result<()> {
        for attempt in 1..=DELETE_ATTEMPTS {
            match self.cloud.delete_firewall(firewall.id).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let err_msg = e.to_string();
                    let in_use =
                        err_msg.contains("resource_in_use") || err_msg.contains("still in use");
                    if !in_use {
                        return Err(e).context("Failed to delete firewall");
                    }
                    if attempt == DELETE_ATTEMPTS {
                        return Err(e)
                            .context("Failed to delete firewall after waiting for servers");
                    }
                    info!(
                        "Firewall still in use, waiting for servers to go (attempt {}/{})...",
                        attempt, DELETE_ATTEMPTS
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
        Ok(())
    }
}
