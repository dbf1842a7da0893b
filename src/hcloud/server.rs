/// Server management for Hetzner Cloud
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use super::api::CloudApi;
use super::client::{CreateServerRequest, FirewallReference};
use super::models::Server;
use super::{cluster_labels, label_selector};
use crate::config::NodeConfig;

/// Server manager for handling Hetzner Cloud servers
pub struct ServerManager {
    cloud: Arc<dyn CloudApi>,
}

/// A cluster server together with its role
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub server: Server,
    pub role: NodeRole,
}

/// Node role in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    ControlPlane,
    Worker,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::ControlPlane => write!(f, "control-plane"),
            NodeRole::Worker => write!(f, "worker"),
        }
    }
}

impl NodeRole {
    fn from_label(value: Option<&String>) -> Self {
        match value.map(String::as_str) {
            Some("control-plane") => NodeRole::ControlPlane,
            _ => NodeRole::Worker,
        }
    }
}

/// Parameters for creating a server
pub struct ServerSpec<'a> {
    pub cluster_name: &'a str,
    pub pool: &'a NodeConfig,
    pub index: u32,
    pub role: NodeRole,
    pub location: &'a str,
    pub image: &'a str,
    pub network_id: u64,
    pub firewall_id: u64,
}

impl ServerSpec<'_> {
    /// `<cluster>-<pool>` for single-node pools, `<cluster>-<pool>-<n>` otherwise
    pub fn name(&self) -> String {
        if self.pool.count == 1 {
            format!("{}-{}", self.cluster_name, self.pool.name)
        } else {
            format!("{}-{}-{}", self.cluster_name, self.pool.name, self.index + 1)
        }
    }
}

impl ServerManager {
    /// Create a new server manager
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self { cloud }
    }

    /// Create the server unless one with the same name exists
    pub async fn ensure_server(&self, spec: &ServerSpec<'_>) -> Result<Server> {
        let server_name = spec.name();

        if let Some(server) = self.cloud.find_server(&server_name).await? {
            info!(
                "Found existing server: {} (ID: {})",
                server.name, server.id
            );
            return Ok(server);
        }

        info!(
            "Creating {} server: {} (type: {})",
            spec.role, server_name, spec.pool.server_type
        );

        let mut labels = spec.pool.labels.clone();
        labels.extend(cluster_labels(spec.cluster_name));
        labels.insert("role".to_string(), spec.role.to_string());

        let request = CreateServerRequest {
            name: server_name.clone(),
            server_type: spec.pool.server_type.clone(),
            location: spec.location.to_string(),
            image: spec.image.to_string(),
            networks: vec![spec.network_id],
            firewalls: vec![FirewallReference {
                firewall: spec.firewall_id,
            }],
            labels,
            start_after_create: true,
        };

        let server = self
            .cloud
            .create_server(request)
            .await
            .with_context(|| format!("Failed to create server {}", server_name))?;

        info!("Server {} created (ID: {})", server.name, server.id);

        Ok(server)
    }

    /// Attach the Talos ISO and hard-reset so the server boots into maintenance mode
    pub async fn boot_from_iso(&self, server: &Server, iso: &str) -> Result<()> {
        info!("Booting {} from ISO {}", server.name, iso);

        self.cloud
            .attach_iso(server.id, iso)
            .await
            .with_context(|| format!("Failed to attach ISO to {}", server.name))?;
        self.cloud
            .reset_server(server.id)
            .await
            .with_context(|| format!("Failed to reset {}", server.name))?;

        Ok(())
    }

    /// List all servers for a cluster
    pub async fn list_cluster_servers(&self, cluster_name: &str) -> Result<Vec<ServerInfo>> {
        let servers = self
            .cloud
            .list_servers(&label_selector(cluster_name))
            .await
            .context("Failed to list servers")?;

        Ok(servers
            .into_iter()
            .map(|server| {
                let role = NodeRole::from_label(server.labels.get("role"));
                ServerInfo { server, role }
            })
            .collect())
    }

    /// Delete all servers for a cluster
    pub async fn delete_cluster_servers(&self, cluster_name: &str) -> Result<usize> {
        let servers = self.list_cluster_servers(cluster_name).await?;

        if servers.is_empty() {
            info!("No servers found for cluster {}", cluster_name);
            return Ok(0);
        }

        info!(
            "Deleting {} servers for cluster {}",
            servers.len(),
            cluster_name
        );

        for server_info in &servers {
            info!(
                "Deleting server: {} (ID: {})",
                server_info.server.name, server_info.server.id
            );
            self.cloud
                .delete_server(server_info.server.id)
                .await
                .with_context(|| format!("Failed to delete server {}", server_info.server.name))?;
        }

        info!("All servers deleted");
        Ok(servers.len())
    }

    /// Get the primary IP address of a server
    pub fn get_server_ip(server: &Server) -> Option<String> {
        server.public_net.ipv4.as_ref().map(|ipv4| ipv4.ip.clone())
    }

    /// Get the private IP address of a server
    pub fn get_server_private_ip(server: &Server) -> Option<String> {
        server.private_net.first().map(|net| net.ip.clone())
    }
}
