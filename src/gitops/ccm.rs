/// Hetzner cloud-controller-manager installation
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::hcloud::CloudApi;
use crate::k8s::{KubernetesClient, NodeManager, ResourceManager};

pub const SECRET_NAME: &str = "hcloud";
pub const SECRET_NAMESPACE: &str = "kube-system";

/// Authenticated access to the cluster's Hetzner project
pub struct CloudAccess {
    pub cloud: Arc<dyn CloudApi>,
    pub token: String,
}

/// The `hcloud` Secret the controller reads its token and network from
pub fn secret_manifest(token: &str, network: &str) -> String {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": SECRET_NAME, "namespace": SECRET_NAMESPACE },
        "type": "Opaque",
        "data": {
            "token": STANDARD.encode(token),
            "network": STANDARD.encode(network),
        }
    })
    .to_string()
}

pub struct CloudControllerInstaller<'a> {
    client: &'a KubernetesClient,
    access: &'a CloudAccess,
}

impl<'a> CloudControllerInstaller<'a> {
    pub fn new(client: &'a KubernetesClient, access: &'a CloudAccess) -> Self {
        Self { client, access }
    }

    /// Secret, provider IDs, manifest, then a settle delay
    pub async fn install(
        &self,
        network_label: &str,
        manifest_url: &str,
        settle: Duration,
    ) -> Result<()> {
        info!("Installing Hetzner cloud-controller-manager...");

        let network = self
            .access
            .cloud
            .list_networks(network_label)
            .await
            .context("Failed to look up the cluster network")?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No network matches label {}", network_label))?;
        info!("Using network {} (ID: {})", network.name, network.id);

        let resources = ResourceManager::new(self.client);
        resources
            .apply_stdin(
                &secret_manifest(&self.access.token, &network.id.to_string()),
                "hcloud secret",
            )
            .await?;

        self.stamp_provider_ids().await?;

        resources.apply_url(manifest_url).await?;

        if !settle.is_zero() {
            info!(
                "Giving the cloud controller {}s to initialise nodes",
                settle.as_secs()
            );
            tokio::time::sleep(settle).await;
        }

        info!("cloud-controller-manager installed");
        Ok(())
    }

    /// Give nodes without a providerID the ID of the server with the same name
    pub async fn stamp_provider_ids(&self) -> Result<usize> {
        let nodes = NodeManager::new(self.client);
        let mut stamped = 0;

        for node in nodes.list_nodes().await? {
            if node.has_provider_id() {
                continue;
            }

            match self.access.cloud.find_server(node.name()).await? {
                Some(server) => {
                    nodes
                        .set_provider_id(node.name(), &format!("hcloud://{}", server.id))
                        .await?;
                    stamped += 1;
                }
                None => warn!("No server named {}, leaving its providerID unset", node.name()),
            }
        }

        Ok(stamped)
    }
}
