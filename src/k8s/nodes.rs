/// Kubernetes node operations
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use super::client::KubernetesClient;
use crate::utils::polling::PollingConfig;

/// `kubectl get nodes -o json`
#[derive(Debug, Deserialize)]
pub struct NodeList {
    #[serde(default)]
    pub items: Vec<Node>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    pub metadata: NodeMetadata,
    #[serde(default)]
    pub spec: NodeSpec,
    #[serde(default)]
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeMetadata {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    #[serde(default)]
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeStatus {
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn has_provider_id(&self) -> bool {
        self.spec
            .provider_id
            .as_deref()
            .is_some_and(|id| !id.is_empty())
    }

    pub fn is_ready(&self) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.condition_type == "Ready" && c.status == "True")
    }
}

/// Nodes that are both initialised by the cloud provider and Ready
pub fn count_qualifying(nodes: &[Node]) -> usize {
    nodes
        .iter()
        .filter(|n| n.has_provider_id() && n.is_ready())
        .count()
}

/// Kubernetes node management operations
pub struct NodeManager<'a> {
    client: &'a KubernetesClient,
}

impl<'a> NodeManager<'a> {
    pub fn new(client: &'a KubernetesClient) -> Self {
        Self { client }
    }

    /// Current node list
    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        let stdout = self
            .client
            .kubectl()
            .args(["get", "nodes", "-o", "json"])
            .context("Failed to list nodes")
            .run()
            .await?;

        let list: NodeList =
            serde_json::from_str(&stdout).context("Failed to parse node list")?;
        Ok(list.items)
    }

    /// Wait until exactly `expected` nodes carry a provider ID and report Ready.
    /// Listing failures while the API server settles count as not ready.
    pub async fn wait_for_ready_nodes(
        &self,
        expected: usize,
        interval: Duration,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let polling = PollingConfig::new(
            timeout,
            interval,
            format!("Waiting for {} nodes to be Ready", expected),
        );

        polling
            .poll_until(|| async {
                let qualifying = match self.list_nodes().await {
                    Ok(nodes) => count_qualifying(&nodes),
                    Err(e) => {
                        debug!("Node list unavailable: {:#}", e);
                        return Ok(false);
                    }
                };
                info!("{}/{} nodes Ready", qualifying, expected);
                Ok(qualifying == expected)
            })
            .await
    }

    /// Set `spec.providerID` on a node that has none
    pub async fn set_provider_id(&self, node_name: &str, provider_id: &str) -> Result<()> {
        info!("Setting providerID of {} to {}", node_name, provider_id);

        let patch = json!({ "spec": { "providerID": provider_id } });
        self.client
            .kubectl()
            .args(["patch", "node", node_name, "--type", "merge", "-p"])
            .arg(patch.to_string())
            .context(format!("Failed to set providerID on {}", node_name))
            .run_silent()
            .await
    }
}
