/// Talos cluster operations client
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::utils::command::{check_tool_installed, CommandBuilder, CommandRunner};
use crate::utils::fs::restrict_file;
use crate::utils::polling::PollingConfig;

const TALOSCTL_INSTALL_URL: &str = "https://www.talos.dev/latest/talos-guides/install/talosctl/";

/// A node whose authenticated Talos API has answered.
/// Only [`TalosClient`] can produce one, so bootstrapping cannot precede it.
#[derive(Debug, Clone)]
pub struct SecuredNode {
    name: String,
    ip: String,
}

impl SecuredNode {
    pub fn ip(&self) -> &str {
        &self.ip
    }
}

/// Which Talos API a booted node answered on
#[derive(Debug)]
pub enum NodeApi {
    /// Already holds a machine config
    Configured(SecuredNode),
    /// Booted from the ISO and waiting for a config
    Maintenance,
}

/// Talos client for cluster operations
pub struct TalosClient {
    runner: Arc<dyn CommandRunner>,
    talosconfig_path: PathBuf,
    interval: Duration,
    timeout: Option<Duration>,
}

impl TalosClient {
    /// Create a new Talos client
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        talosconfig_path: PathBuf,
        interval: Duration,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            runner,
            talosconfig_path,
            interval,
            timeout,
        }
    }

    /// Check if talosctl is installed
    pub async fn check_talosctl_installed(runner: &dyn CommandRunner) -> Result<()> {
        check_tool_installed(runner, "talosctl", &["version", "--client"], TALOSCTL_INSTALL_URL)
            .await
    }

    /// talosctl with the cluster's talosconfig
    fn talosctl(&self) -> CommandBuilder<'_> {
        CommandBuilder::new(self.runner.as_ref(), "talosctl")
            .arg("--talosconfig")
            .arg(&self.talosconfig_path)
    }

    /// talosctl addressed at a single node through itself
    fn talosctl_at(&self, ip: &str) -> CommandBuilder<'_> {
        self.talosctl().args(["--endpoints", ip, "--nodes", ip])
    }

    /// Configure talosconfig with control plane endpoints
    pub async fn configure_endpoints(&self, control_plane_ips: &[String]) -> Result<()> {
        info!("Configuring talosconfig with control plane endpoints");

        // Set endpoints
        self.talosctl()
            .args(["config", "endpoint"])
            .args(control_plane_ips)
            .context("Failed to set talosconfig endpoints")
            .run_silent()
            .await?;

        // Set nodes (use first control plane as default)
        if let Some(first_ip) = control_plane_ips.first() {
            self.talosctl()
                .args(["config", "node", first_ip])
                .context("Failed to set talosconfig node")
                .run_silent()
                .await?;
        }

        info!(
            "Talosconfig configured with endpoints: {}",
            control_plane_ips.join(", ")
        );
        Ok(())
    }

    /// One authenticated API call; `Some` when the node answered
    pub async fn secure_api(&self, name: &str, ip: &str) -> Result<Option<SecuredNode>> {
        let output = self.talosctl_at(ip).arg("version").output().await?;
        Ok(output.success.then(|| SecuredNode {
            name: name.to_string(),
            ip: ip.to_string(),
        }))
    }

    /// One maintenance-mode API call; true when the node answered
    async fn maintenance_api(&self, ip: &str) -> Result<bool> {
        let output = CommandBuilder::new(self.runner.as_ref(), "talosctl")
            .args(["get", "disks", "--insecure", "--nodes", ip])
            .output()
            .await?;
        Ok(output.success)
    }

    /// Wait until the node answers on either API. The authenticated API is
    /// tried first so a node that kept its config is recognised.
    pub async fn wait_for_node(&self, name: &str, ip: &str) -> Result<NodeApi> {
        let polling = PollingConfig::new(
            self.timeout,
            self.interval,
            format!("Waiting for Talos API on {} ({})", name, ip),
        );

        polling
            .poll(|| async {
                if let Some(node) = self.secure_api(name, ip).await? {
                    return Ok(Some(NodeApi::Configured(node)));
                }
                if self.maintenance_api(ip).await? {
                    return Ok(Some(NodeApi::Maintenance));
                }
                Ok(None)
            })
            .await
    }

    /// Apply a machine config to a node in maintenance mode
    pub async fn apply_config(
        &self,
        name: &str,
        ip: &str,
        config_file: &Path,
        patch: &Value,
    ) -> Result<()> {
        info!("Applying {} to {} ({})", config_file.display(), name, ip);

        CommandBuilder::new(self.runner.as_ref(), "talosctl")
            .args(["apply-config", "--insecure", "--nodes", ip])
            .arg("--file")
            .arg(config_file)
            .arg("--config-patch")
            .arg(patch.to_string())
            .context(format!("Failed to apply machine config to {}", name))
            .run_silent()
            .await
    }

    /// Wait until the node's authenticated API answers
    pub async fn wait_for_secure_api(&self, name: &str, ip: &str) -> Result<SecuredNode> {
        let polling = PollingConfig::new(
            self.timeout,
            self.interval,
            format!("Waiting for Talos API on {} ({})", name, ip),
        );

        polling.poll(|| self.secure_api(name, ip)).await
    }

    /// Bootstrap the Kubernetes cluster on the first control plane node
    pub async fn bootstrap(&self, node: &SecuredNode) -> Result<()> {
        info!("Bootstrapping Kubernetes cluster on {} ({})", node.name, node.ip);

        let output = self.talosctl_at(&node.ip).arg("bootstrap").output().await?;
        if output.success {
            info!("Kubernetes cluster bootstrapped successfully");
            return Ok(());
        }

        if output.stderr.contains("AlreadyExists") || output.stderr.contains("already bootstrapped")
        {
            info!("Cluster on {} is already bootstrapped", node.name);
            return Ok(());
        }

        anyhow::bail!("Bootstrap failed: {}", output.stderr.trim())
    }

    /// Generate kubeconfig file, readable by the owner only
    pub async fn generate_kubeconfig(
        &self,
        control_plane_ip: &str,
        output_path: &Path,
    ) -> Result<()> {
        info!("Generating kubeconfig file...");

        self.talosctl_at(control_plane_ip)
            .arg("kubeconfig")
            .arg(output_path)
            .arg("--force")
            .context("Failed to generate kubeconfig")
            .run_silent()
            .await?;
        restrict_file(output_path).await?;

        info!("Kubeconfig generated at: {}", output_path.display());

        Ok(())
    }

    /// Run the Talos cluster health checks
    pub async fn health(&self, control_plane_ip: &str) -> Result<()> {
        info!("Running cluster health checks...");

        self.talosctl_at(control_plane_ip)
            .arg("health")
            .context("Cluster health check failed")
            .run_silent()
            .await?;

        info!("✓ Cluster is healthy");
        Ok(())
    }
}
