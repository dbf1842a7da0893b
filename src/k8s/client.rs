/// Kubernetes operations client
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::error::PreflightError;
use crate::utils::command::{check_tool_installed, CommandBuilder, CommandRunner};

/// kubectl and helm bound to one cluster's kubeconfig
pub struct KubernetesClient {
    runner: Arc<dyn CommandRunner>,
    kubeconfig: PathBuf,
}

impl KubernetesClient {
    pub fn new(runner: Arc<dyn CommandRunner>, kubeconfig: PathBuf) -> Self {
        Self { runner, kubeconfig }
    }

    /// Check if kubectl is installed
    pub async fn check_kubectl_installed(runner: &dyn CommandRunner) -> Result<()> {
        check_tool_installed(
            runner,
            "kubectl",
            &["version", "--client"],
            "https://kubernetes.io/docs/tasks/tools/",
        )
        .await
    }

    /// Check if helm is installed
    pub async fn check_helm_installed(runner: &dyn CommandRunner) -> Result<()> {
        check_tool_installed(
            runner,
            "helm",
            &["version"],
            "https://helm.sh/docs/intro/install/",
        )
        .await
    }

    pub fn kubectl(&self) -> CommandBuilder<'_> {
        CommandBuilder::new(self.runner.as_ref(), "kubectl").kubeconfig(&self.kubeconfig)
    }

    pub fn helm(&self) -> CommandBuilder<'_> {
        CommandBuilder::new(self.runner.as_ref(), "helm").kubeconfig(&self.kubeconfig)
    }

    /// Fail with [`PreflightError::ClusterUnreachable`] unless the API server answers
    pub async fn ensure_reachable(&self) -> Result<()> {
        let output = self.kubectl().arg("cluster-info").output().await?;
        if !output.success {
            return Err(PreflightError::ClusterUnreachable {
                kubeconfig: self.kubeconfig.display().to_string(),
                reason: output.stderr.trim().to_string(),
            }
            .into());
        }

        info!("✓ Cluster reachable via {}", self.kubeconfig.display());
        Ok(())
    }
}
