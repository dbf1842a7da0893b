/// GitOps bootstrap: cloud controller, ingress, certificates, Argo CD and the root Application
pub mod addons;
pub mod application;
pub mod ccm;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::ClusterConfig;
use crate::error::PreflightError;
use crate::k8s::{KubernetesClient, ResourceManager};
use crate::utils::command::CommandRunner;
use crate::utils::prompt::{confirm, Prompt};

use addons::{Addon, AddonManager};
use application::render_root_application;
pub use ccm::CloudAccess;
use ccm::CloudControllerInstaller;

/// Installs and removes the GitOps stack on a running cluster
pub struct GitOpsBootstrapper<'a> {
    config: &'a ClusterConfig,
    runner: Arc<dyn CommandRunner>,
    client: KubernetesClient,
    settle: Duration,
}

impl<'a> GitOpsBootstrapper<'a> {
    pub fn new(
        config: &'a ClusterConfig,
        runner: Arc<dyn CommandRunner>,
        client: KubernetesClient,
        settle: Duration,
    ) -> Self {
        Self {
            config,
            runner,
            client,
            settle,
        }
    }

    /// Whether the cloud controller (and therefore Hetzner credentials) is needed
    pub fn needs_cloud(&self) -> bool {
        self.config.gitops.cloud_controller.enabled
    }

    /// kubectl and helm present, cluster answering
    pub async fn preflight(&self) -> Result<()> {
        KubernetesClient::check_kubectl_installed(self.runner.as_ref()).await?;
        KubernetesClient::check_helm_installed(self.runner.as_ref()).await?;
        self.client.ensure_reachable().await
    }

    /// Install everything. Call [`Self::preflight`] first.
    pub async fn install(&self, cloud: Option<&CloudAccess>) -> Result<()> {
        let gitops = &self.config.gitops;

        if gitops.cloud_controller.enabled {
            let access = cloud.ok_or(PreflightError::NoCloudContext)?;
            CloudControllerInstaller::new(&self.client, access)
                .install(
                    &self.config.ccm_network_label(),
                    &gitops.cloud_controller.manifest_url,
                    self.settle,
                )
                .await?;
        }

        let addon_manager = AddonManager::new(&self.client, gitops.addon_timeout_secs);
        addon_manager.add_repos().await?;
        for addon in Addon::all(self.config) {
            addon_manager.install(&addon).await?;
        }

        let manifest = render_root_application(gitops)?;
        ResourceManager::new(&self.client)
            .apply_stdin(&manifest, &format!("root Application {}", gitops.root_app_name))
            .await?;

        info!(
            "✓ Argo CD is reconciling {} ({}) from {}",
            gitops.path, gitops.branch, gitops.repo_url
        );
        Ok(())
    }

    /// Remove the stack after confirmation. Absent pieces are skipped.
    pub async fn teardown(&self, prompt: &dyn Prompt, assume_yes: bool) -> Result<()> {
        confirm(
            prompt,
            &format!(
                "Remove the GitOps stack from cluster {}?",
                self.config.cluster_name
            ),
            assume_yes,
        )?;

        self.preflight().await?;

        let addons = Addon::all(self.config);
        let addon_manager = AddonManager::new(&self.client, self.config.gitops.addon_timeout_secs);
        for addon in &addons {
            addon_manager.uninstall(addon).await?;
        }

        let resources = ResourceManager::new(&self.client);
        let manifest_url = &self.config.gitops.cloud_controller.manifest_url;
        resources.delete_url(manifest_url).await?;
        resources
            .delete_resource("secret", ccm::SECRET_NAME, ccm::SECRET_NAMESPACE)
            .await?;

        for addon in &addons {
            resources.delete_namespace(addon.namespace).await?;
        }

        info!("GitOps stack removed");
        Ok(())
    }
}
