/// Generic Kubernetes resource operations
use anyhow::Result;
use tracing::info;

use super::client::KubernetesClient;

/// Generic Kubernetes resource management
pub struct ResourceManager<'a> {
    client: &'a KubernetesClient,
}

impl<'a> ResourceManager<'a> {
    pub fn new(client: &'a KubernetesClient) -> Self {
        Self { client }
    }

    /// Apply a manifest fed through stdin, keeping its contents off the command line
    pub async fn apply_stdin(&self, manifest: &str, what: &str) -> Result<()> {
        info!("Applying {}", what);

        let stdout = self
            .client
            .kubectl()
            .args(["apply", "-f", "-"])
            .stdin(manifest)
            .context(format!("Failed to apply {}", what))
            .run()
            .await?;

        info!("{}", stdout.trim());
        Ok(())
    }

    /// Apply a manifest published at a URL
    pub async fn apply_url(&self, url: &str) -> Result<()> {
        info!("Applying Kubernetes manifest: {}", url);

        let stdout = self
            .client
            .kubectl()
            .args(["apply", "-f", url])
            .context("Failed to apply manifest")
            .run()
            .await?;

        info!("{}", stdout.trim());
        Ok(())
    }

    /// Delete whatever a manifest URL declares; absent objects are fine
    pub async fn delete_url(&self, url: &str) -> Result<()> {
        info!("Deleting resources from {}", url);

        self.client
            .kubectl()
            .args(["delete", "-f", url, "--ignore-not-found"])
            .context("Failed to delete manifest resources")
            .run_silent()
            .await
    }

    /// Delete a single namespaced object if present
    pub async fn delete_resource(&self, kind: &str, name: &str, namespace: &str) -> Result<()> {
        self.client
            .kubectl()
            .args(["delete", kind, name, "-n", namespace, "--ignore-not-found"])
            .context(format!("Failed to delete {} {}/{}", kind, namespace, name))
            .run_silent()
            .await
    }

    /// Delete a namespace and wait for it to go
    pub async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        info!("Deleting namespace {}", namespace);

        self.client
            .kubectl()
            .args(["delete", "namespace", namespace, "--ignore-not-found"])
            .context(format!("Failed to delete namespace {}", namespace))
            .run_silent()
            .await
    }

    /// Block until every deployment in the namespace reports Available
    pub async fn wait_deployments_available(
        &self,
        namespace: &str,
        timeout_secs: u64,
    ) -> Result<()> {
        info!("Waiting for deployments in {} to become Available...", namespace);

        self.client
            .kubectl()
            .args(["wait", "--for=condition=Available", "deployment", "--all", "-n", namespace])
            .arg(format!("--timeout={}s", timeout_secs))
            .context(format!("Deployments in {} did not become Available", namespace))
            .run_silent()
            .await?;

        info!("✓ Deployments in {} are Available", namespace);
        Ok(())
    }
}
