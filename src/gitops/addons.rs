/// Helm-installed cluster add-ons
use anyhow::Result;
use tracing::info;

use crate::config::ClusterConfig;
use crate::k8s::{KubernetesClient, ResourceManager};

/// Chart repositories the add-ons come from
pub const HELM_REPOS: [(&str, &str); 3] = [
    ("ingress-nginx", "https://kubernetes.github.io/ingress-nginx"),
    ("jetstack", "https://charts.jetstack.io"),
    ("argo", "https://argoproj.github.io/argo-helm"),
];

/// Prefix of the Hetzner load balancer annotations, dots escaped for `--set-string`
const HETZNER_LB_ANNOTATION: &str =
    "controller.service.annotations.load-balancer\\.hetzner\\.cloud";

/// One Helm release and where it lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addon {
    pub release: &'static str,
    pub chart: &'static str,
    pub namespace: &'static str,
    pub version: Option<String>,
    /// `--set` / `--set-string` pairs, flag first
    pub values: Vec<(&'static str, String)>,
}

impl Addon {
    /// ingress-nginx, cert-manager and Argo CD, in install order
    pub fn all(config: &ClusterConfig) -> Vec<Addon> {
        let versions = &config.gitops.chart_versions;

        let mut ingress_values = Vec::new();
        if config.gitops.cloud_controller.enabled {
            // Published through a Hetzner load balancer created by the cloud controller
            for (key, value) in [
                ("location", config.hcloud.location.clone()),
                ("use-private-ip", "true".to_string()),
                ("name", format!("{}-ingress", config.cluster_name)),
            ] {
                ingress_values.push((
                    "--set-string",
                    format!("{}/{}={}", HETZNER_LB_ANNOTATION, key, value),
                ));
            }
        }

        vec![
            Addon {
                release: "ingress-nginx",
                chart: "ingress-nginx/ingress-nginx",
                namespace: "ingress-nginx",
                version: versions.ingress_nginx.clone(),
                values: ingress_values,
            },
            Addon {
                release: "cert-manager",
                chart: "jetstack/cert-manager",
                namespace: "cert-manager",
                version: versions.cert_manager.clone(),
                values: vec![("--set", "crds.enabled=true".to_string())],
            },
            Addon {
                release: "argo-cd",
                chart: "argo/argo-cd",
                namespace: "argocd",
                version: versions.argo_cd.clone(),
                values: vec![],
            },
        ]
    }
}

/// Installs and removes add-ons with helm
pub struct AddonManager<'a> {
    client: &'a KubernetesClient,
    timeout_secs: u64,
}

impl<'a> AddonManager<'a> {
    pub fn new(client: &'a KubernetesClient, timeout_secs: u64) -> Self {
        Self {
            client,
            timeout_secs,
        }
    }

    /// Add the chart repositories and refresh their indexes
    pub async fn add_repos(&self) -> Result<()> {
        for (name, url) in HELM_REPOS {
            info!("Adding Helm repository {}...", name);

            let output = self
                .client
                .helm()
                .args(["repo", "add", name, url])
                .context(format!("Failed to add {} Helm repo", name))
                .output()
                .await?;

            if !output.success {
                // Ignore "already exists" errors
                if !output.stderr.contains("already exists") {
                    anyhow::bail!("Failed to add Helm repo {}: {}", name, output.stderr.trim());
                }
            }
        }

        // Update Helm repositories
        self.client
            .helm()
            .args(["repo", "update"])
            .context("Failed to update Helm repos")
            .run_silent()
            .await
    }

    /// `helm upgrade --install`, then wait for the namespace's deployments
    pub async fn install(&self, addon: &Addon) -> Result<()> {
        info!(
            "Installing {} ({})...",
            addon.release,
            addon.version.as_deref().unwrap_or("latest")
        );

        let mut command = self
            .client
            .helm()
            .args(["upgrade", "--install", addon.release, addon.chart])
            .args(["--namespace", addon.namespace, "--create-namespace"]);

        if let Some(version) = &addon.version {
            command = command.args(["--version", version]);
        }
        for (flag, value) in &addon.values {
            command = command.arg(flag).arg(value);
        }

        command
            .context(format!("Failed to install {}", addon.release))
            .run_silent()
            .await?;

        ResourceManager::new(self.client)
            .wait_deployments_available(addon.namespace, self.timeout_secs)
            .await?;

        info!("{} installed successfully", addon.release);
        Ok(())
    }

    /// `helm uninstall`; a release that is not there is a no-op
    pub async fn uninstall(&self, addon: &Addon) -> Result<()> {
        info!("Uninstalling {}...", addon.release);

        let output = self
            .client
            .helm()
            .args(["uninstall", addon.release, "--namespace", addon.namespace])
            .output()
            .await?;

        if !output.success {
            if output.stderr.contains("not found") {
                info!("Release {} not found, nothing to uninstall", addon.release);
                return Ok(());
            }
            anyhow::bail!(
                "Failed to uninstall {}: {}",
                addon.release,
                output.stderr.trim()
            );
        }

        Ok(())
    }
}
