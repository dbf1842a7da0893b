/// Talos configuration generation
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::TalosConfig;
use crate::hcloud::NodeRole;
use crate::utils::command::{CommandBuilder, CommandRunner};
use crate::utils::fs::{restrict_dir, restrict_file};

/// Talos configuration generator
pub struct TalosConfigGenerator {
    cluster_name: String,
    cluster_endpoint: String,
    talos_config: TalosConfig,
    cert_sans: Vec<String>,
}

impl TalosConfigGenerator {
    /// Create a new Talos configuration generator.
    /// `cert_sans` are added to both the Talos and Kubernetes API certificates.
    pub fn new(
        cluster_name: String,
        cluster_endpoint: String,
        talos_config: TalosConfig,
        cert_sans: Vec<String>,
    ) -> Self {
        Self {
            cluster_name,
            cluster_endpoint,
            talos_config,
            cert_sans,
        }
    }

    /// Patch applied to every machine: KubeSpan on, extra machine cert SANs
    pub fn common_patch(&self) -> Value {
        json!({
            "machine": {
                "certSANs": self.cert_sans,
                "network": {
                    "kubespan": { "enabled": true }
                }
            }
        })
    }

    /// Patch applied to control planes only: extra API server cert SANs
    pub fn control_plane_patch(&self) -> Value {
        json!({
            "cluster": {
                "apiServer": { "certSANs": self.cert_sans }
            }
        })
    }

    /// Generate Talos configuration files using talosctl, once per cluster
    pub async fn generate_configs(
        &self,
        runner: &dyn CommandRunner,
        output_dir: &Path,
    ) -> Result<GeneratedConfigs> {
        let configs = GeneratedConfigs::in_dir(output_dir);

        // Ensure output directory exists
        tokio::fs::create_dir_all(output_dir)
            .await
            .context("Failed to create output directory")?;
        restrict_dir(output_dir).await?;

        if configs.exist() {
            info!(
                "Using existing Talos configuration in {}",
                output_dir.display()
            );
            return Ok(configs);
        }

        info!("Generating Talos configuration files...");

        let mut command = CommandBuilder::new(runner, "talosctl")
            .args(["gen", "config"])
            .arg(&self.cluster_name)
            .arg(&self.cluster_endpoint)
            .arg("--output-dir")
            .arg(output_dir)
            .args(["--talos-version", &self.talos_config.version])
            .args(["--kubernetes-version", &self.talos_config.kubernetes_version])
            .args(["--install-disk", &self.talos_config.install_disk])
            .args(["--with-docs=false", "--with-examples=false"])
            .arg("--config-patch")
            .arg(self.common_patch().to_string())
            .arg("--config-patch-control-plane")
            .arg(self.control_plane_patch().to_string());

        for patch in &self.talos_config.config_patches {
            command = command.arg("--config-patch").arg(patch);
        }

        command
            .context("talosctl gen config failed")
            .run_silent()
            .await?;

        for file in configs.files() {
            restrict_file(file).await?;
        }

        info!("Talos configuration files generated successfully");

        Ok(configs)
    }
}

/// Generated Talos configuration files
#[derive(Debug, Clone)]
pub struct GeneratedConfigs {
    pub controlplane: PathBuf,
    pub worker: PathBuf,
    pub talosconfig: PathBuf,
}

impl GeneratedConfigs {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            controlplane: dir.join("controlplane.yaml"),
            worker: dir.join("worker.yaml"),
            talosconfig: dir.join("talosconfig"),
        }
    }

    fn files(&self) -> [&Path; 3] {
        [&self.controlplane, &self.worker, &self.talosconfig]
    }

    /// All three files are present
    pub fn exist(&self) -> bool {
        self.files().iter().all(|f| f.exists())
    }

    /// Machine config for a node role
    pub fn for_role(&self, role: NodeRole) -> &Path {
        match role {
            NodeRole::ControlPlane => &self.controlplane,
            NodeRole::Worker => &self.worker,
        }
    }
}

/// Per-node patch passed at apply time: hostname, cloud provider ID and,
/// for the floating-IP control plane, the floating address on its public link.
pub fn node_patch(hostname: &str, server_id: u64, floating_ip: Option<Ipv4Addr>) -> Value {
    let mut network = json!({ "hostname": hostname });
    if let Some(ip) = floating_ip {
        network["interfaces"] = json!([{
            "deviceSelector": { "physical": true },
            "dhcp": true,
            "addresses": [format!("{}/32", ip)]
        }]);
    }

    json!({
        "machine": {
            "network": network,
            "kubelet": {
                "extraArgs": { "provider-id": format!("hcloud://{}", server_id) }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{writes_talos_files, ScriptedRunner};
    use crate::utils::command::CommandOutput;

    fn talos_config() -> TalosConfig {
        TalosConfig {
            version: "v1.9.0".to_string(),
            kubernetes_version: "1.32.0".to_string(),
            install_disk: "/dev/sda".to_string(),
            config_patches: vec!["@extra.yaml".to_string()],
        }
    }

    fn generator() -> TalosConfigGenerator {
        TalosConfigGenerator::new(
            "test-cluster".to_string(),
            "https://kube.test.example:6443".to_string(),
            talos_config(),
            vec!["kube.test.example".to_string(), "198.51.100.7".to_string()],
        )
    }

    #[test]
    fn test_patches() {
        let g = generator();
        let common = g.common_patch();
        assert_eq!(common["machine"]["network"]["kubespan"]["enabled"], true);
        assert_eq!(common["machine"]["certSANs"][1], "198.51.100.7");

        let cp = g.control_plane_patch();
        assert_eq!(cp["cluster"]["apiServer"]["certSANs"][0], "kube.test.example");
    }

    #[test]
    fn test_node_patch() {
        let worker = node_patch("test-cluster-worker", 12, None);
        assert_eq!(worker["machine"]["network"]["hostname"], "test-cluster-worker");
        assert_eq!(
            worker["machine"]["kubelet"]["extraArgs"]["provider-id"],
            "hcloud://12"
        );
        assert!(worker["machine"]["network"].get("interfaces").is_none());

        let cp = node_patch("test-cluster-cp", 3, Some(Ipv4Addr::new(198, 51, 100, 7)));
        let iface = &cp["machine"]["network"]["interfaces"][0];
        assert_eq!(iface["addresses"][0], "198.51.100.7/32");
        assert_eq!(iface["deviceSelector"]["physical"], true);
    }

    #[tokio::test]
    async fn test_generate_once() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("test-cluster");
        let runner = ScriptedRunner::new().on_with(writes_talos_files);

        let configs = generator().generate_configs(&runner, &out).await.unwrap();
        assert!(configs.exist());
        assert_eq!(runner.count("talosctl gen config"), 1);

        let call = &runner.calls()[0];
        assert_eq!(call.arg_after("--install-disk"), Some("/dev/sda"));
        assert_eq!(call.arg_after("--kubernetes-version"), Some("1.32.0"));
        assert!(call.args.contains(&"@extra.yaml".to_string()));
        assert!(call
            .arg_after("--config-patch-control-plane")
            .unwrap()
            .contains("apiServer"));

        generator().generate_configs(&runner, &out).await.unwrap();
        assert_eq!(runner.count("talosctl gen config"), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generated_files_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("test-cluster");
        let runner = ScriptedRunner::new().on_with(writes_talos_files);

        let configs = generator().generate_configs(&runner, &out).await.unwrap();

        let dir_mode = std::fs::metadata(&out).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        let file_mode = std::fs::metadata(&configs.talosconfig)
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(file_mode, 0o600);
    }

    #[tokio::test]
    async fn test_generation_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new()
            .on("gen config", CommandOutput::failed("invalid kubernetes version"));

        let err = generator()
            .generate_configs(&runner, dir.path())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("invalid kubernetes version"));
    }
}
