/// Configuration management for hcloud-talos
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CCM_MANIFEST_URL: &str =
    "https://github.com/hetznercloud/hcloud-cloud-controller-manager/releases/latest/download/ccm-networks.yaml";

/// Main cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name (used for resource naming and the `cluster=<name>` label)
    pub cluster_name: String,

    /// Hostname the Kubernetes API is published under
    pub dns_name: String,

    /// Hetzner Cloud configuration
    pub hcloud: HetznerCloudConfig,

    /// Talos configuration
    pub talos: TalosConfig,

    /// Control plane nodes
    pub control_planes: Vec<NodeConfig>,

    /// Worker nodes
    #[serde(default)]
    pub workers: Vec<NodeConfig>,

    /// GitOps bootstrap configuration
    #[serde(default)]
    pub gitops: GitOpsConfig,

    /// Poll intervals and optional timeouts
    #[serde(default)]
    pub waits: WaitConfig,
}

/// Hetzner Cloud API and network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HetznerCloudConfig {
    /// Hetzner Cloud API token (can also come from HCLOUD_TOKEN or the active hcloud context)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Hetzner Cloud location (e.g., "fsn1")
    pub location: String,

    /// Private network configuration
    pub network: NetworkConfig,

    /// Image servers are created with before the Talos ISO takes over
    #[serde(default = "default_image")]
    pub image: String,

    /// Talos ISO name or ID as listed by the Hetzner Cloud API
    pub iso: String,

    /// Load balancer type used when there is more than one control plane
    #[serde(default = "default_load_balancer_type")]
    pub load_balancer_type: String,

    /// Firewall source ranges
    #[serde(default)]
    pub firewall: FirewallConfig,
}

/// Private network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network CIDR (e.g., "10.0.0.0/16")
    pub cidr: String,

    /// Subnet CIDR for the cluster (e.g., "10.0.1.0/24")
    pub subnet_cidr: String,

    /// Network zone (e.g., "eu-central")
    pub zone: String,
}

/// Source ranges allowed to reach the Talos and Kubernetes APIs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallConfig {
    #[serde(default = "default_allowed_cidrs")]
    pub api_source_cidrs: Vec<String>,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            api_source_cidrs: default_allowed_cidrs(),
        }
    }
}

/// Talos-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TalosConfig {
    /// Talos version to use (e.g., "v1.9.0")
    pub version: String,

    /// Kubernetes version (e.g., "1.32.0")
    pub kubernetes_version: String,

    /// Disk Talos installs itself to
    #[serde(default = "default_install_disk")]
    pub install_disk: String,

    /// Additional Talos machine config patches (inline or `@file`)
    #[serde(default)]
    pub config_patches: Vec<String>,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name prefix
    pub name: String,

    /// Hetzner server type (e.g., "cx22", "cpx31")
    pub server_type: String,

    /// Number of nodes to create with this configuration
    #[serde(default = "default_one")]
    pub count: u32,

    /// Additional labels for the server
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// GitOps bootstrap configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitOpsConfig {
    /// Repository Argo CD reconciles from
    #[serde(default)]
    pub repo_url: String,

    /// Directory inside the repository holding the application tree
    #[serde(default)]
    pub path: String,

    /// Branch, tag or commit to track
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Name of the root Application
    #[serde(default = "default_root_app")]
    pub root_app_name: String,

    /// Pinned chart versions; latest when unset
    #[serde(default)]
    pub chart_versions: ChartVersions,

    /// Seconds to wait for each add-on's deployments to become available
    #[serde(default = "default_addon_timeout")]
    pub addon_timeout_secs: u64,

    /// Hetzner cloud-controller-manager add-on
    #[serde(default)]
    pub cloud_controller: CloudControllerConfig,
}

impl Default for GitOpsConfig {
    fn default() -> Self {
        Self {
            repo_url: String::new(),
            path: String::new(),
            branch: default_branch(),
            root_app_name: default_root_app(),
            chart_versions: ChartVersions::default(),
            addon_timeout_secs: default_addon_timeout(),
            cloud_controller: CloudControllerConfig::default(),
        }
    }
}

/// Chart versions for the add-ons
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartVersions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_nginx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_manager: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argo_cd: Option<String>,
}

/// Cloud-controller-manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudControllerConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Label selector of the private network handed to the CCM (defaults to `cluster=<name>`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_label: Option<String>,

    #[serde(default = "default_ccm_manifest")]
    pub manifest_url: String,

    /// Seconds to let the CCM initialise nodes before dependent add-ons go in
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
}

impl Default for CloudControllerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            network_label: None,
            manifest_url: default_ccm_manifest(),
            settle_secs: default_settle_secs(),
        }
    }
}

/// Poll intervals and timeouts. An unset timeout waits until the operator interrupts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub talos_api_timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_api_timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes_timeout_secs: Option<u64>,

    #[serde(default = "default_lb_timeout")]
    pub load_balancer_timeout_secs: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            dns_timeout_secs: None,
            talos_api_timeout_secs: None,
            kubernetes_api_timeout_secs: None,
            nodes_timeout_secs: None,
            load_balancer_timeout_secs: default_lb_timeout(),
        }
    }
}

/// Resolved durations used by the orchestrator
#[derive(Debug, Clone)]
pub struct Waits {
    pub interval: Duration,
    pub dns: Option<Duration>,
    pub talos_api: Option<Duration>,
    pub kubernetes_api: Option<Duration>,
    pub nodes: Option<Duration>,
    pub load_balancer: Duration,
    pub settle: Duration,
}

impl Waits {
    pub fn from_config(config: &ClusterConfig) -> Self {
        let w = &config.waits;
        Self {
            interval: Duration::from_secs(w.poll_interval_secs),
            dns: w.dns_timeout_secs.map(Duration::from_secs),
            talos_api: w.talos_api_timeout_secs.map(Duration::from_secs),
            kubernetes_api: w.kubernetes_api_timeout_secs.map(Duration::from_secs),
            nodes: w.nodes_timeout_secs.map(Duration::from_secs),
            load_balancer: Duration::from_secs(w.load_balancer_timeout_secs),
            settle: Duration::from_secs(config.gitops.cloud_controller.settle_secs),
        }
    }

    #[cfg(test)]
    pub fn immediate() -> Self {
        Self {
            interval: Duration::from_millis(1),
            dns: None,
            talos_api: None,
            kubernetes_api: None,
            nodes: None,
            load_balancer: Duration::from_secs(5),
            settle: Duration::ZERO,
        }
    }
}

/// Local files generated for a cluster
#[derive(Debug, Clone)]
pub struct ClusterPaths {
    /// Talos machine configs and talosconfig
    pub config_dir: PathBuf,
    pub kubeconfig: PathBuf,
}

impl ClusterPaths {
    pub fn new(output_dir: &Path, cluster_name: &str) -> Self {
        Self {
            config_dir: output_dir.join(cluster_name),
            kubeconfig: output_dir.join(format!("{}.kubeconfig", cluster_name)),
        }
    }
}

fn default_image() -> String {
    "debian-12".to_string()
}

fn default_load_balancer_type() -> String {
    "lb11".to_string()
}

fn default_allowed_cidrs() -> Vec<String> {
    vec!["0.0.0.0/0".to_string(), "::/0".to_string()]
}

fn default_install_disk() -> String {
    "/dev/sda".to_string()
}

fn default_one() -> u32 {
    1
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_root_app() -> String {
    "root".to_string()
}

fn default_addon_timeout() -> u64 {
    300
}

fn default_ccm_manifest() -> String {
    DEFAULT_CCM_MANIFEST_URL.to_string()
}

fn default_settle_secs() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    10
}

fn default_lb_timeout() -> u64 {
    300
}

impl ClusterConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", path.display(), e))?;
        let config: ClusterConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cluster_name.is_empty() {
            anyhow::bail!("cluster_name cannot be empty");
        }

        if !self
            .cluster_name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            anyhow::bail!(
                "cluster_name must be lowercase alphanumerics and '-': {}",
                self.cluster_name
            );
        }

        if self.dns_name.is_empty() || !self.dns_name.contains('.') {
            anyhow::bail!("dns_name must be a fully qualified hostname");
        }

        if self.control_plane_count() == 0 {
            anyhow::bail!("at least one control plane node is required");
        }

        if self.hcloud.iso.is_empty() {
            anyhow::bail!("hcloud.iso must name the Talos ISO to boot from");
        }

        // Validate network CIDRs
        self.validate_cidr(&self.hcloud.network.cidr)?;
        self.validate_cidr(&self.hcloud.network.subnet_cidr)?;
        for cidr in &self.hcloud.firewall.api_source_cidrs {
            self.validate_cidr(cidr)?;
        }

        if self.waits.poll_interval_secs == 0 {
            anyhow::bail!("waits.poll_interval_secs must be at least 1");
        }

        Ok(())
    }

    /// Validate the settings only `gitops` commands need
    pub fn validate_gitops(&self) -> anyhow::Result<()> {
        let url = url::Url::parse(&self.gitops.repo_url)
            .map_err(|e| anyhow::anyhow!("gitops.repo_url is not a valid URL: {}", e))?;
        if url.scheme() != "https" && url.scheme() != "ssh" {
            anyhow::bail!("gitops.repo_url must use https or ssh: {}", url);
        }

        if self.gitops.path.is_empty() {
            anyhow::bail!("gitops.path cannot be empty");
        }

        if self.gitops.cloud_controller.enabled {
            url::Url::parse(&self.gitops.cloud_controller.manifest_url).map_err(|e| {
                anyhow::anyhow!("gitops.cloud_controller.manifest_url is invalid: {}", e)
            })?;
        }

        Ok(())
    }

    /// Validate CIDR notation
    fn validate_cidr(&self, cidr: &str) -> anyhow::Result<()> {
        let (addr, prefix) = cidr
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("Invalid CIDR notation: {}", cidr))?;
        let addr: std::net::IpAddr = addr
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid CIDR address: {}", cidr))?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        match prefix.parse::<u8>() {
            Ok(p) if p <= max => Ok(()),
            _ => anyhow::bail!("Invalid CIDR prefix: {}", cidr),
        }
    }

    pub fn control_plane_count(&self) -> u32 {
        self.control_planes.iter().map(|cp| cp.count).sum()
    }

    pub fn worker_count(&self) -> u32 {
        self.workers.iter().map(|w| w.count).sum()
    }

    pub fn total_node_count(&self) -> u32 {
        self.control_plane_count() + self.worker_count()
    }

    /// Kubernetes API endpoint handed to Talos
    pub fn cluster_endpoint(&self) -> String {
        format!("https://{}:6443", self.dns_name)
    }

    /// Label selector of the network handed to the cloud controller
    pub fn ccm_network_label(&self) -> String {
        self.gitops
            .cloud_controller
            .network_label
            .clone()
            .unwrap_or_else(|| format!("cluster={}", self.cluster_name))
    }

    /// Generate an example configuration file
    pub fn example() -> Self {
        Self {
            cluster_name: "talos-cluster".to_string(),
            dns_name: "kube.example.com".to_string(),
            hcloud: HetznerCloudConfig {
                token: None,
                location: "fsn1".to_string(),
                network: NetworkConfig {
                    cidr: "10.0.0.0/16".to_string(),
                    subnet_cidr: "10.0.1.0/24".to_string(),
                    zone: "eu-central".to_string(),
                },
                image: default_image(),
                iso: "talos-v1.9.0-amd64".to_string(),
                load_balancer_type: default_load_balancer_type(),
                firewall: FirewallConfig::default(),
            },
            talos: TalosConfig {
                version: "v1.9.0".to_string(),
                kubernetes_version: "1.32.0".to_string(),
                install_disk: default_install_disk(),
                config_patches: vec![],
            },
            control_planes: vec![NodeConfig {
                name: "control-plane".to_string(),
                server_type: "cx22".to_string(),
                count: 1,
                labels: HashMap::new(),
            }],
            workers: vec![NodeConfig {
                name: "worker".to_string(),
                server_type: "cx32".to_string(),
                count: 2,
                labels: HashMap::new(),
            }],
            gitops: GitOpsConfig {
                repo_url: "https://github.com/example/cluster-config".to_string(),
                path: "apps".to_string(),
                branch: default_branch(),
                root_app_name: default_root_app(),
                chart_versions: ChartVersions::default(),
                addon_timeout_secs: default_addon_timeout(),
                cloud_controller: CloudControllerConfig {
                    enabled: true,
                    ..Default::default()
                },
            },
            waits: WaitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let mut config = ClusterConfig::example();
        assert!(config.validate().is_ok());

        config.cluster_name = String::new();
        assert!(config.validate().is_err());

        config.cluster_name = "Test_Cluster".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_control_plane_required() {
        let mut config = ClusterConfig::example();
        config.control_planes[0].count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = ClusterConfig::example();
        config.waits.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        config.waits.poll_interval_secs = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cidr_validation() {
        let config = ClusterConfig::example();
        assert!(config.validate_cidr("10.0.0.0/16").is_ok());
        assert!(config.validate_cidr("::/0").is_ok());
        assert!(config.validate_cidr("invalid").is_err());
        assert!(config.validate_cidr("10.0.0.0/33").is_err());
        assert!(config.validate_cidr("10.0.0/16").is_err());
    }

    #[test]
    fn test_gitops_validation() {
        let mut config = ClusterConfig::example();
        assert!(config.validate_gitops().is_ok());

        config.gitops.repo_url = "not a url".to_string();
        assert!(config.validate_gitops().is_err());

        config.gitops.repo_url = "http://github.com/example/repo".to_string();
        assert!(config.validate_gitops().is_err());

        config.gitops.repo_url = "https://github.com/example/repo".to_string();
        config.gitops.path = String::new();
        assert!(config.validate_gitops().is_err());
    }

    #[test]
    fn test_example_is_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.yaml");
        std::fs::write(&path, serde_yaml::to_string(&ClusterConfig::example()).unwrap()).unwrap();

        let config = ClusterConfig::from_file(&path).unwrap();
        assert_eq!(config.cluster_name, ClusterConfig::example().cluster_name);
        assert_eq!(config.total_node_count(), ClusterConfig::example().total_node_count());
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = r#"
cluster_name: test-cluster
dns_name: kube.test.example
hcloud:
  location: fsn1
  iso: talos-amd64
  network:
    cidr: 10.0.0.0/16
    subnet_cidr: 10.0.1.0/24
    zone: eu-central
talos:
  version: v1.9.0
  kubernetes_version: 1.32.0
control_planes:
  - name: cp
    server_type: cx22
workers:
  - name: worker
    server_type: cx22
"#;
        let config: ClusterConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.total_node_count(), 2);
        assert_eq!(config.hcloud.image, "debian-12");
        assert_eq!(config.hcloud.load_balancer_type, "lb11");
        assert_eq!(config.talos.install_disk, "/dev/sda");
        assert_eq!(config.waits.poll_interval_secs, 10);
        assert!(config.waits.dns_timeout_secs.is_none());
        assert!(!config.gitops.cloud_controller.enabled);
        assert_eq!(config.gitops.branch, "main");
        assert_eq!(config.gitops.root_app_name, "root");
        assert_eq!(config.ccm_network_label(), "cluster=test-cluster");
        assert_eq!(config.cluster_endpoint(), "https://kube.test.example:6443");
    }

    #[test]
    fn test_waits_from_config() {
        let mut config = ClusterConfig::example();
        config.waits.dns_timeout_secs = Some(600);

        let waits = Waits::from_config(&config);
        assert_eq!(waits.interval, Duration::from_secs(10));
        assert_eq!(waits.dns, Some(Duration::from_secs(600)));
        assert_eq!(waits.nodes, None);
        assert_eq!(waits.settle, Duration::from_secs(30));
    }

    #[test]
    fn test_cluster_paths() {
        let paths = ClusterPaths::new(Path::new("./output"), "test-cluster");
        assert_eq!(paths.config_dir, PathBuf::from("./output/test-cluster"));
        assert_eq!(
            paths.kubeconfig,
            PathBuf::from("./output/test-cluster.kubeconfig")
        );
    }
}
