/// Cluster provisioning: cloud resources, endpoint, DNS gate and Talos bring-up
use anyhow::{Context, Result};
use std::net::IpAddr;
use tracing::{debug, info};

use super::{Backends, NodeTarget};
use crate::config::{ClusterConfig, ClusterPaths, Waits};
use crate::hcloud::models::Server;
use crate::hcloud::server::ServerSpec;
use crate::hcloud::{
    ClusterEndpoint, EndpointManager, FirewallManager, NetworkManager, NodeRole, ServerManager,
};
use crate::k8s::{KubernetesClient, NodeManager};
use crate::talos::{
    node_patch, GeneratedConfigs, NodeApi, SecuredNode, TalosClient, TalosConfigGenerator,
};
use crate::utils::polling::PollingConfig;
use crate::utils::probe::resolves_exactly;

const KUBERNETES_API_PORT: u16 = 6443;

/// Brings a cluster from nothing (or from a partial previous run) to healthy
pub struct Provisioner<'a> {
    config: &'a ClusterConfig,
    paths: &'a ClusterPaths,
    backends: Backends,
    waits: Waits,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        config: &'a ClusterConfig,
        paths: &'a ClusterPaths,
        backends: Backends,
        waits: Waits,
    ) -> Self {
        Self {
            config,
            paths,
            backends,
            waits,
        }
    }

    /// talosctl and kubectl must be on PATH before anything is created
    pub async fn preflight(&self) -> Result<()> {
        let runner = self.backends.runner.as_ref();
        TalosClient::check_talosctl_installed(runner).await?;
        KubernetesClient::check_kubectl_installed(runner).await
    }

    pub async fn run(&self) -> Result<()> {
        let config = self.config;
        info!(
            "Provisioning cluster {} in {}",
            config.cluster_name, config.hcloud.location
        );

        self.preflight().await?;

        let network = NetworkManager::new(self.backends.cloud.clone())
            .ensure_network(&config.cluster_name, &config.hcloud.network)
            .await?;
        let firewall = FirewallManager::new(self.backends.cloud.clone())
            .ensure_firewall(&config.cluster_name, &config.hcloud.firewall)
            .await?;

        let targets = self.ensure_servers(network.id, firewall.id).await?;
        let endpoint = self.ensure_endpoint(network.id, &targets).await?;
        self.wait_for_dns(&endpoint).await?;

        let configs = self.generate_configs(&endpoint).await?;
        let talos = TalosClient::new(
            self.backends.runner.clone(),
            configs.talosconfig.clone(),
            self.waits.interval,
            self.waits.talos_api,
        );
        talos
            .configure_endpoints(&[endpoint.ip().to_string()])
            .await?;

        // Control planes come first, so the first secured node is one
        let mut secured = Vec::with_capacity(targets.len());
        for target in &targets {
            secured.push(self.configure_node(&talos, &configs, &endpoint, target).await?);
        }
        let first = secured
            .first()
            .context("No control plane node to bootstrap")?;

        talos.bootstrap(first).await?;
        self.wait_for_kubernetes_api(&endpoint).await?;
        talos
            .generate_kubeconfig(first.ip(), &self.paths.kubeconfig)
            .await?;

        let kube =
            KubernetesClient::new(self.backends.runner.clone(), self.paths.kubeconfig.clone());
        NodeManager::new(&kube)
            .wait_for_ready_nodes(
                config.total_node_count() as usize,
                self.waits.interval,
                self.waits.nodes,
            )
            .await?;

        talos.health(first.ip()).await?;

        info!("✓ Cluster {} is ready", config.cluster_name);
        info!("");
        info!("Cluster details:");
        info!("  Endpoint: {} ({})", config.cluster_endpoint(), endpoint);
        info!("  Control planes: {}", config.control_plane_count());
        info!("  Workers: {}", config.worker_count());
        info!("");
        info!("Configuration files:");
        info!("  Talosconfig: {}", configs.talosconfig.display());
        info!("  Kubeconfig: {}", self.paths.kubeconfig.display());
        info!("");
        info!("To access your cluster:");
        info!("  export KUBECONFIG={}", self.paths.kubeconfig.display());
        info!("  kubectl get nodes");

        Ok(())
    }

    /// Create or adopt every server, one at a time, and boot each from the Talos ISO
    async fn ensure_servers(&self, network_id: u64, firewall_id: u64) -> Result<Vec<NodeTarget>> {
        let config = self.config;
        let servers = ServerManager::new(self.backends.cloud.clone());

        let pools = config
            .control_planes
            .iter()
            .map(|pool| (pool, NodeRole::ControlPlane))
            .chain(config.workers.iter().map(|pool| (pool, NodeRole::Worker)));

        let mut targets = Vec::new();
        for (pool, role) in pools {
            for index in 0..pool.count {
                let spec = ServerSpec {
                    cluster_name: &config.cluster_name,
                    pool,
                    index,
                    role,
                    location: &config.hcloud.location,
                    image: &config.hcloud.image,
                    network_id,
                    firewall_id,
                };

                let server = servers.ensure_server(&spec).await?;
                servers.boot_from_iso(&server, &config.hcloud.iso).await?;

                let ip = ServerManager::get_server_ip(&server)
                    .with_context(|| format!("Server {} has no public IPv4", server.name))?;
                targets.push(NodeTarget { server, role, ip });
            }
        }

        Ok(targets)
    }

    /// Floating IP for a single control plane, load balancer otherwise
    async fn ensure_endpoint(
        &self,
        network_id: u64,
        targets: &[NodeTarget],
    ) -> Result<ClusterEndpoint> {
        let config = self.config;
        let endpoints = EndpointManager::new(
            self.backends.cloud.clone(),
            self.waits.interval,
            self.waits.load_balancer,
        );

        let control_planes: Vec<Server> = targets
            .iter()
            .filter(|t| t.role == NodeRole::ControlPlane)
            .map(|t| t.server.clone())
            .collect();

        let endpoint = match control_planes.as_slice() {
            [] => anyhow::bail!("At least one control plane server is required"),
            [only] => {
                endpoints
                    .ensure_floating_ip(&config.cluster_name, &config.hcloud.location, only)
                    .await?
            }
            many => {
                endpoints
                    .ensure_load_balancer(
                        &config.cluster_name,
                        &config.hcloud.location,
                        &config.hcloud.load_balancer_type,
                        network_id,
                        many,
                    )
                    .await?
            }
        };

        info!("Cluster endpoint: {}", endpoint);
        Ok(endpoint)
    }

    /// Block until the API hostname resolves to the endpoint and nothing else
    async fn wait_for_dns(&self, endpoint: &ClusterEndpoint) -> Result<()> {
        let host = &self.config.dns_name;
        let ip = endpoint.ip();

        info!("Create this DNS record if it does not exist yet:");
        info!("  {} A {}", host, ip);

        let polling = PollingConfig::new(
            self.waits.dns,
            self.waits.interval,
            format!("Waiting for {} to resolve to {}", host, ip),
        );

        polling
            .poll_until(|| async {
                match self.backends.probe.resolve_ipv4(host).await {
                    Ok(addrs) => {
                        debug!("{} resolves to {:?}", host, addrs);
                        Ok(resolves_exactly(&addrs, ip))
                    }
                    Err(e) => {
                        debug!("{:#}", e);
                        Ok(false)
                    }
                }
            })
            .await
    }

    async fn generate_configs(&self, endpoint: &ClusterEndpoint) -> Result<GeneratedConfigs> {
        let config = self.config;
        let generator = TalosConfigGenerator::new(
            config.cluster_name.clone(),
            config.cluster_endpoint(),
            config.talos.clone(),
            vec![config.dns_name.clone(), endpoint.ip().to_string()],
        );

        generator
            .generate_configs(self.backends.runner.as_ref(), &self.paths.config_dir)
            .await
    }

    /// Adopt a node that kept its config, otherwise apply one and wait for it to take
    async fn configure_node(
        &self,
        talos: &TalosClient,
        configs: &GeneratedConfigs,
        endpoint: &ClusterEndpoint,
        target: &NodeTarget,
    ) -> Result<SecuredNode> {
        match talos.wait_for_node(target.name(), &target.ip).await? {
            NodeApi::Configured(node) => {
                info!("{} is already configured", target.name());
                Ok(node)
            }
            NodeApi::Maintenance => {
                let floating_ip = match target.role {
                    NodeRole::ControlPlane => endpoint.floating_ip(),
                    NodeRole::Worker => None,
                };
                let patch = node_patch(target.name(), target.server.id, floating_ip);

                talos
                    .apply_config(
                        target.name(),
                        &target.ip,
                        configs.for_role(target.role),
                        &patch,
                    )
                    .await?;
                talos.wait_for_secure_api(target.name(), &target.ip).await
            }
        }
    }

    async fn wait_for_kubernetes_api(&self, endpoint: &ClusterEndpoint) -> Result<()> {
        let ip = IpAddr::V4(endpoint.ip());
        let polling = PollingConfig::new(
            self.waits.kubernetes_api,
            self.waits.interval,
            format!("Waiting for Kubernetes API on {}:{}", ip, KUBERNETES_API_PORT),
        );

        polling
            .poll_until(|| async {
                Ok(self.backends.probe.port_open(ip, KUBERNETES_API_PORT).await)
            })
            .await
    }
}
