/// Stable public address for the Kubernetes and Talos APIs
use anyhow::{Context, Result};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::api::CloudApi;
use super::client::{CreateFloatingIpRequest, CreateLoadBalancerRequest, LoadBalancerService};
use super::models::{LoadBalancer, Server};
use super::{cluster_labels, label_selector};
use crate::utils::polling::PollingConfig;

/// Ports published by the control-plane load balancer
const LOAD_BALANCED_PORTS: [u16; 2] = [6443, 50000];

pub fn floating_ip_name(cluster_name: &str) -> String {
    format!("{}-ip", cluster_name)
}

pub fn load_balancer_name(cluster_name: &str) -> String {
    format!("{}-lb", cluster_name)
}

/// Where the cluster endpoint lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEndpoint {
    /// Single control plane: floating IP assigned to it
    FloatingIp { id: u64, ip: Ipv4Addr },
    /// Several control planes behind a load balancer
    LoadBalancer { id: u64, ip: Ipv4Addr },
}

impl ClusterEndpoint {
    pub fn ip(&self) -> Ipv4Addr {
        match self {
            ClusterEndpoint::FloatingIp { ip, .. }
            | ClusterEndpoint::LoadBalancer { ip, .. } => *ip,
        }
    }

    /// The floating IP control-plane nodes must carry on their interface
    pub fn floating_ip(&self) -> Option<Ipv4Addr> {
        match self {
            ClusterEndpoint::FloatingIp { ip, .. } => Some(*ip),
            ClusterEndpoint::LoadBalancer { .. } => None,
        }
    }
}

impl std::fmt::Display for ClusterEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterEndpoint::FloatingIp { ip, .. } => write!(f, "floating IP {}", ip),
            ClusterEndpoint::LoadBalancer { ip, .. } => write!(f, "load balancer {}", ip),
        }
    }
}

fn parse_ip(value: &str) -> Result<Ipv4Addr> {
    value
        .parse()
        .with_context(|| format!("Invalid IPv4 address from API: {}", value))
}

/// Creates, adopts and deletes floating IPs and load balancers
pub struct EndpointManager {
    cloud: Arc<dyn CloudApi>,
    interval: Duration,
    ip_timeout: Duration,
}

impl EndpointManager {
    pub fn new(cloud: Arc<dyn CloudApi>, interval: Duration, ip_timeout: Duration) -> Self {
        Self {
            cloud,
            interval,
            ip_timeout,
        }
    }

    /// Create or adopt `<cluster>-ip` and make sure it points at the control plane
    pub async fn ensure_floating_ip(
        &self,
        cluster_name: &str,
        location: &str,
        control_plane: &Server,
    ) -> Result<ClusterEndpoint> {
        let name = floating_ip_name(cluster_name);

        let floating_ip = match self.cloud.find_floating_ip(&name).await? {
            Some(existing) => {
                info!("Found existing floating IP: {} ({})", existing.name, existing.ip);
                existing
            }
            None => {
                info!("Creating floating IP {} in {}", name, location);
                self.cloud
                    .create_floating_ip(CreateFloatingIpRequest {
                        name,
                        ip_type: "ipv4".to_string(),
                        home_location: location.to_string(),
                        server: None,
                        labels: cluster_labels(cluster_name),
                    })
                    .await
                    .context("Failed to create floating IP")?
            }
        };

        if floating_ip.server != Some(control_plane.id) {
            info!(
                "Assigning floating IP {} to {}",
                floating_ip.ip, control_plane.name
            );
            self.cloud
                .assign_floating_ip(floating_ip.id, control_plane.id)
                .await
                .context("Failed to assign floating IP")?;
        }

        Ok(ClusterEndpoint::FloatingIp {
            id: floating_ip.id,
            ip: parse_ip(&floating_ip.ip)?,
        })
    }

    /// Create or adopt `<cluster>-lb`, register every control plane and wait for its IP
    pub async fn ensure_load_balancer(
        &self,
        cluster_name: &str,
        location: &str,
        load_balancer_type: &str,
        network_id: u64,
        control_planes: &[Server],
    ) -> Result<ClusterEndpoint> {
        let name = load_balancer_name(cluster_name);

        let lb = match self.cloud.find_load_balancer(&name).await? {
            Some(existing) => {
                info!("Found existing load balancer: {} (ID: {})", existing.name, existing.id);
                existing
            }
            None => {
                info!("Creating load balancer {} ({})", name, load_balancer_type);
                self.cloud
                    .create_load_balancer(CreateLoadBalancerRequest {
                        name,
                        load_balancer_type: load_balancer_type.to_string(),
                        location: location.to_string(),
                        network: network_id,
                        services: LOAD_BALANCED_PORTS
                            .iter()
                            .map(|port| LoadBalancerService::tcp(*port))
                            .collect(),
                        labels: cluster_labels(cluster_name),
                    })
                    .await
                    .context("Failed to create load balancer")?
            }
        };

        for server in control_planes {
            self.register_target(&lb, server).await?;
        }

        let ip = self.wait_for_ip(&lb).await?;
        Ok(ClusterEndpoint::LoadBalancer { id: lb.id, ip })
    }

    /// Add the server as a target until the load balancer lists it
    async fn register_target(&self, lb: &LoadBalancer, server: &Server) -> Result<()> {
        let polling = PollingConfig::new(
            None,
            self.interval,
            format!("Registering {} with load balancer {}", server.name, lb.name),
        );

        polling
            .poll_until(|| async {
                let current = self.cloud.get_load_balancer(lb.id).await?;
                if current.has_server_target(server.id) {
                    return Ok(true);
                }
                if let Err(e) = self.cloud.add_load_balancer_target(lb.id, server.id).await {
                    warn!("Adding target {} failed, retrying: {:#}", server.name, e);
                }
                Ok(false)
            })
            .await
    }

    async fn wait_for_ip(&self, lb: &LoadBalancer) -> Result<Ipv4Addr> {
        if let Some(ip) = lb.ipv4() {
            return parse_ip(ip);
        }

        let polling = PollingConfig::new(
            Some(self.ip_timeout),
            self.interval,
            format!("Waiting for load balancer {} public IP", lb.name),
        );

        polling
            .poll(|| async {
                let current = self.cloud.get_load_balancer(lb.id).await?;
                match current.ipv4() {
                    Some(ip) => Ok(Some(parse_ip(ip)?)),
                    None => Ok(None),
                }
            })
            .await
    }

    /// Delete floating IPs and load balancers carrying the cluster label
    pub async fn delete_cluster_endpoints(&self, cluster_name: &str) -> Result<usize> {
        let selector = label_selector(cluster_name);
        let floating_ips = self
            .cloud
            .list_floating_ips(&selector)
            .await
            .context("Failed to list floating IPs")?;
        let load_balancers = self
            .cloud
            .list_load_balancers(&selector)
            .await
            .context("Failed to list load balancers")?;

        if floating_ips.is_empty() && load_balancers.is_empty() {
            info!("No floating IPs or load balancers found for cluster {}", cluster_name);
            return Ok(0);
        }

        for fip in &floating_ips {
            info!("Deleting floating IP: {} ({})", fip.name, fip.ip);
            self.cloud
                .delete_floating_ip(fip.id)
                .await
                .with_context(|| format!("Failed to delete floating IP {}", fip.name))?;
        }

        for lb in &load_balancers {
            info!("Deleting load balancer: {} (ID: {})", lb.name, lb.id);
            self.cloud
                .delete_load_balancer(lb.id)
                .await
                .with_context(|| format!("Failed to delete load balancer {}", lb.name))?;
        }

        Ok(floating_ips.len() + load_balancers.len())
    }

    /// The cluster's endpoint as it currently exists, if any
    pub async fn current(&self, cluster_name: &str) -> Result<Option<ClusterEndpoint>> {
        if let Some(fip) = self.cloud.find_floating_ip(&floating_ip_name(cluster_name)).await? {
            return Ok(Some(ClusterEndpoint::FloatingIp {
                id: fip.id,
                ip: parse_ip(&fip.ip)?,
            }));
        }

        match self.cloud.find_load_balancer(&load_balancer_name(cluster_name)).await? {
            Some(lb) => match lb.ipv4() {
                Some(ip) => Ok(Some(ClusterEndpoint::LoadBalancer {
                    id: lb.id,
                    ip: parse_ip(ip)?,
                })),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }
}
