/// Resource operations the orchestrator needs from Hetzner Cloud
use anyhow::Result;
use async_trait::async_trait;

use super::client::{
    CreateFirewallRequest, CreateFloatingIpRequest, CreateLoadBalancerRequest,
    CreateNetworkRequest, CreateServerRequest,
};
use super::models::{Firewall, FloatingIp, LoadBalancer, Network, Server};

/// Mutating calls return once the API reports the triggered action finished.
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn find_network(&self, name: &str) -> Result<Option<Network>>;
    async fn create_network(&self, request: CreateNetworkRequest) -> Result<Network>;
    async fn list_networks(&self, label_selector: &str) -> Result<Vec<Network>>;
    async fn delete_network(&self, network_id: u64) -> Result<()>;

    async fn find_firewall(&self, name: &str) -> Result<Option<Firewall>>;
    async fn create_firewall(&self, request: CreateFirewallRequest) -> Result<Firewall>;
    async fn list_firewalls(&self, label_selector: &str) -> Result<Vec<Firewall>>;
    async fn delete_firewall(&self, firewall_id: u64) -> Result<()>;

    async fn find_server(&self, name: &str) -> Result<Option<Server>>;
    async fn create_server(&self, request: CreateServerRequest) -> Result<Server>;
    async fn list_servers(&self, label_selector: &str) -> Result<Vec<Server>>;
    async fn delete_server(&self, server_id: u64) -> Result<()>;
    async fn attach_iso(&self, server_id: u64, iso: &str) -> Result<()>;
    async fn reset_server(&self, server_id: u64) -> Result<()>;

    async fn find_floating_ip(&self, name: &str) -> Result<Option<FloatingIp>>;
    async fn create_floating_ip(&self, request: CreateFloatingIpRequest) -> Result<FloatingIp>;
    async fn assign_floating_ip(&self, floating_ip_id: u64, server_id: u64) -> Result<()>;
    async fn list_floating_ips(&self, label_selector: &str) -> Result<Vec<FloatingIp>>;
    async fn delete_floating_ip(&self, floating_ip_id: u64) -> Result<()>;

    async fn find_load_balancer(&self, name: &str) -> Result<Option<LoadBalancer>>;
    async fn get_load_balancer(&self, load_balancer_id: u64) -> Result<LoadBalancer>;
    async fn create_load_balancer(
        &self,
        request: CreateLoadBalancerRequest,
    ) -> Result<LoadBalancer>;
    async fn add_load_balancer_target(&self, load_balancer_id: u64, server_id: u64)
        -> Result<()>;
    async fn list_load_balancers(&self, label_selector: &str) -> Result<Vec<LoadBalancer>>;
    async fn delete_load_balancer(&self, load_balancer_id: u64) -> Result<()>;
}
