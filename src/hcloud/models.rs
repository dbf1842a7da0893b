/// Hetzner Cloud API data models
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hetzner Cloud server resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: u64,
    pub name: String,
    pub status: String,
    pub public_net: PublicNetwork,
    #[serde(default)]
    pub private_net: Vec<PrivateNetwork>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Public network configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublicNetwork {
    pub ipv4: Option<IPv4>,
    #[serde(default)]
    pub floating_ips: Vec<u64>,
}

/// IPv4 address information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IPv4 {
    pub ip: String,
}

/// Private network attachment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateNetwork {
    pub network: u64,
    pub ip: String,
}

/// Network resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: u64,
    pub name: String,
    pub ip_range: String,
    #[serde(default)]
    pub servers: Vec<u64>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Firewall resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Firewall {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub rules: Vec<FirewallRule>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Firewall rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallRule {
    pub direction: String,
    #[serde(default)]
    pub source_ips: Vec<String>,
    #[serde(default)]
    pub destination_ips: Vec<String>,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Floating IP resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: u64,
    pub name: String,
    pub ip: String,
    #[serde(rename = "type")]
    pub ip_type: String,
    pub server: Option<u64>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Load balancer resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub id: u64,
    pub name: String,
    pub public_net: LoadBalancerPublicNet,
    #[serde(default)]
    pub targets: Vec<LoadBalancerTarget>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl LoadBalancer {
    /// Public IPv4, once the API has assigned one
    pub fn ipv4(&self) -> Option<&str> {
        self.public_net.ipv4.ip.as_deref()
    }

    /// Whether a server is registered as a target
    pub fn has_server_target(&self, server_id: u64) -> bool {
        self.targets
            .iter()
            .any(|t| t.server.as_ref().map(|s| s.id) == Some(server_id))
    }
}

/// Load balancer public addresses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadBalancerPublicNet {
    #[serde(default)]
    pub ipv4: LoadBalancerIp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadBalancerIp {
    pub ip: Option<String>,
}

/// Load balancer target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerTarget {
    #[serde(rename = "type")]
    pub target_type: String,
    pub server: Option<ResourceRef>,
}

/// `{"id": ...}` reference used across the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: u64,
}

/// Action represents an asynchronous operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: u64,
    pub command: String,
    pub status: String,
    #[serde(default)]
    pub progress: u32,
    pub error: Option<ActionError>,
}

/// Action error details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionError {
    pub code: String,
    pub message: String,
}

/// Server creation response
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateServerResponse {
    pub server: Server,
    pub action: Action,
    #[serde(default)]
    pub next_actions: Vec<Action>,
}

#[derive(Debug, Deserialize)]
pub struct ServerResponse {
    pub server: Server,
}

#[derive(Debug, Deserialize)]
pub struct ServerListResponse {
    pub servers: Vec<Server>,
    #[serde(default)]
    pub meta: Meta,
}

#[derive(Debug, Deserialize)]
pub struct NetworkResponse {
    pub network: Network,
}

#[derive(Debug, Deserialize)]
pub struct NetworkListResponse {
    pub networks: Vec<Network>,
    #[serde(default)]
    pub meta: Meta,
}

#[derive(Debug, Deserialize)]
pub struct FirewallResponse {
    pub firewall: Firewall,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Deserialize)]
pub struct FirewallListResponse {
    pub firewalls: Vec<Firewall>,
    #[serde(default)]
    pub meta: Meta,
}

#[derive(Debug, Deserialize)]
pub struct FloatingIpResponse {
    pub floating_ip: FloatingIp,
    pub action: Option<Action>,
}

#[derive(Debug, Deserialize)]
pub struct FloatingIpListResponse {
    pub floating_ips: Vec<FloatingIp>,
    #[serde(default)]
    pub meta: Meta,
}

#[derive(Debug, Deserialize)]
pub struct LoadBalancerResponse {
    pub load_balancer: LoadBalancer,
    pub action: Option<Action>,
}

#[derive(Debug, Deserialize)]
pub struct LoadBalancerListResponse {
    pub load_balancers: Vec<LoadBalancer>,
    #[serde(default)]
    pub meta: Meta,
}

/// Listing metadata; absent on single-resource responses
#[derive(Debug, Default, Deserialize)]
pub struct Meta {
    pub pagination: Option<Pagination>,
}

impl Meta {
    pub fn next_page(&self) -> Option<u32> {
        self.pagination.as_ref().and_then(|p| p.next_page)
    }
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub next_page: Option<u32>,
}

/// Action response
#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    pub action: Action,
}

/// Error response from API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ApiError,
}

/// API error details
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}
