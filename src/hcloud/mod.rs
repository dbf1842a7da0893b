/// Hetzner Cloud API client implementation
pub mod api;
pub mod client;
pub mod context;
pub mod endpoint;
pub mod firewall;
pub mod models;
pub mod network;
pub mod server;

use std::collections::HashMap;

pub use api::CloudApi;
pub use client::HetznerCloudClient;
pub use endpoint::{ClusterEndpoint, EndpointManager};
pub use firewall::FirewallManager;
pub use network::NetworkManager;
pub use server::{NodeRole, ServerManager};

/// Value of the `managed-by` label on everything this tool creates
pub const MANAGED_BY: &str = "hcloud-talos";

/// Labels shared by every resource of a cluster
pub fn cluster_labels(cluster_name: &str) -> HashMap<String, String> {
    [
        ("cluster".to_string(), cluster_name.to_string()),
        ("managed-by".to_string(), MANAGED_BY.to_string()),
    ]
    .into_iter()
    .collect()
}

/// Selector matching every resource of a cluster
pub fn label_selector(cluster_name: &str) -> String {
    format!("cluster={}", cluster_name)
}
