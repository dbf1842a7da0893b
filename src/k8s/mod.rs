/// Kubernetes cluster operations
pub mod client;
pub mod nodes;
pub mod resources;

pub use client::KubernetesClient;
pub use nodes::NodeManager;
pub use resources::ResourceManager;
