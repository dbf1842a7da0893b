/// Talos Linux cluster management
pub mod client;
pub mod config;

pub use client::{NodeApi, SecuredNode, TalosClient};
pub use config::{node_patch, GeneratedConfigs, TalosConfigGenerator};
