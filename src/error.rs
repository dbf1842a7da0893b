/// Checked failures that stop a run before or instead of any mutation
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("{tool} is not installed or not in PATH. Please install from {install_url}")]
    MissingTool {
        tool: &'static str,
        install_url: &'static str,
    },

    #[error(
        "No Hetzner Cloud credentials found. Set HCLOUD_TOKEN, put a token in the config, \
         or activate a context with `hcloud context use <name>`"
    )]
    NoCloudContext,

    #[error("Cannot reach the cluster using {kubeconfig}: {reason}")]
    ClusterUnreachable { kubeconfig: String, reason: String },

    #[error("Aborted by operator")]
    Aborted,
}
