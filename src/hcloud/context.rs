/// Hetzner Cloud credential resolution
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::PreflightError;

/// The subset of the hcloud CLI configuration we read
#[derive(Debug, Default, Deserialize)]
struct CliConfig {
    #[serde(default)]
    active_context: Option<String>,
    #[serde(default)]
    contexts: Vec<CliContext>,
}

#[derive(Debug, Deserialize)]
struct CliContext {
    name: String,
    #[serde(default)]
    token: Option<String>,
}

/// Places a token can come from, highest precedence first
#[derive(Debug, Default)]
pub struct TokenSources {
    pub configured: Option<String>,
    pub env_token: Option<String>,
    pub env_context: Option<String>,
    pub cli_config: Option<PathBuf>,
}

impl TokenSources {
    /// Collect sources from the process environment
    pub fn from_env(configured: Option<String>) -> Self {
        let cli_config = std::env::var_os("HCLOUD_CONFIG")
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|d| d.join("hcloud").join("cli.toml")));

        Self {
            configured,
            env_token: std::env::var("HCLOUD_TOKEN").ok(),
            env_context: std::env::var("HCLOUD_CONTEXT").ok(),
            cli_config,
        }
    }

    /// First non-empty token, or [`PreflightError::NoCloudContext`]
    pub fn resolve(&self) -> Result<String> {
        if let Some(token) = non_empty(self.configured.as_deref()) {
            debug!("Using Hetzner token from configuration");
            return Ok(token);
        }

        if let Some(token) = non_empty(self.env_token.as_deref()) {
            debug!("Using Hetzner token from HCLOUD_TOKEN");
            return Ok(token);
        }

        if let Some(path) = &self.cli_config {
            if let Some(token) = context_token(path, self.env_context.as_deref())? {
                return Ok(token);
            }
        }

        Err(PreflightError::NoCloudContext.into())
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Token of the active context in an hcloud CLI config file
fn context_token(path: &Path, context_override: Option<&str>) -> Result<Option<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Cannot read {}", path.display())),
    };

    let config: CliConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse hcloud config {}", path.display()))?;

    let Some(active) = non_empty(context_override).or(config.active_context) else {
        return Ok(None);
    };

    let token = config
        .contexts
        .into_iter()
        .find(|c| c.name == active)
        .and_then(|c| non_empty(c.token.as_deref()));

    if token.is_some() {
        debug!("Using Hetzner token from hcloud context {}", active);
    }
    Ok(token)
}
