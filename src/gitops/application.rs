/// Argo CD root Application
use anyhow::{Context, Result};
use handlebars::Handlebars;
use serde_json::json;

use crate::config::GitOpsConfig;

const TEMPLATE_NAME: &str = "root-application";
const TEMPLATE: &str = include_str!("../../templates/root-application.yaml.hbs");

/// Namespace Argo CD runs in and the root Application is created in
pub const ARGOCD_NAMESPACE: &str = "argocd";

/// Render the Application that points Argo CD at the repository's app tree
pub fn render_root_application(config: &GitOpsConfig) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    // Every value becomes a double-quoted scalar; JSON strings are valid YAML
    handlebars.register_escape_fn(|value| {
        serde_json::to_string(value).unwrap_or_else(|_| String::from("\"\""))
    });
    handlebars
        .register_template_string(TEMPLATE_NAME, TEMPLATE)
        .context("Invalid root Application template")?;

    let data = json!({
        "name": config.root_app_name,
        "namespace": ARGOCD_NAMESPACE,
        "repo_url": config.repo_url,
        "revision": config.branch,
        "path": config.path,
    });

    handlebars
        .render(TEMPLATE_NAME, &data)
        .context("Failed to render root Application")
}
