/// Hetzner Cloud API client
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::api::CloudApi;
use super::models::*;

const HCLOUD_API_BASE: &str = "https://api.hetzner.cloud/v1";
const ACTION_TIMEOUT_SECS: u64 = 300;
const PAGE_SIZE: &str = "50";

/// Main Hetzner Cloud API client
#[derive(Clone)]
pub struct HetznerCloudClient {
    client: Client,
    base_url: String,
}

impl HetznerCloudClient {
    /// Create a new Hetzner Cloud API client
    pub fn new(api_token: String) -> Result<Self> {
        Self::with_base_url(api_token, HCLOUD_API_BASE)
    }

    /// Create a client against a different API root
    pub fn with_base_url(api_token: String, base_url: impl Into<String>) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", api_token))
                .context("Invalid API token format")?,
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    /// Make a GET request to the API
    pub(crate) async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        self.get_query(endpoint, &[]).await
    }

    /// Make a GET request with query parameters
    pub(crate) async fn get_query<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = self.url(endpoint);
        debug!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .context("Failed to send GET request")?;

        self.handle_response(response).await
    }

    /// Follow `meta.pagination.next_page` until every labelled resource is collected
    async fn list_all<R, T>(
        &self,
        endpoint: &str,
        label_selector: &str,
        split: impl Fn(R) -> (Vec<T>, Meta),
    ) -> Result<Vec<T>>
    where
        R: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut page = 1;
        loop {
            let page_param = page.to_string();
            let response: R = self
                .get_query(
                    endpoint,
                    &[
                        ("label_selector", label_selector),
                        ("per_page", PAGE_SIZE),
                        ("page", &page_param),
                    ],
                )
                .await?;
            let (batch, meta) = split(response);
            items.extend(batch);

            match meta.next_page() {
                Some(next) if next > page => page = next,
                _ => return Ok(items),
            }
        }
    }

    /// Make a POST request to the API
    pub(crate) async fn post<T: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<R> {
        let url = self.url(endpoint);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .context("Failed to send POST request")?;

        self.handle_response(response).await
    }

    /// Make a DELETE request to the API, returning the response body
    pub(crate) async fn delete(&self, endpoint: &str) -> Result<String> {
        let url = self.url(endpoint);
        debug!("DELETE {}", url);

        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .context("Failed to send DELETE request")?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_success() {
            Ok(body)
        } else {
            Err(api_error(status, &body))
        }
    }

    /// Handle API response, checking for errors
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json::<T>()
                .await
                .context("Failed to parse API response")
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(api_error(status, &error_text))
        }
    }

    /// Wait for an action to complete
    pub async fn wait_for_action(&self, action_id: u64, timeout_secs: u64) -> Result<Action> {
        use tokio::time::{sleep, Duration};

        let start = std::time::Instant::now();
        let timeout = Duration::from_secs(timeout_secs);

        loop {
            let action = self.get_action(action_id).await?;

            match action.status.as_str() {
                "success" => return Ok(action),
                "error" => {
                    let error_msg = action
                        .error
                        .map(|e| format!("{}: {}", e.code, e.message))
                        .unwrap_or_else(|| "Unknown error".to_string());
                    anyhow::bail!("Action {} failed: {}", action_id, error_msg);
                }
                "running" => {
                    if start.elapsed() > timeout {
                        anyhow::bail!(
                            "Action {} timed out after {} seconds",
                            action_id,
                            timeout_secs
                        );
                    }
                    debug!("Action {} progress: {}%", action_id, action.progress);
                    sleep(Duration::from_secs(2)).await;
                }
                status => {
                    warn!("Unknown action status: {}", status);
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }

    /// Get action status
    pub async fn get_action(&self, action_id: u64) -> Result<Action> {
        let response: ActionResponse = self.get(&format!("actions/{}", action_id)).await?;
        Ok(response.action)
    }

    /// Run a resource action and wait for it
    async fn run_action<T: Serialize>(&self, endpoint: &str, body: &T) -> Result<()> {
        let response: ActionResponse = self.post(endpoint, body).await?;
        self.wait_for_action(response.action.id, ACTION_TIMEOUT_SECS)
            .await
            .with_context(|| format!("Action {} did not complete", response.action.command))?;
        Ok(())
    }

    async fn wait_optional(&self, action: Option<Action>) -> Result<()> {
        if let Some(action) = action {
            self.wait_for_action(action.id, ACTION_TIMEOUT_SECS).await?;
        }
        Ok(())
    }
}

fn api_error(status: reqwest::StatusCode, body: &str) -> anyhow::Error {
    // Try to parse as error response
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(error_response) => anyhow::anyhow!(
            "API error: {} - {}",
            error_response.error.code,
            error_response.error.message
        ),
        Err(_) => anyhow::anyhow!("API request failed with status {}: {}", status, body),
    }
}

#[async_trait]
impl CloudApi for HetznerCloudClient {
    async fn find_network(&self, name: &str) -> Result<Option<Network>> {
        let response: NetworkListResponse =
            self.get_query("networks", &[("name", name)]).await?;
        Ok(response.networks.into_iter().next())
    }

    async fn create_network(&self, request: CreateNetworkRequest) -> Result<Network> {
        let response: NetworkResponse = self.post("networks", &request).await?;
        Ok(response.network)
    }

    async fn list_networks(&self, label_selector: &str) -> Result<Vec<Network>> {
        self.list_all("networks", label_selector, |r: NetworkListResponse| (r.networks, r.meta))
            .await
    }

    async fn delete_network(&self, network_id: u64) -> Result<()> {
        self.delete(&format!("networks/{}", network_id)).await?;
        Ok(())
    }

    async fn find_firewall(&self, name: &str) -> Result<Option<Firewall>> {
        let response: FirewallListResponse =
            self.get_query("firewalls", &[("name", name)]).await?;
        Ok(response.firewalls.into_iter().next())
    }

    async fn create_firewall(&self, request: CreateFirewallRequest) -> Result<Firewall> {
        let response: FirewallResponse = self.post("firewalls", &request).await?;
        for action in response.actions {
            self.wait_for_action(action.id, ACTION_TIMEOUT_SECS).await?;
        }
        Ok(response.firewall)
    }

    async fn list_firewalls(&self, label_selector: &str) -> Result<Vec<Firewall>> {
        self.list_all("firewalls", label_selector, |r: FirewallListResponse| (r.firewalls, r.meta))
            .await
    }

    async fn delete_firewall(&self, firewall_id: u64) -> Result<()> {
        self.delete(&format!("firewalls/{}", firewall_id)).await?;
        Ok(())
    }

    async fn find_server(&self, name: &str) -> Result<Option<Server>> {
        let response: ServerListResponse = self.get_query("servers", &[("name", name)]).await?;
        Ok(response.servers.into_iter().next())
    }

    async fn create_server(&self, request: CreateServerRequest) -> Result<Server> {
        let name = request.name.clone();
        let response: CreateServerResponse = self
            .post("servers", &request)
            .await
            .with_context(|| format!("Failed to create server {}", name))?;

        // Wait for server creation action to complete
        self.wait_for_action(response.action.id, ACTION_TIMEOUT_SECS)
            .await
            .context("Server creation action failed")?;

        // Get updated server information
        let server: ServerResponse = self
            .get(&format!("servers/{}", response.server.id))
            .await
            .context("Failed to get server details")?;
        Ok(server.server)
    }

    async fn list_servers(&self, label_selector: &str) -> Result<Vec<Server>> {
        self.list_all("servers", label_selector, |r: ServerListResponse| (r.servers, r.meta))
            .await
    }

    async fn delete_server(&self, server_id: u64) -> Result<()> {
        let body = self.delete(&format!("servers/{}", server_id)).await?;
        if let Ok(response) = serde_json::from_str::<ActionResponse>(&body) {
            self.wait_for_action(response.action.id, ACTION_TIMEOUT_SECS)
                .await?;
        }
        Ok(())
    }

    async fn attach_iso(&self, server_id: u64, iso: &str) -> Result<()> {
        self.run_action(
            &format!("servers/{}/actions/attach_iso", server_id),
            &serde_json::json!({ "iso": iso }),
        )
        .await
    }

    async fn reset_server(&self, server_id: u64) -> Result<()> {
        self.run_action(
            &format!("servers/{}/actions/reset", server_id),
            &serde_json::json!({}),
        )
        .await
    }

    async fn find_floating_ip(&self, name: &str) -> Result<Option<FloatingIp>> {
        let response: FloatingIpListResponse =
            self.get_query("floating_ips", &[("name", name)]).await?;
        Ok(response.floating_ips.into_iter().next())
    }

    async fn create_floating_ip(&self, request: CreateFloatingIpRequest) -> Result<FloatingIp> {
        let response: FloatingIpResponse = self.post("floating_ips", &request).await?;
        self.wait_optional(response.action).await?;
        Ok(response.floating_ip)
    }

    async fn assign_floating_ip(&self, floating_ip_id: u64, server_id: u64) -> Result<()> {
        self.run_action(
            &format!("floating_ips/{}/actions/assign", floating_ip_id),
            &serde_json::json!({ "server": server_id }),
        )
        .await
    }

    async fn list_floating_ips(&self, label_selector: &str) -> Result<Vec<FloatingIp>> {
        self.list_all("floating_ips", label_selector, |r: FloatingIpListResponse| {
            (r.floating_ips, r.meta)
        })
        .await
    }

    async fn delete_floating_ip(&self, floating_ip_id: u64) -> Result<()> {
        self.delete(&format!("floating_ips/{}", floating_ip_id))
            .await?;
        Ok(())
    }

    async fn find_load_balancer(&self, name: &str) -> Result<Option<LoadBalancer>> {
        let response: LoadBalancerListResponse =
            self.get_query("load_balancers", &[("name", name)]).await?;
        Ok(response.load_balancers.into_iter().next())
    }

    async fn get_load_balancer(&self, load_balancer_id: u64) -> Result<LoadBalancer> {
        let response: LoadBalancerResponse = self
            .get(&format!("load_balancers/{}", load_balancer_id))
            .await?;
        Ok(response.load_balancer)
    }

    async fn create_load_balancer(
        &self,
        request: CreateLoadBalancerRequest,
    ) -> Result<LoadBalancer> {
        let response: LoadBalancerResponse = self.post("load_balancers", &request).await?;
        self.wait_optional(response.action).await?;
        Ok(response.load_balancer)
    }

    async fn add_load_balancer_target(
        &self,
        load_balancer_id: u64,
        server_id: u64,
    ) -> Result<()> {
        self.run_action(
            &format!("load_balancers/{}/actions/add_target", load_balancer_id),
            &serde_json::json!({
                "type": "server",
                "server": { "id": server_id },
                "use_private_ip": true,
            }),
        )
        .await
    }

    async fn list_load_balancers(&self, label_selector: &str) -> Result<Vec<LoadBalancer>> {
        self.list_all("load_balancers", label_selector, |r: LoadBalancerListResponse| {
            (r.load_balancers, r.meta)
        })
        .await
    }

    async fn delete_load_balancer(&self, load_balancer_id: u64) -> Result<()> {
        self.delete(&format!("load_balancers/{}", load_balancer_id))
            .await?;
        Ok(())
    }
}

/// Request structure for creating a server
#[derive(Debug, Clone, Serialize)]
pub struct CreateServerRequest {
    pub name: String,
    pub server_type: String,
    pub location: String,
    pub image: String,
    pub networks: Vec<u64>,
    pub firewalls: Vec<FirewallReference>,
    pub labels: HashMap<String, String>,
    pub start_after_create: bool,
}

/// `{"firewall": id}` entry of a server create request
#[derive(Debug, Clone, Serialize)]
pub struct FirewallReference {
    pub firewall: u64,
}

/// Request structure for creating a network
#[derive(Debug, Clone, Serialize)]
pub struct CreateNetworkRequest {
    pub name: String,
    pub ip_range: String,
    pub subnets: Vec<SubnetRequest>,
    pub labels: HashMap<String, String>,
}

/// Request structure for creating a subnet
#[derive(Debug, Clone, Serialize)]
pub struct SubnetRequest {
    pub ip_range: String,
    pub network_zone: String,
    #[serde(rename = "type")]
    pub subnet_type: String,
}

/// Request structure for creating a firewall
#[derive(Debug, Clone, Serialize)]
pub struct CreateFirewallRequest {
    pub name: String,
    pub rules: Vec<FirewallRule>,
    pub labels: HashMap<String, String>,
}

/// Request structure for creating a floating IP
#[derive(Debug, Clone, Serialize)]
pub struct CreateFloatingIpRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub ip_type: String,
    pub home_location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<u64>,
    pub labels: HashMap<String, String>,
}

/// Request structure for creating a load balancer
#[derive(Debug, Clone, Serialize)]
pub struct CreateLoadBalancerRequest {
    pub name: String,
    pub load_balancer_type: String,
    pub location: String,
    pub network: u64,
    pub services: Vec<LoadBalancerService>,
    pub labels: HashMap<String, String>,
}

/// TCP passthrough service on a load balancer
#[derive(Debug, Clone, Serialize)]
pub struct LoadBalancerService {
    pub protocol: String,
    pub listen_port: u16,
    pub destination_port: u16,
}

impl LoadBalancerService {
    pub fn tcp(port: u16) -> Self {
        Self {
            protocol: "tcp".to_string(),
            listen_port: port,
            destination_port: port,
        }
    }
}
