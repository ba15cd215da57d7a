// iControl REST gateway
//
// Wraps `reqwest::Client` with BIG-IP URL construction, collection
// unwrapping, and error-body decoding. Clustering and onboarding verbs
// live in sibling files as inherent helpers to keep this module focused
// on transport mechanics and the trait wiring.

mod bigiq;
mod cluster;
mod onboard;

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::gateway::{
    BigIqLicenseRequest, BigIqRevokeRequest, DeviceGateway, DeviceGroupOptions, DeviceGroupType,
    DeviceInfo, JoinClusterRequest, RegKeyLicenseRequest,
};
use crate::retry::RetryPolicy;
use crate::transport::GatewayConfig;

/// iControl error bodies look like `{"code":400,"message":"..."}`.
#[derive(serde::Deserialize)]
struct IcontrolError {
    message: Option<String>,
}

/// [`DeviceGateway`] over a device's iControl REST API.
pub struct RestGateway {
    http: reqwest::Client,
    config: GatewayConfig,
    /// Current target; follows the management address when it changes.
    host: RwLock<String>,
}

impl RestGateway {
    /// Create a gateway from a `GatewayConfig`.
    pub fn new(config: GatewayConfig) -> Result<Self, Error> {
        let http = config.transport.build_client()?;
        Ok(Self::with_client(http, config))
    }

    /// Create a gateway with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, config: GatewayConfig) -> Self {
        let host = RwLock::new(config.host.clone());
        Self { http, config, host }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// `{scheme}://{host}:{port}/mgmt{path}`
    pub(crate) fn url(&self, path: &str) -> Result<Url, Error> {
        let host = self.host();
        let full = format!(
            "{}://{host}:{}/mgmt{path}",
            self.config.scheme, self.config.port
        );
        Ok(Url::parse(&full)?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send one request with the configured credentials, retrying
    /// transient failures per `retry`.
    pub(crate) async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        retry: RetryPolicy,
    ) -> Result<Value, Error> {
        let operation = format!("{method} {path}");
        retry
            .run(&operation, || self.send_once(method.clone(), path, body))
            .await
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, Error> {
        let url = self.url(path)?;
        debug!("{method} {url}");

        let mut builder = self.http.request(method, url).basic_auth(
            &self.config.username,
            Some(self.config.password.expose_secret()),
        );
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let resp = builder.send().await.map_err(Error::Transport)?;
        parse_response(path, resp).await
    }
}

/// Decode a response body, mapping non-success statuses to [`Error`].
pub(crate) async fn parse_response(path: &str, resp: reqwest::Response) -> Result<Value, Error> {
    let status = resp.status();

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication {
            message: format!("credentials rejected for {path}"),
        });
    }

    let body = resp.text().await.map_err(Error::Transport)?;

    if !status.is_success() {
        let message = serde_json::from_str::<IcontrolError>(&body)
            .ok()
            .and_then(|e| e.message)
            .unwrap_or_else(|| body.chars().take(200).collect());
        return Err(Error::Http {
            status: status.as_u16(),
            path: path.to_owned(),
            message,
        });
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    trace!(path, len = body.len(), "response body");
    serde_json::from_str(&body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        Error::Deserialization {
            message: format!("{e} (body preview: {preview:?})"),
            body,
        }
    })
}

/// Collections come back as `{"kind": "...collectionstate", "items": [...]}`.
fn unwrap_items(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("items") => {
            map.remove("items").unwrap_or(Value::Null)
        }
        Value::Object(map) if map.get("kind").and_then(Value::as_str).is_some_and(|k| {
            k.ends_with("collectionstate")
        }) =>
        {
            Value::Array(Vec::new())
        }
        other => other,
    }
}

/// Every `description` string in a stats-shaped response.
pub(crate) fn stat_descriptions(value: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_descriptions(value, &mut found);
    found
}

fn collect_descriptions(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match (key.as_str(), child) {
                    ("description", Value::String(s)) => found.push(s.clone()),
                    _ => collect_descriptions(child, found),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_descriptions(v, found)),
        _ => {}
    }
}

#[async_trait]
impl DeviceGateway for RestGateway {
    fn host(&self) -> String {
        self.host
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn port(&self) -> u16 {
        self.config.port
    }

    fn set_host(&self, host: &str) {
        debug!(host, "re-pointing gateway");
        *self.host.write().unwrap_or_else(PoisonError::into_inner) = host.to_owned();
    }

    async fn remote(
        &self,
        host: &str,
        username: &str,
        password: &SecretString,
    ) -> Result<Arc<dyn DeviceGateway>, Error> {
        let config = self.config.for_host(host, username, password.clone());
        Ok(Arc::new(RestGateway::with_client(self.http.clone(), config)))
    }

    async fn list(&self, path: &str, retry: RetryPolicy) -> Result<Value, Error> {
        let value = self.request(Method::GET, path, None, retry).await?;
        Ok(unwrap_items(value))
    }

    async fn create(&self, path: &str, body: Value, retry: RetryPolicy) -> Result<Value, Error> {
        self.request(Method::POST, path, Some(&body), retry).await
    }

    async fn modify(&self, path: &str, body: Value, retry: RetryPolicy) -> Result<Value, Error> {
        self.request(Method::PATCH, path, Some(&body), retry).await
    }

    async fn replace(&self, path: &str, body: Value, retry: RetryPolicy) -> Result<Value, Error> {
        self.request(Method::PUT, path, Some(&body), retry).await
    }

    async fn delete(&self, path: &str, retry: RetryPolicy) -> Result<(), Error> {
        self.request(Method::DELETE, path, None, retry).await?;
        Ok(())
    }

    async fn device_info(&self) -> Result<DeviceInfo, Error> {
        const PATH: &str = "/shared/identified-devices/config/device-info";
        let info = self.list(PATH, RetryPolicy::MEDIUM).await?;
        let field = |name: &'static str| {
            info.get(name)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or(Error::MissingField {
                    path: PATH.to_owned(),
                    field: name,
                })
        };
        Ok(DeviceInfo {
            hostname: field("hostname")?,
            management_address: field("managementAddress")?,
            version: field("version")?,
        })
    }

    async fn save(&self) -> Result<(), Error> {
        debug!("saving running config");
        self.create("/tm/sys/config", json!({ "command": "save" }), RetryPolicy::MEDIUM)
            .await?;
        Ok(())
    }

    async fn reboot(&self) -> Result<(), Error> {
        debug!("rebooting device");
        self.create("/tm/sys", json!({ "command": "reboot" }), RetryPolicy::NONE)
            .await?;
        Ok(())
    }

    async fn ready(&self) -> Result<(), Error> {
        RetryPolicy::LONG
            .poll("device ready", || async {
                let status = self.list("/tm/sys/ready", RetryPolicy::NONE).await?;
                let descriptions = stat_descriptions(&status);
                Ok(!descriptions.is_empty() && descriptions.iter().all(|d| d == "yes"))
            })
            .await
    }

    async fn active(&self) -> Result<(), Error> {
        RetryPolicy::LONG
            .poll("device active", || async {
                let status = self
                    .list("/tm/cm/failover-status", RetryPolicy::NONE)
                    .await?;
                Ok(stat_descriptions(&status)
                    .iter()
                    .any(|d| d == "ACTIVE" || d == "STANDBY"))
            })
            .await
    }

    async fn cluster_config_sync_ip(&self, ip: &str) -> Result<(), Error> {
        self.config_sync_ip(ip).await
    }

    async fn cluster_are_in_trust_group(&self, devices: &[String]) -> Result<Vec<String>, Error> {
        self.are_in_trust_group(devices).await
    }

    async fn cluster_create_device_group(
        &self,
        name: &str,
        group_type: DeviceGroupType,
        devices: &[String],
        options: &DeviceGroupOptions,
    ) -> Result<(), Error> {
        self.create_device_group(name, group_type, devices, options)
            .await
    }

    async fn cluster_sync(&self, group: &str) -> Result<(), Error> {
        self.sync(group).await
    }

    async fn cluster_sync_complete(&self, retry: RetryPolicy) -> Result<(), Error> {
        self.sync_complete(retry).await
    }

    async fn cluster_has_device_group(&self, name: &str) -> Result<bool, Error> {
        self.has_device_group(name).await
    }

    async fn cluster_add_to_device_group(&self, device: &str, group: &str) -> Result<(), Error> {
        self.add_to_device_group(device, group).await
    }

    async fn cluster_join_cluster(&self, request: &JoinClusterRequest) -> Result<(), Error> {
        self.join_cluster(request).await
    }

    async fn cluster_remove_from_device_group(
        &self,
        devices: &[String],
        group: &str,
    ) -> Result<(), Error> {
        self.remove_from_device_group(devices, group).await
    }

    async fn cluster_add_to_trust(
        &self,
        device_name: &str,
        address: &str,
        username: &str,
        password: &SecretString,
    ) -> Result<(), Error> {
        self.add_to_trust(device_name, address, username, password)
            .await
    }

    async fn onboard_set_db_vars(&self, vars: &BTreeMap<String, String>) -> Result<(), Error> {
        self.set_db_vars(vars).await
    }

    async fn onboard_hostname(&self, hostname: &str) -> Result<(), Error> {
        self.set_hostname(hostname).await
    }

    async fn onboard_password(
        &self,
        user: &str,
        new_password: &SecretString,
        old_password: Option<&SecretString>,
    ) -> Result<(), Error> {
        self.set_password(user, new_password, old_password).await
    }

    async fn onboard_license(&self, request: &RegKeyLicenseRequest) -> Result<(), Error> {
        self.license_reg_key(request).await
    }

    async fn onboard_license_via_bigiq(&self, request: &BigIqLicenseRequest) -> Result<(), Error> {
        self.license_via_bigiq(request).await
    }

    async fn onboard_revoke_license_via_bigiq(
        &self,
        request: &BigIqRevokeRequest,
    ) -> Result<(), Error> {
        self.revoke_via_bigiq(request).await
    }
}
