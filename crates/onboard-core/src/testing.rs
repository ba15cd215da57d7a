// ── Recording gateway for reconciler tests ──
//
// Every verb is logged as a `Call`; reads return canned values keyed by
// path. Gateways opened with `remote()` share the log, so assertions can
// see what happened on each host.

#![allow(clippy::unwrap_used)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Value, json};

use onboard_api::{
    BigIqLicenseRequest, BigIqRevokeRequest, DeviceGateway, DeviceGroupOptions, DeviceGroupType,
    DeviceInfo, Error, JoinClusterRequest, RegKeyLicenseRequest, RetryPolicy,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub host: String,
    pub verb: &'static str,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Debug)]
struct Shared {
    calls: Vec<Call>,
    lists: BTreeMap<String, Value>,
    bash: Vec<(String, String)>,
    unresolvable: BTreeSet<String>,
    failures: Vec<(&'static str, String)>,
    device: DeviceInfo,
    trusted: Vec<String>,
    groups: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct MockGateway {
    shared: Arc<Mutex<Shared>>,
    host: Arc<Mutex<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::for_host("localhost")
    }

    pub fn for_host(host: &str) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                calls: Vec::new(),
                lists: BTreeMap::new(),
                bash: Vec::new(),
                unresolvable: BTreeSet::new(),
                failures: Vec::new(),
                device: DeviceInfo {
                    hostname: "bigip1.example.com".into(),
                    management_address: "10.0.0.1".into(),
                    version: "14.1.0".into(),
                },
                trusted: Vec::new(),
                groups: BTreeSet::new(),
            })),
            host: Arc::new(Mutex::new(host.to_owned())),
        }
    }

    // ── Canned responses ─────────────────────────────────────────────

    pub fn with_version(self, version: &str) -> Self {
        self.shared.lock().unwrap().device.version = version.to_owned();
        self
    }

    pub fn with_device(self, hostname: &str, management_address: &str) -> Self {
        {
            let mut shared = self.shared.lock().unwrap();
            shared.device.hostname = hostname.to_owned();
            shared.device.management_address = management_address.to_owned();
        }
        self
    }

    pub fn on_list(&self, path: &str, value: Value) {
        self.shared
            .lock()
            .unwrap()
            .lists
            .insert(path.to_owned(), value);
    }

    /// Commands containing `fragment` answer with `output`. First match wins.
    pub fn on_bash(&self, fragment: &str, output: &str) {
        self.shared
            .lock()
            .unwrap()
            .bash
            .push((fragment.to_owned(), output.to_owned()));
    }

    pub fn unresolvable(&self, host: &str) {
        self.shared
            .lock()
            .unwrap()
            .unresolvable
            .insert(host.to_owned());
    }

    pub fn fail(&self, verb: &'static str, path: &str) {
        self.shared
            .lock()
            .unwrap()
            .failures
            .push((verb, path.to_owned()));
    }

    pub fn trust(&self, devices: &[&str]) {
        self.shared
            .lock()
            .unwrap()
            .trusted
            .extend(devices.iter().map(|d| (*d).to_owned()));
    }

    pub fn has_group(&self, name: &str) {
        self.shared.lock().unwrap().groups.insert(name.to_owned());
    }

    // ── Assertions ───────────────────────────────────────────────────

    pub fn calls(&self) -> Vec<Call> {
        self.shared.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, verb: &str, path: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.verb == verb && c.path == path)
            .collect()
    }

    pub fn verbs(&self) -> Vec<&'static str> {
        self.calls().into_iter().map(|c| c.verb).collect()
    }

    pub fn bash_commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.verb == "bash")
            .map(|c| c.path)
            .collect()
    }

    /// Calls that change device state.
    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c.verb, "list" | "bash" | "device_info" | "ready" | "active"))
            .filter(|c| c.path != "/tm/util/dig")
            .collect()
    }

    // ── Internals ────────────────────────────────────────────────────

    fn record(&self, verb: &'static str, path: &str, body: Option<Value>) -> Result<(), Error> {
        let host = self.host.lock().unwrap().clone();
        let mut shared = self.shared.lock().unwrap();
        shared.calls.push(Call {
            host,
            verb,
            path: path.to_owned(),
            body,
        });
        if shared
            .failures
            .iter()
            .any(|(v, p)| *v == verb && p == path)
        {
            return Err(Error::Http {
                status: 400,
                path: path.to_owned(),
                message: "injected failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceGateway for MockGateway {
    fn host(&self) -> String {
        self.host.lock().unwrap().clone()
    }

    fn port(&self) -> u16 {
        443
    }

    fn set_host(&self, host: &str) {
        host.clone_into(&mut self.host.lock().unwrap());
    }

    async fn remote(
        &self,
        host: &str,
        _username: &str,
        _password: &SecretString,
    ) -> Result<Arc<dyn DeviceGateway>, Error> {
        Ok(Arc::new(Self {
            shared: Arc::clone(&self.shared),
            host: Arc::new(Mutex::new(host.to_owned())),
        }))
    }

    async fn list(&self, path: &str, _retry: RetryPolicy) -> Result<Value, Error> {
        self.record("list", path, None)?;
        Ok(self
            .shared
            .lock()
            .unwrap()
            .lists
            .get(path)
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn create(&self, path: &str, body: Value, _retry: RetryPolicy) -> Result<Value, Error> {
        self.record("create", path, Some(body.clone()))?;
        if path == "/tm/util/dig" {
            let target = body["utilCmdArgs"]
                .as_str()
                .unwrap_or_default()
                .trim_start_matches("+short ")
                .to_owned();
            let resolved = !self.shared.lock().unwrap().unresolvable.contains(&target);
            let result = if resolved { "192.0.2.10\n" } else { "" };
            return Ok(json!({ "commandResult": result }));
        }
        Ok(body)
    }

    async fn modify(&self, path: &str, body: Value, _retry: RetryPolicy) -> Result<Value, Error> {
        self.record("modify", path, Some(body.clone()))?;
        Ok(body)
    }

    async fn replace(&self, path: &str, body: Value, _retry: RetryPolicy) -> Result<Value, Error> {
        self.record("replace", path, Some(body.clone()))?;
        Ok(body)
    }

    async fn delete(&self, path: &str, _retry: RetryPolicy) -> Result<(), Error> {
        self.record("delete", path, None)
    }

    async fn create_or_modify(
        &self,
        path: &str,
        body: Value,
        _retry: RetryPolicy,
    ) -> Result<(), Error> {
        self.record("create_or_modify", path, Some(body))
    }

    async fn run_bash(&self, command: &str) -> Result<String, Error> {
        self.record("bash", command, None)?;
        let shared = self.shared.lock().unwrap();
        if let Some((_, output)) = shared
            .bash
            .iter()
            .find(|(fragment, _)| command.contains(fragment.as_str()))
        {
            return Ok(output.clone());
        }
        if command.contains("echo ONBOARD_OK") {
            return Ok("ONBOARD_OK\n".into());
        }
        Ok(String::new())
    }

    async fn device_info(&self) -> Result<DeviceInfo, Error> {
        self.record("device_info", "", None)?;
        Ok(self.shared.lock().unwrap().device.clone())
    }

    async fn save(&self) -> Result<(), Error> {
        self.record("save", "", None)
    }

    async fn reboot(&self) -> Result<(), Error> {
        self.record("reboot", "", None)
    }

    async fn ready(&self) -> Result<(), Error> {
        self.record("ready", "", None)
    }

    async fn active(&self) -> Result<(), Error> {
        self.record("active", "", None)
    }

    async fn cluster_config_sync_ip(&self, ip: &str) -> Result<(), Error> {
        self.record("cluster_config_sync_ip", ip, None)
    }

    async fn cluster_are_in_trust_group(&self, devices: &[String]) -> Result<Vec<String>, Error> {
        self.record("cluster_are_in_trust_group", "", Some(json!(devices)))?;
        let trusted = self.shared.lock().unwrap().trusted.clone();
        Ok(devices
            .iter()
            .filter(|d| trusted.contains(d))
            .cloned()
            .collect())
    }

    async fn cluster_create_device_group(
        &self,
        name: &str,
        group_type: DeviceGroupType,
        devices: &[String],
        _options: &DeviceGroupOptions,
    ) -> Result<(), Error> {
        self.record(
            "cluster_create_device_group",
            name,
            Some(json!({ "type": group_type.to_string(), "devices": devices })),
        )?;
        self.shared.lock().unwrap().groups.insert(name.to_owned());
        Ok(())
    }

    async fn cluster_sync(&self, group: &str) -> Result<(), Error> {
        self.record("cluster_sync", group, None)
    }

    async fn cluster_sync_complete(&self, _retry: RetryPolicy) -> Result<(), Error> {
        self.record("cluster_sync_complete", "", None)
    }

    async fn cluster_has_device_group(&self, name: &str) -> Result<bool, Error> {
        self.record("cluster_has_device_group", name, None)?;
        Ok(self.shared.lock().unwrap().groups.contains(name))
    }

    async fn cluster_add_to_device_group(&self, device: &str, group: &str) -> Result<(), Error> {
        self.record("cluster_add_to_device_group", group, Some(json!(device)))
    }

    async fn cluster_join_cluster(&self, request: &JoinClusterRequest) -> Result<(), Error> {
        self.record(
            "cluster_join_cluster",
            &request.device_group,
            Some(json!({
                "remoteHost": request.remote_host,
                "devices": request.sync_comp_devices,
            })),
        )
    }

    async fn cluster_remove_from_device_group(
        &self,
        devices: &[String],
        group: &str,
    ) -> Result<(), Error> {
        self.record("cluster_remove_from_device_group", group, Some(json!(devices)))
    }

    async fn cluster_add_to_trust(
        &self,
        device_name: &str,
        address: &str,
        username: &str,
        _password: &SecretString,
    ) -> Result<(), Error> {
        self.record(
            "cluster_add_to_trust",
            device_name,
            Some(json!({ "address": address, "username": username })),
        )
    }

    async fn onboard_set_db_vars(&self, vars: &BTreeMap<String, String>) -> Result<(), Error> {
        self.record("onboard_set_db_vars", "", Some(json!(vars)))
    }

    async fn onboard_hostname(&self, hostname: &str) -> Result<(), Error> {
        self.record("onboard_hostname", hostname, None)
    }

    async fn onboard_password(
        &self,
        user: &str,
        _new_password: &SecretString,
        old_password: Option<&SecretString>,
    ) -> Result<(), Error> {
        self.record(
            "onboard_password",
            user,
            Some(json!({ "hasOld": old_password.is_some() })),
        )
    }

    async fn onboard_license(&self, request: &RegKeyLicenseRequest) -> Result<(), Error> {
        self.record(
            "onboard_license",
            &request.reg_key,
            Some(json!({ "overwrite": request.overwrite })),
        )
    }

    async fn onboard_license_via_bigiq(&self, request: &BigIqLicenseRequest) -> Result<(), Error> {
        self.record(
            "onboard_license_via_bigiq",
            &request.target.license_pool,
            Some(json!({
                "bigIqHost": request.target.host,
                "address": request.management_address,
                "reachable": request.reachable,
            })),
        )
    }

    async fn onboard_revoke_license_via_bigiq(
        &self,
        request: &BigIqRevokeRequest,
    ) -> Result<(), Error> {
        self.record(
            "onboard_revoke_license_via_bigiq",
            &request.target.license_pool,
            Some(json!({
                "bigIqHost": request.target.host,
                "reachable": request.reachable,
            })),
        )
    }
}
