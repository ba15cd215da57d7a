// Shared transport configuration for building reqwest::Client instances.
//
// The device gateway and the BIG-IQ license client share TLS and timeout
// settings through this module, avoiding duplicated builder logic.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

/// TLS verification mode.
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// Use the system certificate store.
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (BIG-IP ships with a self-signed one).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::DangerAcceptInvalid,
            timeout: Duration::from_secs(60),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("onboard/", env!("CARGO_PKG_VERSION")));

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path).map_err(|e| {
                    crate::error::Error::Tls(format!("failed to read CA cert: {e}"))
                })?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| crate::error::Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| crate::error::Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}

/// Everything needed to reach one device's management API.
///
/// Built by the CLI from a config profile -- the api crate never reads
/// config files.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Management address or hostname (`localhost` when running on-box).
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// `http` or `https`. On-box callers talk plain HTTP to the local REST
    /// framework port.
    pub scheme: String,
    pub transport: TransportConfig,
}

impl GatewayConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: SecretString) -> Self {
        Self {
            host: host.into(),
            port: 443,
            username: username.into(),
            password,
            scheme: "https".into(),
            transport: TransportConfig::default(),
        }
    }

    /// Same transport and scheme, different target device.
    pub fn for_host(
        &self,
        host: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            host: host.into(),
            port: self.port,
            username: username.into(),
            password,
            scheme: self.scheme.clone(),
            transport: self.transport.clone(),
        }
    }
}
