//! Configuration for the onboard CLI.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext), and
//! translation to `onboard_api::GatewayConfig` plus the core tunables a
//! profile carries. The reconcilers never read files; only the CLI does.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use onboard_api::{GatewayConfig, TlsMode, TransportConfig};
use onboard_core::Platform;
use onboard_core::secret::DEFAULT_DECRYPT_HELPER;

const KEYRING_SERVICE: &str = "onboard";
const LOCAL_REST_PORT: u16 = 8100;
const REDACTED: &str = "********";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("unknown profile '{profile}'")]
    UnknownProfile { profile: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when `--profile` is not given.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("local".into()),
            defaults: Defaults::default(),
            profiles: HashMap::from([("local".into(), Profile::local())]),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default)]
    pub insecure: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub platform: Platform,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            insecure: false,
            timeout: default_timeout(),
            platform: Platform::default(),
        }
    }
}

fn default_timeout() -> u64 {
    60
}

/// A named target device.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Management address or hostname. `localhost` means on-box.
    pub host: String,

    /// Defaults to 8100 on-box, 443 otherwise.
    pub port: Option<u16>,

    #[serde(default = "default_username")]
    pub username: String,

    /// Plaintext password; prefer `password_env` or the keyring.
    pub password: Option<String>,

    /// Environment variable holding the password.
    pub password_env: Option<String>,

    pub ca_cert: Option<PathBuf>,

    pub insecure: Option<bool>,

    pub timeout: Option<u64>,

    pub platform: Option<Platform>,

    /// On-box command that turns encrypted tokens back into plaintext.
    pub decrypt_helper: Option<String>,
}

impl Profile {
    fn local() -> Self {
        Self {
            host: "localhost".into(),
            port: None,
            username: default_username(),
            password: None,
            password_env: None,
            ca_cert: None,
            insecure: None,
            timeout: None,
            platform: None,
            decrypt_helper: None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.host.as_str(), "localhost" | "127.0.0.1" | "::1")
    }
}

fn default_username() -> String {
    "admin".into()
}

/// A fully resolved profile, ready to build a gateway from.
#[derive(Debug, Clone)]
pub struct Target {
    pub gateway: GatewayConfig,
    pub platform: Platform,
    pub decrypt_helper: String,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "onboard", "onboard").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("onboard");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from the canonical path plus `ONBOARD_` environment overrides.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// A missing file is not an error; defaults and environment still apply.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ONBOARD_").split("__").ignore(&["password", "profile"]))
        .extract()?;
    Ok(config)
}

/// TOML rendering of the effective config, with plaintext passwords masked.
pub fn render_config(config: &Config) -> Result<String, ConfigError> {
    let mut redacted = config.clone();
    for profile in redacted.profiles.values_mut() {
        if profile.password.is_some() {
            profile.password = Some(REDACTED.into());
        }
    }
    Ok(toml::to_string_pretty(&redacted)?)
}

// ── Profile resolution ──────────────────────────────────────────────

impl Config {
    /// Pick `name`, else the default profile.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("local");
        self.profiles
            .get(name)
            .map(|profile| (name, profile))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }

    pub fn resolve(&self, name: Option<&str>) -> Result<Target, ConfigError> {
        let (name, profile) = self.profile(name)?;
        resolve_target(profile, name, &self.defaults)
    }
}

/// Password lookup: named env var, then `ONBOARD_PASSWORD`, then the
/// keyring, then plaintext.
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    if let Some(value) = profile
        .password_env
        .as_deref()
        .and_then(|name| std::env::var(name).ok())
    {
        return Ok(SecretString::from(value));
    }

    if let Ok(value) = std::env::var("ONBOARD_PASSWORD") {
        return Ok(SecretString::from(value));
    }

    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    if let Some(password) = &profile.password {
        return Ok(SecretString::from(password.clone()));
    }

    // The on-box REST framework accepts local calls without a password.
    if profile.is_local() {
        return Ok(SecretString::from(String::new()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Build a `Target` from one profile and the global defaults.
pub fn resolve_target(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<Target, ConfigError> {
    let local = profile.is_local();
    let scheme = if local { "http" } else { "https" };
    let port = profile
        .port
        .unwrap_or(if local { LOCAL_REST_PORT } else { 443 });

    let base = format!("{scheme}://{}:{port}", profile.host);
    let url: url::Url = base.parse().map_err(|_| ConfigError::Validation {
        field: "host".into(),
        reason: format!("not a valid host: {}", profile.host),
    })?;
    if url.host_str().is_none() {
        return Err(ConfigError::Validation {
            field: "host".into(),
            reason: format!("not a valid host: {}", profile.host),
        });
    }

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ca_path) = &profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else if local {
        TlsMode::System
    } else {
        TlsMode::DangerAcceptInvalid // devices ship with a self-signed cert
    };

    let password = resolve_password(profile, profile_name)?;
    let mut gateway = GatewayConfig::new(profile.host.clone(), profile.username.clone(), password);
    gateway.port = port;
    gateway.scheme = scheme.into();
    gateway.transport = TransportConfig {
        tls,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
    };

    Ok(Target {
        gateway,
        platform: profile.platform.unwrap_or(defaults.platform),
        decrypt_helper: profile
            .decrypt_helper
            .clone()
            .unwrap_or_else(|| DEFAULT_DECRYPT_HELPER.into()),
    })
}
