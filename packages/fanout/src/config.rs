use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / fanout.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   fanout.toml:     [websocket]
//                    read_timeout_secs = 60
//
//   env var:         FANOUT_WEBSOCKET__READ_TIMEOUT_SECS=60   (double underscore = nesting)
//
//   (single underscore stays within field names: FANOUT_AUTH__SIGNING_KEY)

/// Named configuration presets.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// host=127.0.0.1
    Local,
    /// host=0.0.0.0
    Server,
}

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub websocket: WebSocketFileConfig,
    #[serde(default)]
    pub hub: HubFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
}

/// Listener settings (lives under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            ws_path: default_ws_path(),
        }
    }
}

/// Per-connection pump tunables (lives under `[websocket]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebSocketFileConfig {
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

impl Default for WebSocketFileConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            auth_timeout_secs: default_auth_timeout_secs(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

/// Hub tunables (lives under `[hub]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubFileConfig {
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
    /// Whether a client receives its own broadcasts.
    #[serde(default = "default_echo_to_sender")]
    pub echo_to_sender: bool,
}

impl Default for HubFileConfig {
    fn default() -> Self {
        Self {
            command_capacity: default_command_capacity(),
            echo_to_sender: default_echo_to_sender(),
        }
    }
}

/// Credential settings (lives under `[auth]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthFileConfig {
    #[serde(default)]
    pub signing_key: Option<String>,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default)]
    pub leeway_secs: u64,
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self {
            signing_key: None,
            token_ttl_secs: default_token_ttl_secs(),
            leeway_secs: 0,
        }
    }
}

fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_max_frame_bytes() -> usize {
    512
}
fn default_heartbeat_interval_secs() -> u64 {
    25
}
fn default_read_timeout_secs() -> u64 {
    30
}
fn default_write_timeout_secs() -> u64 {
    10
}
fn default_auth_timeout_secs() -> u64 {
    10
}
fn default_outbound_queue_capacity() -> usize {
    16
}
fn default_command_capacity() -> usize {
    256
}
fn default_echo_to_sender() -> bool {
    true
}
fn default_token_ttl_secs() -> u64 {
    86400
}

/// Build a figment that layers: defaults → profile defaults → fanout.toml → FANOUT_* env vars.
///
/// Profile defaults sit above struct defaults but below the config file/env.
/// The CLI profile takes priority over the config file profile.
pub fn load_config(config_path: &Path, cli_profile: Option<&Profile>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    // Pass 1: peek at profile from the file/env (CLI overrides file)
    let base = Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("FANOUT_").split("__"));

    let profile: Option<Profile> = cli_profile
        .cloned()
        .or_else(|| base.extract_inner("profile").ok());

    // Pass 2: rebuild with profile defaults as a layer between defaults and the file
    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Serialized::defaults(profile_to_file_config(profile.as_ref())))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("FANOUT_").split("__"))
}

/// Convert a profile into a `FileConfig` with the profile's default values filled in.
fn profile_to_file_config(profile: Option<&Profile>) -> FileConfig {
    let host = match profile {
        Some(Profile::Local) => "127.0.0.1",
        Some(Profile::Server) => "0.0.0.0",
        None => return FileConfig::default(),
    };
    FileConfig {
        profile: profile.cloned(),
        server: ServerFileConfig {
            host: Some(host.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

/// Listener configuration (runtime view).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub ws_path: String,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Result<Self> {
        let host = fc.host.as_deref().unwrap_or("127.0.0.1");
        let port = fc.port.unwrap_or(8000);
        let addr = format!("{host}:{port}")
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid listen address {host}:{port}"))?;
        if !fc.ws_path.starts_with('/') {
            bail!("server.ws_path must start with '/' (got {:?})", fc.ws_path);
        }
        Ok(Self {
            addr,
            ws_path: fc.ws_path.clone(),
        })
    }
}

/// Per-connection limits and deadlines used by the gate and both pump loops.
#[derive(Clone, Debug)]
pub struct PumpConfig {
    /// Largest inbound data frame accepted
    pub max_frame_bytes: usize,
    /// Interval between outbound pings
    pub heartbeat_interval: Duration,
    /// Read deadline, renewed by every pong
    pub read_timeout: Duration,
    /// Deadline for every individual write
    pub write_timeout: Duration,
    /// How long a fresh connection has to present its credential
    pub auth_timeout: Duration,
    /// Capacity of each client's outbound queue
    pub outbound_queue_capacity: usize,
}

impl PumpConfig {
    pub fn from_file(fc: &WebSocketFileConfig) -> Result<Self> {
        let config = Self {
            max_frame_bytes: fc.max_frame_bytes,
            heartbeat_interval: Duration::from_secs(fc.heartbeat_interval_secs),
            read_timeout: Duration::from_secs(fc.read_timeout_secs),
            write_timeout: Duration::from_secs(fc.write_timeout_secs),
            auth_timeout: Duration::from_secs(fc.auth_timeout_secs),
            outbound_queue_capacity: fc.outbound_queue_capacity,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_frame_bytes == 0 {
            bail!("websocket.max_frame_bytes must be greater than zero");
        }
        if self.outbound_queue_capacity == 0 {
            bail!("websocket.outbound_queue_capacity must be greater than zero");
        }
        for (name, value) in [
            ("heartbeat_interval_secs", self.heartbeat_interval),
            ("read_timeout_secs", self.read_timeout),
            ("write_timeout_secs", self.write_timeout),
            ("auth_timeout_secs", self.auth_timeout),
        ] {
            if value.is_zero() {
                bail!("websocket.{name} must be greater than zero");
            }
        }
        // A ping must always reach the peer before its read deadline lapses.
        if self.heartbeat_interval >= self.read_timeout {
            bail!(
                "websocket.heartbeat_interval_secs ({}s) must be shorter than read_timeout_secs ({}s)",
                self.heartbeat_interval.as_secs(),
                self.read_timeout.as_secs()
            );
        }
        Ok(())
    }
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
            heartbeat_interval: Duration::from_secs(default_heartbeat_interval_secs()),
            read_timeout: Duration::from_secs(default_read_timeout_secs()),
            write_timeout: Duration::from_secs(default_write_timeout_secs()),
            auth_timeout: Duration::from_secs(default_auth_timeout_secs()),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

/// Hub configuration (runtime view).
#[derive(Clone, Debug)]
pub struct HubConfig {
    pub command_capacity: usize,
    pub echo_to_sender: bool,
}

impl HubConfig {
    pub fn from_file(fc: &HubFileConfig) -> Result<Self> {
        if fc.command_capacity == 0 {
            bail!("hub.command_capacity must be greater than zero");
        }
        Ok(Self {
            command_capacity: fc.command_capacity,
            echo_to_sender: fc.echo_to_sender,
        })
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: default_command_capacity(),
            echo_to_sender: default_echo_to_sender(),
        }
    }
}

/// Credential configuration (runtime view).
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub signing_key: String,
    pub token_ttl: Duration,
    pub leeway_secs: u64,
}

impl AuthConfig {
    pub fn from_file(fc: &AuthFileConfig) -> Result<Self> {
        let signing_key = fc
            .signing_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .context("auth.signing_key is not set (set FANOUT_AUTH__SIGNING_KEY)")?;
        Ok(Self {
            signing_key,
            token_ttl: Duration::from_secs(fc.token_ttl_secs),
            leeway_secs: fc.leeway_secs,
        })
    }
}
