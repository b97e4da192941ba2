//! Link Configuration Module
//!
//! Loads [`LinkConfig`] from an optional TOML file, then applies
//! `FOUNDATION_LINK__SECTION__KEY` environment overrides. Every field has a
//! default, so an empty file (or none) is a valid configuration.

use crate::defaults;
use anyhow::{bail, Context, Result};
use codec::ProtocolVersion;
use config::{Config, Environment, File, FileFormat, Map};
use link::{InnerRole, Role};
use network::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable prefix, joined to keys with `__`
pub const ENV_PREFIX: &str = "FOUNDATION_LINK";

/// Main link configuration structure
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkConfig {
    pub transport: TransportSection,
    pub protocol: ProtocolSection,
    pub role: RoleSection,
    pub logging: LoggingSection,
}

/// Where the foundation is and how the socket behaves
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportSection {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub max_message_size: usize,
    pub transient_retry_delay_ms: u64,
    /// Bound on category request replies and host negotiation replies
    pub reply_timeout_ms: u64,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            host: defaults::transport::HOST.to_string(),
            port: defaults::transport::PORT,
            connect_timeout_ms: defaults::transport::CONNECT_TIMEOUT_MS,
            max_message_size: defaults::transport::MAX_MESSAGE_SIZE,
            transient_retry_delay_ms: defaults::transport::TRANSIENT_RETRY_DELAY_MS,
            reply_timeout_ms: defaults::transport::REPLY_TIMEOUT_MS,
        }
    }
}

/// Transport protocol version announced in the handshake
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolSection {
    pub major: u8,
    pub minor: u8,
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            major: defaults::protocol::MAJOR,
            minor: defaults::protocol::MINOR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Shell,
    #[default]
    Coplayer,
    ExtensionBin,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RoleSection {
    pub kind: RoleKind,
    /// Only meaningful for `coplayer`
    pub coplayer_id: u8,
    /// Only meaningful for `extension_bin`
    pub inner_links: Vec<InnerRole>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSection {
    /// `tracing_subscriber::EnvFilter` directive
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: defaults::logging::LEVEL.to_string(),
            json: false,
        }
    }
}

impl LinkConfig {
    /// Load `path` (required when given) with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load with an explicit environment instead of the process environment
    pub fn load_with_env(path: Option<&Path>, env: Option<Map<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            info!("Loading link config: {:?}", path);
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        builder = builder.add_source(environment(env));

        let config = builder.build().context("Failed to build configuration")?;
        let config: LinkConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        debug!(?config, "Link configuration loaded");
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: LinkConfig = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Effective configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    pub fn validate(&self) -> Result<()> {
        self.transport_config()
            .validate()
            .context("Invalid [transport] section")?;
        if self.transport.reply_timeout_ms == 0 {
            bail!("transport.reply_timeout_ms must be positive");
        }
        self.role().context("Invalid [role] section")?;
        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            host: self.transport.host.clone(),
            port: self.transport.port,
            connect_timeout: Duration::from_millis(self.transport.connect_timeout_ms),
            version: ProtocolVersion::new(self.protocol.major, self.protocol.minor),
            max_message_size: self.transport.max_message_size,
            transient_retry_delay: Duration::from_millis(self.transport.transient_retry_delay_ms),
        }
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.reply_timeout_ms)
    }

    pub fn role(&self) -> Result<Role> {
        let section = &self.role;
        if section.kind != RoleKind::ExtensionBin && !section.inner_links.is_empty() {
            bail!("inner_links only apply to the extension_bin role");
        }
        let role = match section.kind {
            RoleKind::Shell => Role::Shell,
            RoleKind::Coplayer => Role::Coplayer {
                id: section.coplayer_id,
            },
            RoleKind::ExtensionBin => Role::ExtensionBin(section.inner_links.clone()),
        };
        role.validate()?;
        Ok(role)
    }
}

fn environment(env: Option<Map<String, String>>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("role.inner_links")
        .source(env)
}
