//! # Foundation Link Configuration
//!
//! Layered configuration for the link binaries: TOML file first, then
//! `FOUNDATION_LINK__*` environment variables.
//!
//! ## Usage
//!
//! ```rust
//! use link_config::LinkConfig;
//!
//! let config = LinkConfig::from_toml_str("[role]\nkind = \"shell\"\n").unwrap();
//! let transport = config.transport_config();
//! assert_eq!(transport.port, link_config::defaults::transport::PORT);
//! ```

pub mod defaults;
pub mod link_config;

pub use link_config::{
    LinkConfig, LoggingSection, ProtocolSection, RoleKind, RoleSection, TransportSection, ENV_PREFIX,
};
