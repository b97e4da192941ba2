//! Default configuration values
//!
//! Shared by the configuration sections and the command line.

/// Socket transport defaults
pub mod transport {
    pub const HOST: &str = "127.0.0.1";

    /// Foundation listening port
    pub const PORT: u16 = 9300;

    /// Connection timeout (milliseconds)
    pub const CONNECT_TIMEOUT_MS: u64 = network::DEFAULT_CONNECT_TIMEOUT_SECS * 1_000;

    pub const MAX_MESSAGE_SIZE: usize = network::DEFAULT_MAX_MESSAGE_SIZE;

    /// Sleep between retries of a transiently failed socket operation (milliseconds)
    pub const TRANSIENT_RETRY_DELAY_MS: u64 = 5;

    /// Category and negotiation reply bound (milliseconds)
    pub const REPLY_TIMEOUT_MS: u64 = 5_000;
}

/// Transport protocol version
pub mod protocol {
    pub const MAJOR: u8 = 1;
    pub const MINOR: u8 = 0;
}

pub mod logging {
    pub const LEVEL: &str = "info";
}
