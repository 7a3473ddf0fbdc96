use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::units::ByteSize;

pub const DEFAULT_HTTP_PORT: u16 = 8480;
pub const DEFAULT_DURATION: Duration = Duration::from_millis(100);
pub const DEFAULT_MEMORY_SIZE: ByteSize = ByteSize(10 * ByteSize::MB);
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 30;
pub const DEFAULT_LOG_FILTER: &str = "loadkit=debug,tower_http=debug";

/// Per-client limit applied to the outbound relay route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub per_second: u64,
    pub burst: u32,
}

#[derive(Debug, Clone)]
pub struct LoadKitConfig {
    pub bind_addr: IpAddr,
    pub http_port: u16,
    /// Ballast allocated at startup and held until the process exits.
    pub init_memory_size: Option<ByteSize>,
    /// Largest upstream body the relay will buffer. `None` relays anything.
    pub relay_max_body: Option<usize>,
    pub relay_rate_limit: Option<RateLimit>,
}

impl Default for LoadKitConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: DEFAULT_HTTP_PORT,
            init_memory_size: None,
            relay_max_body: None,
            relay_rate_limit: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("Relay rate limit must be > 0")] InvalidRateLimit,
    #[error("Relay max body size must be > 0")] InvalidMaxBody,
}

fn parse_var<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}

impl LoadKitConfig {
    /// Reads the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup. Unset or
    /// empty variables keep their defaults.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(addr) = get("BIND_ADDR") {
            cfg.bind_addr = parse_var("BIND_ADDR", &addr)?;
        }
        if let Some(port) = get("HTTP_PORT") {
            // accepts "8480", ":8480" or a full "127.0.0.1:8480" listen address
            let port = port.trim();
            match port.parse::<SocketAddr>() {
                Ok(addr) => {
                    cfg.bind_addr = addr.ip();
                    cfg.http_port = addr.port();
                }
                Err(_) => cfg.http_port = parse_var("HTTP_PORT", port.trim_start_matches(':'))?,
            }
        }
        if let Some(size) = get("INIT_MEMORY_SIZE") {
            cfg.init_memory_size = Some(parse_var("INIT_MEMORY_SIZE", &size)?);
        }
        if let Some(size) = get("RELAY_MAX_BODY_SIZE") {
            let size: ByteSize = parse_var("RELAY_MAX_BODY_SIZE", &size)?;
            let size = usize::try_from(size.bytes()).map_err(|_| ConfigError::InvalidValue {
                name: "RELAY_MAX_BODY_SIZE",
                value: size.to_string(),
            })?;
            cfg.relay_max_body = Some(size);
        }
        if let Some(rate) = get("RELAY_RATE_LIMIT_PER_SECOND") {
            let burst = match get("RELAY_RATE_LIMIT_BURST") {
                Some(b) => parse_var("RELAY_RATE_LIMIT_BURST", &b)?,
                None => DEFAULT_RATE_LIMIT_BURST,
            };
            cfg.relay_rate_limit = Some(RateLimit {
                per_second: parse_var("RELAY_RATE_LIMIT_PER_SECOND", &rate)?,
                burst,
            });
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(limit) = self.relay_rate_limit {
            if limit.per_second == 0 || limit.burst == 0 { return Err(ConfigError::InvalidRateLimit); }
        }
        if self.relay_max_body == Some(0) { return Err(ConfigError::InvalidMaxBody); }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.http_port)
    }
}
