use reqwest::Url;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::config::{DEFAULT_DURATION, DEFAULT_MEMORY_SIZE};
use crate::units::{parse_duration, ByteSize};
use crate::{LoadKitError, Result};

// Empty values fall back to the default, same as an absent parameter.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn duration_param(name: &str, value: &Option<String>, default: Duration) -> Result<Duration> {
    match present(value) {
        Some(raw) => parse_duration(raw)
            .map_err(|e| LoadKitError::InvalidArgument(format!("{name}: {e}"))),
        None => Ok(default),
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        other => Err(LoadKitError::InvalidArgument(format!(
            "{name}: invalid boolean {other:?}"
        ))),
    }
}

/// Raw query for `GET /cpu`.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct CpuQuery {
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub operations: Option<String>,
    #[serde(default)]
    pub parallel: Option<String>,
}

/// Validated CPU burn parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuParams {
    pub duration: Duration,
    /// Zero means the burn is bounded by duration only.
    pub operations: u64,
    pub parallel: bool,
}

impl CpuQuery {
    pub fn resolve(&self) -> Result<CpuParams> {
        let duration = duration_param("duration", &self.duration, DEFAULT_DURATION)?;
        let operations = match present(&self.operations) {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                LoadKitError::InvalidArgument(format!("operations: invalid count {raw:?}"))
            })?,
            None => 0,
        };
        let parallel = match present(&self.parallel) {
            Some(raw) => parse_bool("parallel", raw)?,
            None => false,
        };
        Ok(CpuParams { duration, operations, parallel })
    }
}

/// Raw query for `GET /memory`.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct MemoryQuery {
    #[serde(default, alias = "byteSize")]
    pub size: Option<String>,
    #[serde(default)]
    pub hold: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryParams {
    pub size: ByteSize,
    /// How long the block stays allocated before the response is sent.
    pub hold: Duration,
}

impl MemoryParams {
    /// Size as an in-memory length. Blocks larger than `isize::MAX` cannot
    /// exist, so they are rejected here instead of panicking in the allocator.
    pub fn block_len(&self) -> Result<usize> {
        usize::try_from(self.size.bytes())
            .ok()
            .filter(|len| isize::try_from(*len).is_ok())
            .ok_or_else(|| {
                LoadKitError::InvalidArgument(format!("size: {} is too large", self.size))
            })
    }
}

impl MemoryQuery {
    pub fn resolve(&self) -> Result<MemoryParams> {
        let size = match present(&self.size) {
            Some(raw) => ByteSize::from_str(raw)
                .map_err(|e| LoadKitError::InvalidArgument(format!("size: {e}")))?,
            None => DEFAULT_MEMORY_SIZE,
        };
        let hold = duration_param("hold", &self.hold, Duration::ZERO)?;
        Ok(MemoryParams { size, hold })
    }
}

/// Raw query for `GET /time`.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct TimeQuery {
    #[serde(default)]
    pub duration: Option<String>,
}

impl TimeQuery {
    pub fn resolve(&self) -> Result<Duration> {
        duration_param("duration", &self.duration, DEFAULT_DURATION)
    }
}

/// Raw query for `GET /request`.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct RelayQuery {
    #[serde(default)]
    pub url: Option<String>,
}

impl RelayQuery {
    pub fn resolve(&self) -> Result<Url> {
        let raw = present(&self.url).ok_or_else(|| {
            LoadKitError::InvalidArgument("missing required query parameter \"url\"".into())
        })?;
        Url::parse(raw).map_err(|e| LoadKitError::InvalidArgument(format!("url: {e}")))
    }
}

macro_rules! from_query_string {
    ($($ty:ty),*) => {$(
        impl FromStr for $ty {
            type Err = serde_urlencoded::de::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                serde_urlencoded::from_str(s)
            }
        }
    )*};
}

from_query_string!(CpuQuery, MemoryQuery, TimeQuery, RelayQuery);
