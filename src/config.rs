use std::net::Ipv4Addr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::transport::{MDNS_ADDR, MDNS_PORT, UDP_SIZE};

pub const DEFAULT_HOST_TTL: u32 = 240;

/// Responder settings. Every field has a default, so a config file only needs the
/// values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    pub multicast_addr: Ipv4Addr,
    pub port: u16,
    /// Host name used as the target of services; defaults to the OS host name in `.local`.
    pub hostname: Option<String>,
    /// Address advertised for the host and used as the multicast interface.
    pub host_address: Option<Ipv4Addr>,
    pub host_ttl: u32,
    pub udp_size: usize,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            multicast_addr: MDNS_ADDR,
            port: MDNS_PORT,
            hostname: None,
            host_address: None,
            host_ttl: DEFAULT_HOST_TTL,
            udp_size: UDP_SIZE,
        }
    }
}

impl ResponderConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .context(format!("reading config from {}", path.display()))?;
        serde_json::from_str(&data).context(format!("parsing {}", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data).context(format!("writing config to {}", path.display()))
    }
}
