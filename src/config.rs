use std::net::Ipv6Addr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/fahrrad.toml";
pub const DEFAULT_STORE_NAMESPACE: &str = "fahrrad/config";

/// Advertisement parameters read from the configuration store at startup.
/// Immutable for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterAdvertisementConfig {
    pub assigned_prefix_length: u8,
    pub on_link_prefix_length: u8,

    /// seconds
    pub valid_lifetime: u32,

    /// seconds
    pub preferred_lifetime: u32,

    /// period of unsolicited advertisements
    pub advertisement_interval: Duration,
}

impl RouterAdvertisementConfig {
    pub const DEFAULT: Self = Self {
        assigned_prefix_length: 64,
        on_link_prefix_length: 48,
        valid_lifetime: 86400,
        preferred_lifetime: 14400,
        advertisement_interval: Duration::from_secs(5 * 60),
    };
}

impl Default for RouterAdvertisementConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Daemon configuration file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,

    /// Absent means an in-memory store seeded with the built-in defaults.
    #[serde(default)]
    pub store: Option<StoreConfig>,

    #[serde(default)]
    pub advertisement: AdvertisementConfig,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(file)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, crate::Error> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Reads `path`, falling back to the defaults if it does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let path = path.as_ref();
        if !path.exists() {
            log::warn!("Configuration file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::from_file(path)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct GlobalConfig {
    /// interface to answer solicitations on
    #[serde(default)]
    pub interface: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub url: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    DEFAULT_STORE_NAMESPACE.to_owned()
}

/// Fixed Router Advertisement header values and the advertised prefix.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct AdvertisementConfig {
    pub prefix: Ipv6Addr,
    pub hop_limit: u8,
    pub managed: bool,
    pub other: bool,

    /// seconds; zero means "not a default router"
    pub router_lifetime: u16,

    /// milliseconds
    pub reachable_time: u32,

    /// milliseconds
    pub retrans_timer: u32,

    pub mtu: Option<u32>,
}

impl Default for AdvertisementConfig {
    fn default() -> Self {
        Self {
            prefix: Ipv6Addr::UNSPECIFIED,
            hop_limit: 0,
            managed: false,
            other: false,
            router_lifetime: 0,
            reachable_time: 0,
            retrans_timer: 0,
            mtu: None,
        }
    }
}

impl AdvertisementConfig {
    /// Rejects a configuration that would advertise the unspecified prefix.
    pub fn check_prefix(&self) -> Result<(), crate::Error> {
        if self.prefix.is_unspecified() {
            return Err(crate::Error::Config("no prefix configured, set [advertisement] prefix".to_owned()));
        }
        Ok(())
    }
}
