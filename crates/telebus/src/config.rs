// SPDX-License-Identifier: Apache-2.0 OR MIT

//! JSON network configuration, loaded once at startup from a conventional
//! path under the user's home directory.
//!
//! Grounded on the `<home>/.network_config/<name>.json` convention: entries
//! are keyed by system name (`"time_sync"`, `"sensor"`, ...) and carry the
//! endpoint strings that system binds or connects to.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// An endpoint string: `<protocol>://<ip>:<port>`, `inproc://<name>`, or
/// `ipc://<path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `udp://ip:port` or similar networked transport.
    Udp { host: String, port: u16 },
    /// `inproc://name`: an in-process loopback channel, no real socket.
    Inproc { name: String },
    /// `ipc://path`: a local filesystem-addressed channel.
    Ipc { path: String },
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Udp { host, port } => write!(f, "udp://{host}:{port}"),
            Endpoint::Inproc { name } => write!(f, "inproc://{name}"),
            Endpoint::Ipc { path } => write!(f, "ipc://{path}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| ConfigurationError::BadEndpoint(s.to_string()))?;
        match scheme {
            "inproc" => Ok(Endpoint::Inproc { name: rest.to_string() }),
            "ipc" => Ok(Endpoint::Ipc { path: rest.to_string() }),
            "udp" | "tcp" => {
                let (host, port) = rest
                    .rsplit_once(':')
                    .ok_or_else(|| ConfigurationError::BadEndpoint(s.to_string()))?;
                let port: u16 = port
                    .parse()
                    .map_err(|_| ConfigurationError::BadEndpoint(s.to_string()))?;
                Ok(Endpoint::Udp {
                    host: host.to_string(),
                    port,
                })
            }
            _ => Err(ConfigurationError::BadEndpoint(s.to_string())),
        }
    }
}

/// The default endpoint the bus binds and connects to at `init()`.
pub const DEFAULT_INPROC_ENDPOINT: &str = "inproc://pubsub";

/// Per-system endpoint configuration: the `bind` address a server listens
/// on, the `connect` address a client dials, and `kissnet`, the dedicated
/// UDP endpoint time-sync traffic uses regardless of `bind`/`connect`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemEndpoints {
    pub bind: Option<String>,
    pub connect: Option<String>,
    pub kissnet: Option<String>,
}

impl SystemEndpoints {
    pub fn bind_endpoint(&self) -> Result<Option<Endpoint>, ConfigurationError> {
        self.bind.as_deref().map(Endpoint::from_str).transpose()
    }

    pub fn connect_endpoint(&self) -> Result<Option<Endpoint>, ConfigurationError> {
        self.connect.as_deref().map(Endpoint::from_str).transpose()
    }

    pub fn kissnet_endpoint(&self) -> Result<Option<Endpoint>, ConfigurationError> {
        self.kissnet.as_deref().map(Endpoint::from_str).transpose()
    }
}

/// The full JSON document: system name to its endpoints.
pub type NetworkConfig = HashMap<String, SystemEndpoints>;

/// Directory holding per-profile network configuration files.
pub fn config_dir() -> Result<PathBuf, ConfigurationError> {
    dirs::home_dir()
        .map(|home| home.join(".network_config"))
        .ok_or(ConfigurationError::NoHomeDir)
}

/// Path to the JSON config file for a given profile name.
pub fn config_path(name: &str) -> Result<PathBuf, ConfigurationError> {
    Ok(config_dir()?.join(format!("{name}.json")))
}

/// Load and parse the network configuration for `name`
/// (`<home>/.network_config/<name>.json`).
pub fn load_network_config(name: &str) -> Result<NetworkConfig, ConfigurationError> {
    let path = config_path(name)?;
    let text = fs::read_to_string(&path).map_err(|source| ConfigurationError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigurationError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// Look up a required system's endpoints within an already-loaded config.
pub fn system<'a>(
    config: &'a NetworkConfig,
    profile: &str,
    system_name: &'static str,
) -> Result<&'a SystemEndpoints, ConfigurationError> {
    config.get(system_name).ok_or_else(|| ConfigurationError::MissingKey {
        profile: profile.to_string(),
        key: system_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_udp_endpoint() {
        let ep: Endpoint = "udp://127.0.0.1:9000".parse().unwrap();
        assert_eq!(
            ep,
            Endpoint::Udp {
                host: "127.0.0.1".into(),
                port: 9000
            }
        );
    }

    #[test]
    fn parses_inproc_and_ipc() {
        assert_eq!(
            "inproc://pubsub".parse::<Endpoint>().unwrap(),
            Endpoint::Inproc { name: "pubsub".into() }
        );
        assert_eq!(
            "ipc:///tmp/bus.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Ipc { path: "/tmp/bus.sock".into() }
        );
    }

    #[test]
    fn rejects_malformed_endpoint() {
        assert!("not-an-endpoint".parse::<Endpoint>().is_err());
        assert!("udp://host-no-port".parse::<Endpoint>().is_err());
    }

    #[test]
    fn loads_config_from_temp_home() {
        let tmp = tempfile::tempdir().unwrap();
        let config_dir = tmp.path().join(".network_config");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join("test_profile.json"),
            r#"{"time_sync": {"bind": "udp://0.0.0.0:7000", "connect": null, "kissnet": "udp://0.0.0.0:7001"}}"#,
        )
        .unwrap();

        let path = config_dir.join("test_profile.json");
        let text = fs::read_to_string(&path).unwrap();
        let config: NetworkConfig = serde_json::from_str(&text).unwrap();
        let endpoints = system(&config, "test_profile", "time_sync").unwrap();
        assert_eq!(endpoints.bind.as_deref(), Some("udp://0.0.0.0:7000"));
        assert_eq!(
            endpoints.kissnet_endpoint().unwrap(),
            Some(Endpoint::Udp {
                host: "0.0.0.0".into(),
                port: 7001
            })
        );
    }

    #[test]
    fn missing_key_reports_profile_and_key() {
        let config: NetworkConfig = HashMap::new();
        let err = system(&config, "test_profile", "time_sync").unwrap_err();
        match err {
            ConfigurationError::MissingKey { profile, key } => {
                assert_eq!(profile, "test_profile");
                assert_eq!(key, "time_sync");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }
}
