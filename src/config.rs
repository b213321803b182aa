use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A place the proxy listens on or connects to.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Tcp {
        addr: SocketAddr,
    },
    Unix {
        path: PathBuf,
        /// Octal file mode applied to a listening socket, e.g. "0700".
        #[serde(default = "default_socket_mode")]
        mode: String,
    },
}

impl Endpoint {
    /// The listening socket's file mode, parsed from its octal form.
    pub fn socket_mode(&self) -> Result<u32> {
        match self {
            Endpoint::Tcp { .. } => Ok(0),
            Endpoint::Unix { mode, .. } => u32::from_str_radix(mode, 8)
                .with_context(|| format!("invalid socket mode {mode:?}")),
        }
    }
}

fn default_socket_mode() -> String {
    "0700".to_string()
}

fn default_listen() -> Endpoint {
    Endpoint::Tcp {
        addr: "127.0.0.1:5050".parse().expect("static address"),
    }
}

fn default_upstream() -> Endpoint {
    Endpoint::Tcp {
        addr: "127.0.0.1:3306".parse().expect("static address"),
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    #[serde(default = "default_listen")]
    pub listen: Endpoint,
    #[serde(default = "default_upstream")]
    pub upstream: Endpoint,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            listen: default_listen(),
            upstream: default_upstream(),
        }
    }
}

impl ProxyConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("reading config file {path}"))?;
        let config: ProxyConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}
