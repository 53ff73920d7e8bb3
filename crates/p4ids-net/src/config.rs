use std::net::IpAddr;
use std::path::{Path, PathBuf};

use ipnet::Ipv4Net;
use serde::Deserialize;
use thiserror::Error;

use crate::error::TopologyError;
use crate::shaping::LinkShaping;
use crate::topology::{
    Controller, Endpoint, Host, Link, Switch, SwitchMode, Topology, TopologyBuilder,
    DEFAULT_NAMESPACE_PREFIX, DEFAULT_PROTOCOLS,
};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// Raw TOML document. Every section is optional; a missing section falls
/// back to the corresponding part of the default IDS topology.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TopologyConfigInput {
    pub version: u32,
    pub namespace_prefix: Option<String>,
    pub controller: Option<ControllerInput>,
    pub hosts: Option<Vec<HostInput>>,
    pub switches: Option<Vec<SwitchInput>>,
    pub links: Option<Vec<LinkInput>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ControllerInput {
    pub name: Option<String>,
    pub ip: Option<IpAddr>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostInput {
    pub name: String,
    pub ip: Ipv4Net,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchInput {
    pub name: String,
    pub protocols: Option<String>,
    #[serde(default)]
    pub mode: SwitchMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkInput {
    pub node1: String,
    pub port1: u16,
    pub node2: String,
    pub port2: u16,
    #[serde(flatten)]
    pub shaping: LinkShaping,
}

/// Resolved topology records, not yet validated. See [`TopologyConfig::build`].
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyConfig {
    pub version: u32,
    pub namespace_prefix: String,
    pub controller: Controller,
    pub hosts: Vec<Host>,
    pub switches: Vec<Switch>,
    pub links: Vec<Link>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        let ids = TopologyBuilder::default_ids();
        Self {
            version: CONFIG_VERSION,
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.into(),
            controller: Controller::default(),
            hosts: ids.hosts().to_vec(),
            switches: ids.switches().to_vec(),
            links: ids.links().to_vec(),
        }
    }
}

impl TopologyConfigInput {
    pub fn resolve(self) -> Result<TopologyConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let defaults = TopologyConfig::default();

        let controller = match self.controller {
            Some(c) => Controller {
                name: c.name.unwrap_or(defaults.controller.name),
                ip: c.ip.unwrap_or(defaults.controller.ip),
                port: c.port.unwrap_or(defaults.controller.port),
            },
            None => defaults.controller,
        };

        let hosts = match self.hosts {
            Some(hosts) => hosts
                .into_iter()
                .map(|h| Host {
                    name: h.name.trim().to_string(),
                    ip: h.ip,
                })
                .collect(),
            None => defaults.hosts,
        };

        let switches = match self.switches {
            Some(switches) => switches
                .into_iter()
                .map(|s| Switch {
                    name: s.name.trim().to_string(),
                    protocols: s
                        .protocols
                        .filter(|p| !p.trim().is_empty())
                        .unwrap_or_else(|| DEFAULT_PROTOCOLS.to_string()),
                    mode: s.mode,
                })
                .collect(),
            None => defaults.switches,
        };

        let links = match self.links {
            Some(links) => links
                .into_iter()
                .map(|l| Link {
                    a: Endpoint::new(l.node1.trim(), l.port1),
                    b: Endpoint::new(l.node2.trim(), l.port2),
                    shaping: l.shaping,
                })
                .collect(),
            None => defaults.links,
        };

        Ok(TopologyConfig {
            version,
            namespace_prefix: self
                .namespace_prefix
                .unwrap_or(defaults.namespace_prefix),
            controller,
            hosts,
            switches,
            links,
        })
    }
}

impl TopologyConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(TopologyConfig::default());
        }
        let parsed: TopologyConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    /// Validates the records into a [`Topology`].
    pub fn build(&self) -> Result<Topology, ConfigError> {
        let mut builder = TopologyBuilder::new(self.controller.clone());
        builder.namespace_prefix(&self.namespace_prefix);
        for h in &self.hosts {
            builder.add_host(&h.name, h.ip);
        }
        for s in &self.switches {
            builder.add_switch(&s.name, &s.protocols, s.mode);
        }
        for l in &self.links {
            builder.add_link(&l.a.node, l.a.port, &l.b.node, l.b.port, l.shaping.clone());
        }
        Ok(builder.build()?)
    }
}
