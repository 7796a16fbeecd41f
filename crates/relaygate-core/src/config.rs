//! Cluster configuration as consumed from the control plane.

use crate::error::{GatewayError, GatewayResult};
use crate::object::ObjectConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cluster type assumed when the `type` field is left empty.
pub const DEFAULT_CLUSTER_TYPE: ClusterType = ClusterType::Static;

/// How a cluster materializes its set of permitted peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterType {
    /// Literal IP addresses and CIDR subnets.
    Static,
    /// Domain names kept resolved by a shared DNS resolver.
    StrictDns,
}

impl ClusterType {
    /// Canonical configuration literal.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "STATIC",
            Self::StrictDns => "STRICT_DNS",
        }
    }
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a type literal case-insensitively.
impl FromStr for ClusterType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STATIC" => Ok(Self::Static),
            "STRICT_DNS" => Ok(Self::StrictDns),
            _ => Err(GatewayError::UnknownClusterType(s.to_string())),
        }
    }
}

/// `[[cluster]]` entry of the gateway configuration.
///
/// `cluster_type` keeps the raw literal; it is only interpreted by
/// [`ClusterConfig::validate`], so an unrecognized type is reported as a
/// configuration error instead of failing deserialization of the whole file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Unique cluster name.
    pub name: String,
    /// `STATIC` or `STRICT_DNS`; empty means [`DEFAULT_CLUSTER_TYPE`].
    #[serde(rename = "type", default)]
    pub cluster_type: String,
    /// CIDR/IP literals for `STATIC`, hostnames for `STRICT_DNS`.
    #[serde(default)]
    pub endpoints: Vec<String>,
}

impl ClusterConfig {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, cluster_type: ClusterType, endpoints: &[&str]) -> Self {
        Self {
            name: name.into(),
            cluster_type: cluster_type.to_string(),
            endpoints: endpoints.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Structural validation. Returns the parsed cluster type.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidName`] for an empty name,
    /// [`GatewayError::UnknownClusterType`] for an unrecognized type literal.
    pub fn validate(&self) -> GatewayResult<ClusterType> {
        if self.name.trim().is_empty() {
            return Err(GatewayError::InvalidName(
                "missing name in cluster configuration".to_string(),
            ));
        }

        if self.cluster_type.trim().is_empty() {
            return Ok(DEFAULT_CLUSTER_TYPE);
        }

        self.cluster_type.trim().parse()
    }
}

impl ObjectConfig for ClusterConfig {
    fn name(&self) -> &str {
        &self.name
    }
}
