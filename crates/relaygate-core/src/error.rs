use thiserror::Error;

/// Errors produced by gateway-managed objects and their configuration.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid configuration: {0}")]
    InvalidConf(String),

    #[error("invalid object name: {0}")]
    InvalidName(String),

    #[error("unknown cluster type: {0:?}")]
    UnknownClusterType(String),

    #[error("STRICT_DNS cluster {0:?} initialized with no DNS resolver")]
    MissingResolver(String),

    /// The change cannot be hot-applied; the object must be recreated.
    #[error("restart required")]
    RestartRequired,

    #[error("resolver error: {0}")]
    Resolver(#[from] ResolverError),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by a DNS resolver implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolverError {
    #[error("invalid domain name: {0:?}")]
    InvalidDomain(String),

    #[error("domain not registered: {0}")]
    NotRegistered(String),

    #[error("domain {domain} unresolved: {reason}")]
    Unresolved { domain: String, reason: String },
}

pub type GatewayResult<T> = Result<T, GatewayError>;
