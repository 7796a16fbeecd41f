//! relaygate-core: Shared library for the relaygate TURN/STUN gateway.
//!
//! Provides the cluster configuration shape, the gateway error taxonomy, and
//! the generic lifecycle contract (`Object` / `Factory`) implemented by every
//! gateway-managed object kind.

pub mod config;
pub mod error;
pub mod object;

// Re-export commonly used items at crate root.
pub use config::{ClusterConfig, ClusterType, DEFAULT_CLUSTER_TYPE};
pub use error::{GatewayError, GatewayResult, ResolverError};
pub use object::{Factory, Object, ObjectConfig};
