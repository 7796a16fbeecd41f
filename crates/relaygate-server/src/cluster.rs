//! Clusters — the peer access-control sets consulted before relaying.
//!
//! A cluster answers one question on the data path: may traffic be relayed
//! to this peer address? `STATIC` clusters hold CIDR subnets, `STRICT_DNS`
//! clusters hold domain names whose addresses a shared [`DnsResolver`]
//! keeps resolved.
//!
//! # Concurrency
//!
//! The endpoint state is an immutable [`Endpoints`] generation behind an
//! `Arc`. Reconcile builds the next generation off to the side and swaps the
//! `Arc` in one step; [`Cluster::route`] clones the current `Arc` and decides
//! against that one generation only, so it never observes a half-applied
//! update. Control-path operations are serialized by a separate mutex.

use crate::resolver::DnsResolver;
use ipnet::{IpNet, Ipv4Net};
use relaygate_core::{ClusterConfig, ClusterType, Factory, GatewayError, GatewayResult, Object};
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, trace, warn};

/// One generation of endpoint state. The variant is the cluster type.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoints {
    /// Permitted subnets, duplicate-free, in configuration order.
    Static(Vec<IpNet>),
    /// Domains currently registered with the resolver, in insertion order.
    StrictDns(Vec<String>),
}

impl Endpoints {
    fn cluster_type(&self) -> ClusterType {
        match self {
            Self::Static(_) => ClusterType::Static,
            Self::StrictDns(_) => ClusterType::StrictDns,
        }
    }
}

/// A named, live-reconfigurable set of permitted peers.
pub struct Cluster {
    /// Immutable identity.
    name: String,
    resolver: Option<Arc<dyn DnsResolver>>,
    state: RwLock<Arc<Endpoints>>,
    /// Serializes reconcile/close against each other.
    update_lock: Mutex<()>,
}

/// The inert sentinel: no name, no resolver, no endpoints.
impl Default for Cluster {
    fn default() -> Self {
        Self {
            name: String::new(),
            resolver: None,
            state: RwLock::new(Arc::new(Endpoints::Static(Vec::new()))),
            update_lock: Mutex::new(()),
        }
    }
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("name", &self.name)
            .field("endpoints", &self.snapshot())
            .field("has_resolver", &self.resolver.is_some())
            .finish()
    }
}

impl Cluster {
    /// Create a cluster and populate it from `conf`.
    ///
    /// # Errors
    ///
    /// Fails on a structurally invalid configuration: empty name, unknown
    /// type literal, or a `STRICT_DNS` cluster without a resolver. Per-entry
    /// parse or registration failures are logged and skipped instead.
    pub fn new(
        conf: &ClusterConfig,
        resolver: Option<Arc<dyn DnsResolver>>,
    ) -> GatewayResult<Self> {
        let cluster_type = conf.validate()?;
        if cluster_type == ClusterType::StrictDns && resolver.is_none() {
            return Err(GatewayError::MissingResolver(conf.name.clone()));
        }

        let cluster = Self {
            name: conf.name.clone(),
            resolver,
            ..Self::default()
        };
        trace!(cluster = %cluster.name, ?conf, "new cluster");

        match cluster.reconcile(conf) {
            // a degraded cluster is still usable until the restart happens
            Ok(()) | Err(GatewayError::RestartRequired) => Ok(cluster),
            Err(e) => Err(e),
        }
    }

    /// Type of the current generation.
    pub fn cluster_type(&self) -> ClusterType {
        self.snapshot().cluster_type()
    }

    /// Whether relaying to `peer` is permitted.
    ///
    /// `STATIC`: `peer` lies in any configured subnet. `STRICT_DNS`: `peer`
    /// equals an address currently resolved for any registered domain; a
    /// failed lookup counts as no match for that domain only. IPv4-mapped
    /// IPv6 peers are compared as IPv4.
    pub fn route(&self, peer: IpAddr) -> bool {
        let peer = peer.to_canonical();
        let state = self.snapshot();

        match &*state {
            Endpoints::Static(nets) => {
                trace!(cluster = %self.name, peer = %peer, subnets = nets.len(), "route: STATIC");
                nets.iter().any(|net| net.contains(&peer))
            }
            Endpoints::StrictDns(domains) => {
                trace!(cluster = %self.name, peer = %peer, domains = ?domains, "route: STRICT_DNS");
                let Some(resolver) = &self.resolver else {
                    return false;
                };

                for domain in domains {
                    match resolver.lookup(domain) {
                        Ok(addrs) => {
                            if addrs.iter().any(|addr| addr.to_canonical() == peer) {
                                return true;
                            }
                        }
                        Err(e) => {
                            debug!(cluster = %self.name, domain = %domain, error = %e, "could not resolve domain");
                        }
                    }
                }
                false
            }
        }
    }

    fn snapshot(&self) -> Arc<Endpoints> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(&self, next: Endpoints) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }

    fn unregister_all(&self, domains: &[String]) {
        if let Some(resolver) = &self.resolver {
            for domain in domains {
                resolver.unregister(domain);
            }
        }
    }

    /// Next `STRICT_DNS` generation. Added domains are registered before the
    /// swap; the caller unregisters the returned removals after it.
    fn reconcile_domains(
        &self,
        resolver: &dyn DnsResolver,
        current: &[String],
        requested: &[String],
    ) -> (Vec<String>, Vec<String>) {
        let (deleted, added) = diff(current, requested);

        let mut domains: Vec<String> = current
            .iter()
            .filter(|d| !deleted.contains(d))
            .cloned()
            .collect();

        for domain in added {
            match resolver.register(&domain) {
                Ok(()) => domains.push(domain),
                Err(e) => {
                    warn!(cluster = %self.name, domain = %domain, error = %e, "could not register domain, ignoring");
                }
            }
        }

        (domains, deleted)
    }
}

impl Object for Cluster {
    type Config = ClusterConfig;

    fn object_name(&self) -> &str {
        &self.name
    }

    /// Every cluster change, type changes included, is hot-applied.
    fn inspect(&self, _old: Option<&ClusterConfig>, _new: Option<&ClusterConfig>) -> bool {
        false
    }

    /// Structural checks run before anything is touched, and the new type is
    /// published together with its endpoint data, so a rejected config
    /// leaves the previous generation fully intact.
    fn reconcile(&self, conf: &ClusterConfig) -> GatewayResult<()> {
        let cluster_type = conf.validate()?;
        if conf.name != self.name {
            return Err(GatewayError::InvalidConf(format!(
                "cluster {:?} cannot take configuration of {:?}",
                self.name, conf.name
            )));
        }
        trace!(cluster = %self.name, ?conf, "reconcile");

        let _guard = self.update_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();

        match cluster_type {
            ClusterType::Static => {
                let nets = parse_endpoints(&self.name, &conf.endpoints);
                self.publish(Endpoints::Static(nets));

                if let Endpoints::StrictDns(domains) = &*current {
                    self.unregister_all(domains);
                }
            }
            ClusterType::StrictDns => {
                let resolver = self
                    .resolver
                    .as_deref()
                    .ok_or_else(|| GatewayError::MissingResolver(self.name.clone()))?;

                let current_domains: &[String] = match &*current {
                    Endpoints::StrictDns(domains) => domains,
                    Endpoints::Static(_) => &[],
                };

                let (domains, deleted) =
                    self.reconcile_domains(resolver, current_domains, &conf.endpoints);
                self.publish(Endpoints::StrictDns(domains));

                for domain in &deleted {
                    resolver.unregister(domain);
                }
            }
        }

        debug!(cluster = %self.name, cluster_type = %cluster_type, "cluster reconciled");
        Ok(())
    }

    /// Domains are reported sorted; subnets in configuration order.
    fn get_config(&self) -> ClusterConfig {
        let state = self.snapshot();

        let endpoints = match &*state {
            Endpoints::Static(nets) => nets.iter().map(|net| net.to_string()).collect(),
            Endpoints::StrictDns(domains) => {
                let mut domains = domains.clone();
                domains.sort();
                domains
            }
        };

        ClusterConfig {
            name: self.name.clone(),
            cluster_type: state.cluster_type().to_string(),
            endpoints,
        }
    }

    fn close(&self) -> GatewayResult<()> {
        trace!(cluster = %self.name, "closing cluster");

        let _guard = self.update_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();

        if let Endpoints::StrictDns(domains) = &*current {
            self.publish(Endpoints::StrictDns(Vec::new()));
            self.unregister_all(domains);
        }

        Ok(())
    }
}

/// Builds [`Cluster`]s that share one resolver.
pub struct ClusterFactory {
    resolver: Option<Arc<dyn DnsResolver>>,
}

impl ClusterFactory {
    /// Create a factory whose clusters share `resolver`. `None` limits the
    /// factory to `STATIC` clusters.
    pub fn new(resolver: Option<Arc<dyn DnsResolver>>) -> Self {
        Self { resolver }
    }
}

impl Factory for ClusterFactory {
    type Object = Cluster;

    fn new_object(&self, conf: Option<&ClusterConfig>) -> GatewayResult<Cluster> {
        match conf {
            None => Ok(Cluster::default()),
            Some(conf) => Cluster::new(conf, self.resolver.clone()),
        }
    }
}

/// Parse endpoint literals into a duplicate-free subnet list. Each literal is
/// tried as a CIDR subnet, then as a bare address widened to a host subnet
/// (`/32` or `/128`); anything else is logged and skipped.
fn parse_endpoints(cluster: &str, literals: &[String]) -> Vec<IpNet> {
    let mut nets: Vec<IpNet> = Vec::with_capacity(literals.len());

    for literal in literals {
        let literal = literal.trim();
        match parse_endpoint(literal) {
            Ok(net) => {
                if !nets.contains(&net) {
                    nets.push(net);
                }
            }
            Err(reason) => {
                warn!(cluster = %cluster, endpoint = %literal, "{reason}, ignoring");
            }
        }
    }

    nets
}

fn parse_endpoint(literal: &str) -> Result<IpNet, String> {
    if let Ok(net) = literal.parse::<IpNet>() {
        return Ok(unmap_ipv4(net.trunc()));
    }

    let addr = literal
        .parse::<IpAddr>()
        .map_err(|_| "invalid endpoint IP".to_string())?
        .to_canonical();

    let prefix = if addr.is_ipv4() { 32 } else { 128 };
    format!("{addr}/{prefix}")
        .parse::<IpNet>()
        .map_err(|e| format!("could not convert endpoint to CIDR subnet: {e}"))
}

/// Rewrite an IPv4-mapped IPv6 subnet (`::ffff:a.b.c.d/96+n`) as the IPv4
/// subnet `a.b.c.d/n`, so it matches peers in their canonical form.
fn unmap_ipv4(net: IpNet) -> IpNet {
    let IpNet::V6(v6) = net else {
        return net;
    };
    if v6.prefix_len() < 96 {
        return net;
    }
    match v6.network().to_ipv4_mapped() {
        Some(v4) => Ipv4Net::new(v4, v6.prefix_len() - 96)
            .map(|n| IpNet::V4(n.trunc()))
            .unwrap_or(net),
        None => net,
    }
}

/// Domain names compare case-insensitively.
fn normalize_domain(domain: &str) -> String {
    domain.trim().to_ascii_lowercase()
}

/// Split `requested` against `current` into (to remove, to add). The add
/// list is normalized, deduplicated, and keeps request order.
fn diff(current: &[String], requested: &[String]) -> (Vec<String>, Vec<String>) {
    let requested: Vec<String> = requested.iter().map(|d| normalize_domain(d)).collect();
    let wanted: HashSet<&str> = requested.iter().map(String::as_str).collect();
    let have: HashSet<&str> = current.iter().map(String::as_str).collect();

    let deleted = current
        .iter()
        .filter(|d| !wanted.contains(d.as_str()))
        .cloned()
        .collect();

    let mut seen = HashSet::new();
    let added = requested
        .iter()
        .filter(|d| !have.contains(d.as_str()) && seen.insert(d.as_str()))
        .cloned()
        .collect();

    (deleted, added)
}
