//! DNS resolution for `STRICT_DNS` clusters.
//!
//! [`DnsResolver`] is the contract clusters are written against: domains are
//! registered for continuous resolution and looked up from a cache, never
//! with a network round trip on the data path. [`CachingResolver`] is the
//! implementation the server runs, refreshing registered domains in a
//! background task via `tokio::net::lookup_host`.

use relaygate_core::ResolverError;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::net;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shared name-resolution capability.
///
/// Implementations are shared by many clusters at once, so every method
/// must tolerate concurrent callers registering and unregistering the same
/// domain independently.
pub trait DnsResolver: Send + Sync {
    /// Start tracking `domain`. Registering a domain already tracked is not
    /// an error.
    fn register(&self, domain: &str) -> Result<(), ResolverError>;

    /// Stop tracking `domain` on behalf of one caller. Unknown domains are
    /// ignored.
    fn unregister(&self, domain: &str);

    /// Cached addresses of `domain`.
    fn lookup(&self, domain: &str) -> Result<Vec<IpAddr>, ResolverError>;
}

/// Tunables for [`CachingResolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverSettings {
    /// Period of the background refresh loop.
    pub refresh_interval: Duration,
    /// Upper bound on a single domain's resolution.
    pub lookup_timeout: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(5),
            lookup_timeout: Duration::from_secs(2),
        }
    }
}

/// Cache entry of a registered domain.
#[derive(Debug, Default)]
struct DomainEntry {
    /// Number of outstanding registrations.
    owners: usize,
    /// Last successful resolution.
    addrs: Option<Vec<IpAddr>>,
    /// Error of the most recent failed resolution, if any.
    last_error: Option<String>,
}

/// Reference-counted, cache-backed resolver.
///
/// A domain stays registered until every `register` call for it has been
/// matched by an `unregister`. Lookups only ever read the cache; a failed
/// refresh keeps serving the last known addresses.
pub struct CachingResolver {
    entries: RwLock<HashMap<String, DomainEntry>>,
    settings: ResolverSettings,
    /// Wakes the refresh loop when a new domain shows up.
    wakeup: Notify,
}

impl CachingResolver {
    /// Create an empty resolver. Nothing is resolved until
    /// [`refresh`](Self::refresh) runs or [`spawn`](Self::spawn) starts the loop.
    pub fn new(settings: ResolverSettings) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            settings,
            wakeup: Notify::new(),
        }
    }

    /// Currently registered domains, sorted.
    pub fn registered(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut domains: Vec<String> = entries.keys().cloned().collect();
        domains.sort();
        domains
    }

    /// Resolve every registered domain once and update the cache.
    ///
    /// The cache lock is not held across network I/O; results for domains
    /// unregistered in the meantime are dropped.
    pub async fn refresh(&self) {
        let domains = self.registered();

        for domain in domains {
            let result = self.resolve(&domain).await;

            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = entries.get_mut(&domain) else {
                continue;
            };
            match result {
                Ok(addrs) => {
                    debug!(domain = %domain, count = addrs.len(), "resolved");
                    entry.addrs = Some(addrs);
                    entry.last_error = None;
                }
                Err(e) => {
                    warn!(domain = %domain, error = %e, "DNS resolution failed");
                    entry.last_error = Some(e);
                }
            }
        }
    }

    /// Start the background refresh loop.
    pub fn spawn(self: Arc<Self>) -> ResolverHandle {
        let (cancel_tx, mut cancel_rx) = mpsc::channel::<()>(1);
        let resolver = self;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(resolver.settings.refresh_interval);
            info!(
                interval_secs = resolver.settings.refresh_interval.as_secs(),
                "DNS resolver started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = resolver.wakeup.notified() => {}
                    _ = cancel_rx.recv() => break,
                }
                resolver.refresh().await;
            }

            info!("DNS resolver stopped");
        });

        ResolverHandle { cancel_tx, task }
    }

    async fn resolve(&self, domain: &str) -> Result<Vec<IpAddr>, String> {
        // lookup_host requires a host:port pair
        let lookup_addr = format!("{}:0", domain.trim_end_matches('.'));

        match tokio::time::timeout(self.settings.lookup_timeout, net::lookup_host(lookup_addr))
            .await
        {
            Ok(Ok(addrs)) => {
                let mut ips: Vec<IpAddr> = Vec::new();
                for addr in addrs {
                    if !ips.contains(&addr.ip()) {
                        ips.push(addr.ip());
                    }
                }
                if ips.is_empty() {
                    Err(format!("no addresses found for {domain}"))
                } else {
                    Ok(ips)
                }
            }
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "timed out after {}ms",
                self.settings.lookup_timeout.as_millis()
            )),
        }
    }
}

impl DnsResolver for CachingResolver {
    fn register(&self, domain: &str) -> Result<(), ResolverError> {
        validate_domain(domain)?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(domain.to_ascii_lowercase()).or_default();
        entry.owners += 1;
        let is_new = entry.owners == 1;
        drop(entries);

        if is_new {
            debug!(domain = %domain, "domain registered");
            self.wakeup.notify_one();
        }
        Ok(())
    }

    fn unregister(&self, domain: &str) {
        let key = domain.to_ascii_lowercase();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(&key) {
            entry.owners = entry.owners.saturating_sub(1);
            if entry.owners == 0 {
                entries.remove(&key);
                debug!(domain = %domain, "domain unregistered");
            }
        }
    }

    fn lookup(&self, domain: &str) -> Result<Vec<IpAddr>, ResolverError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .get(&domain.to_ascii_lowercase())
            .ok_or_else(|| ResolverError::NotRegistered(domain.to_string()))?;

        match &entry.addrs {
            Some(addrs) => Ok(addrs.clone()),
            None => Err(ResolverError::Unresolved {
                domain: domain.to_string(),
                reason: entry
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "resolution pending".to_string()),
            }),
        }
    }
}

/// Handle to a running refresh loop.
pub struct ResolverHandle {
    cancel_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ResolverHandle {
    /// Cancel the refresh loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.cancel_tx.send(()).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "DNS resolver task failed");
        }
    }
}

/// Structural domain-name check: dot-separated labels of 1-63 characters
/// from `[A-Za-z0-9_-]`, no leading/trailing hyphen, at most 253 octets.
/// A single trailing dot is accepted.
pub fn validate_domain(domain: &str) -> Result<(), ResolverError> {
    let invalid = || ResolverError::InvalidDomain(domain.to_string());

    let name = domain.strip_suffix('.').unwrap_or(domain);
    if name.is_empty() || name.len() > 253 {
        return Err(invalid());
    }

    for label in name.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(invalid());
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid());
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(invalid());
        }
    }

    Ok(())
}
