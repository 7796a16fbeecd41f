//! Test doubles shared by unit tests.

use crate::resolver::DnsResolver;
use relaygate_core::ResolverError;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Mutex;

#[derive(Default)]
struct MockState {
    owners: HashMap<String, usize>,
    register_calls: Vec<String>,
    unregister_calls: Vec<String>,
    addrs: HashMap<String, Vec<IpAddr>>,
    rejected: HashSet<String>,
}

/// Recording resolver with scripted lookups.
///
/// Registered domains without scripted addresses fail lookup as unresolved.
#[derive(Default)]
pub struct MockResolver {
    state: Mutex<MockState>,
}

impl MockResolver {
    /// Make `register(domain)` fail.
    pub fn reject(&self, domain: &str) {
        self.state.lock().unwrap().rejected.insert(domain.to_string());
    }

    pub fn set_addrs(&self, domain: &str, addrs: &[&str]) {
        let addrs = addrs.iter().map(|a| a.parse().unwrap()).collect();
        self.state
            .lock()
            .unwrap()
            .addrs
            .insert(domain.to_string(), addrs);
    }

    pub fn register_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().register_calls.clone()
    }

    pub fn unregister_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().unregister_calls.clone()
    }

    /// Domains with at least one outstanding registration, sorted.
    pub fn registered(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut domains: Vec<String> = state
            .owners
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(d, _)| d.clone())
            .collect();
        domains.sort();
        domains
    }
}

impl DnsResolver for MockResolver {
    fn register(&self, domain: &str) -> Result<(), ResolverError> {
        let mut state = self.state.lock().unwrap();
        state.register_calls.push(domain.to_string());
        if state.rejected.contains(domain) {
            return Err(ResolverError::InvalidDomain(domain.to_string()));
        }
        *state.owners.entry(domain.to_string()).or_default() += 1;
        Ok(())
    }

    fn unregister(&self, domain: &str) {
        let mut state = self.state.lock().unwrap();
        state.unregister_calls.push(domain.to_string());
        if let Some(n) = state.owners.get_mut(domain) {
            *n = n.saturating_sub(1);
        }
    }

    fn lookup(&self, domain: &str) -> Result<Vec<IpAddr>, ResolverError> {
        let state = self.state.lock().unwrap();
        if state.owners.get(domain).copied().unwrap_or(0) == 0 {
            return Err(ResolverError::NotRegistered(domain.to_string()));
        }
        state
            .addrs
            .get(domain)
            .cloned()
            .ok_or_else(|| ResolverError::Unresolved {
                domain: domain.to_string(),
                reason: "no scripted addresses".to_string(),
            })
    }
}
