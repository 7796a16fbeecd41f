//! Name-keyed ownership of gateway objects.
//!
//! The manager is the only place that knows which object owns which name.
//! On every configuration change it diffs the requested object set against
//! the live one and drives the lifecycle contract: `inspect` to classify the
//! change, then `reconcile`, `Factory::new_object` or `close`. It never
//! branches on the object kind.

use crate::cluster::{Cluster, ClusterFactory};
use relaygate_core::{Factory, GatewayError, GatewayResult, Object, ObjectConfig};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

type ConfigOf<F> = <<F as Factory>::Object as Object>::Config;

/// Manager for clusters, the object kind consulted on the data path.
pub type ClusterManager = ObjectManager<ClusterFactory>;

/// Outcome of one [`ObjectManager::reconcile`] pass. Names are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Objects built from configurations with new names.
    pub created: Vec<String>,
    /// Existing objects reconciled in place.
    pub updated: Vec<String>,
    /// Objects closed because their name left the configuration.
    pub deleted: Vec<String>,
    /// Objects whose change could not be hot-applied.
    pub restart_required: Vec<String>,
    /// Objects whose configuration was rejected, with the reason.
    pub failed: Vec<(String, String)>,
}

impl ReconcileSummary {
    /// Whether any change is waiting for a process restart.
    pub fn needs_restart(&self) -> bool {
        !self.restart_required.is_empty()
    }

    fn sort(&mut self) {
        self.created.sort();
        self.updated.sort();
        self.deleted.sort();
        self.restart_required.sort();
        self.failed.sort();
    }
}

/// Owns every live object of one kind, keyed by name.
pub struct ObjectManager<F: Factory> {
    factory: F,
    objects: RwLock<HashMap<String, Arc<F::Object>>>,
    /// Serializes control-path passes; lookups only take `objects` briefly.
    update_lock: Mutex<()>,
}

impl<F: Factory> ObjectManager<F> {
    /// Create an empty manager building objects with `factory`.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            objects: RwLock::new(HashMap::new()),
            update_lock: Mutex::new(()),
        }
    }

    /// Look up a live object by name.
    pub fn get(&self, name: &str) -> Option<Arc<F::Object>> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of all live objects, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Live configuration of every object, sorted by name.
    pub fn configs(&self) -> Vec<ConfigOf<F>> {
        self.names()
            .iter()
            .filter_map(|name| self.get(name))
            .map(|obj| obj.get_config())
            .collect()
    }

    /// Bring the live object set in line with `configs`.
    ///
    /// A change that some object cannot hot-apply is skipped and listed in
    /// [`ReconcileSummary::restart_required`]; a configuration an object
    /// rejects is listed in [`ReconcileSummary::failed`]. Neither stops the
    /// rest of the pass.
    ///
    /// # Errors
    ///
    /// Duplicate names in `configs` reject the whole request before anything
    /// is applied.
    pub fn reconcile(&self, configs: &[ConfigOf<F>]) -> GatewayResult<ReconcileSummary> {
        let mut seen = HashSet::new();
        for conf in configs {
            if !seen.insert(conf.name()) {
                return Err(GatewayError::InvalidConf(format!(
                    "duplicate object name {:?}",
                    conf.name()
                )));
            }
        }

        let _guard = self.update_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut summary = ReconcileSummary::default();

        for conf in configs {
            let name = conf.name().to_string();

            match self.get(&name) {
                Some(obj) => {
                    let old = obj.get_config();
                    if obj.inspect(Some(&old), Some(conf)) {
                        warn!(object = %name, "change requires restart");
                        summary.restart_required.push(name);
                        continue;
                    }

                    match obj.reconcile(conf) {
                        Ok(()) => {
                            debug!(object = %name, "object reconciled");
                            summary.updated.push(name);
                        }
                        Err(GatewayError::RestartRequired) => {
                            warn!(object = %name, "reconcile requires restart");
                            summary.restart_required.push(name);
                        }
                        Err(e) => {
                            error!(object = %name, error = %e, "reconcile failed");
                            summary.failed.push((name, e.to_string()));
                        }
                    }
                }
                None => {
                    // dry-run against a throwaway sentinel
                    let probe = self.factory.new_object(None)?;
                    if probe.inspect(None, Some(conf)) {
                        warn!(object = %name, "creation requires restart");
                        summary.restart_required.push(name);
                        continue;
                    }

                    match self.factory.new_object(Some(conf)) {
                        Ok(obj) => {
                            self.objects
                                .write()
                                .unwrap_or_else(PoisonError::into_inner)
                                .insert(name.clone(), Arc::new(obj));
                            info!(object = %name, "object created");
                            summary.created.push(name);
                        }
                        Err(e) => {
                            error!(object = %name, error = %e, "object creation failed");
                            summary.failed.push((name, e.to_string()));
                        }
                    }
                }
            }
        }

        for name in self.names() {
            if seen.contains(name.as_str()) {
                continue;
            }
            let Some(obj) = self.get(&name) else {
                continue;
            };

            let old = obj.get_config();
            if obj.inspect(Some(&old), None) {
                warn!(object = %name, "deletion requires restart");
                summary.restart_required.push(name);
                continue;
            }

            self.objects
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&name);
            if let Err(e) = obj.close() {
                warn!(object = %name, error = %e, "close failed");
            }
            info!(object = %name, "object deleted");
            summary.deleted.push(name);
        }

        summary.sort();
        Ok(summary)
    }

    /// Close and drop every object.
    pub fn close_all(&self) -> GatewayResult<()> {
        let _guard = self.update_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let objects: Vec<(String, Arc<F::Object>)> = self
            .objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        let mut first_err = None;
        for (name, obj) in objects {
            if let Err(e) = obj.close() {
                warn!(object = %name, error = %e, "close failed");
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl ClusterManager {
    /// Whether `cluster` permits relaying to `peer`. Unknown clusters deny.
    pub fn route(&self, cluster: &str, peer: IpAddr) -> bool {
        self.get(cluster)
            .is_some_and(|c: Arc<Cluster>| c.route(peer))
    }
}
