//! Generic lifecycle contract shared by every gateway-managed object kind.
//!
//! A manager keeps objects keyed by name and, on each configuration change,
//! either hot-applies the new configuration with [`Object::reconcile`] or,
//! when [`Object::inspect`] says so, schedules a restart. The manager never
//! branches on the concrete object kind.

use crate::error::GatewayResult;
use std::fmt::Debug;

/// Configuration of a managed object.
pub trait ObjectConfig: Clone + Debug + Send + Sync {
    /// Name of the object this configuration describes.
    fn name(&self) -> &str;
}

/// A live, reconfigurable gateway object.
///
/// Methods take `&self`: objects are shared (`Arc`) with the data path and
/// mutate through interior state, so the identity a holder observes survives
/// every reconcile.
pub trait Object: Send + Sync {
    type Config: ObjectConfig;

    /// Name of the object. Never changes after construction.
    fn object_name(&self) -> &str;

    /// Whether moving from `old` to `new` requires destroying and rebuilding
    /// the object. `new == None` means the object is about to be deleted,
    /// `old == None` means it is about to be created.
    fn inspect(&self, old: Option<&Self::Config>, new: Option<&Self::Config>) -> bool;

    /// Apply `conf` in place.
    fn reconcile(&self, conf: &Self::Config) -> GatewayResult<()>;

    /// Current live state rendered back into configuration form.
    fn get_config(&self) -> Self::Config;

    /// Release every external resource held by the object.
    fn close(&self) -> GatewayResult<()>;
}

/// Constructs objects of one kind from configuration.
pub trait Factory: Send + Sync {
    type Object: Object;

    /// Build a new object. `None` yields an inert sentinel usable only for
    /// dry-run [`Object::inspect`] calls.
    fn new_object(
        &self,
        conf: Option<&<Self::Object as Object>::Config>,
    ) -> GatewayResult<Self::Object>;
}
