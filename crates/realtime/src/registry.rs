//! Static module registry.
//!
//! Features plug into the channel by declaring a [`RealtimeModule`]: a fixed
//! wire name, the event types it handles, and lifecycle hooks. The set of
//! modules is a compile-time list of factories; there is no runtime
//! discovery.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{info, warn};

use geoqueue_protocol::Frame;

use crate::error::{HandlerError, ModuleError};
use crate::sender::FrameSender;

/// Handler invoked for one `(module, type)` pair.
pub type EventHandler = Arc<dyn Fn(&Frame) -> Result<(), HandlerError> + Send + Sync>;

/// One `(event type → handler)` subscription declared by a module.
pub struct Subscription {
    pub event_type: &'static str,
    pub handler: EventHandler,
}

impl Subscription {
    pub fn new<F>(event_type: &'static str, handler: F) -> Self
    where
        F: Fn(&Frame) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self {
            event_type,
            handler: Arc::new(handler),
        }
    }
}

/// Context handed to [`RealtimeModule::initialize`] when a channel opens.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    pub sender: FrameSender,
}

/// A named handler unit bound to one server-side module.
///
/// Instances live for the whole session and survive reconnects; only
/// `initialize`/`cleanup` run again around each open/close boundary.
pub trait RealtimeModule: Send + Sync + 'static {
    /// Wire name, identical to the server-side module.
    fn name(&self) -> &'static str;

    /// Event subscriptions. Called once, when the module is installed.
    fn subscriptions(self: Arc<Self>) -> Vec<Subscription>;

    /// Called after a channel opens.
    fn initialize(&self, ctx: &ModuleContext) {
        let _ = ctx;
    }

    /// Called after a channel closes.
    fn cleanup(&self) {}
}

/// Builds a module bound to the shared application state `S`.
pub type ModuleFactory<S> = fn(&S) -> Result<Arc<dyn RealtimeModule>, ModuleError>;

/// One registry entry.
pub struct ModuleEntry<S> {
    pub name: &'static str,
    pub factory: ModuleFactory<S>,
}

/// Fixed list of module factories.
pub struct ModuleRegistry<S> {
    entries: Vec<ModuleEntry<S>>,
}

impl<S> ModuleRegistry<S> {
    pub fn new(entries: Vec<ModuleEntry<S>>) -> Self {
        Self { entries }
    }

    /// Registered module names, in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }

    /// Instantiates every registered module.
    ///
    /// A factory that fails or panics is logged and skipped; the remaining
    /// modules still load.
    pub fn load_all_modules(&self, state: &S) -> Vec<Arc<dyn RealtimeModule>> {
        let mut loaded = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let built = match catch_unwind(AssertUnwindSafe(|| (entry.factory)(state))) {
                Ok(built) => built,
                Err(_panic) => {
                    warn!(module = entry.name, "module factory panicked, skipping");
                    continue;
                }
            };
            match built {
                Ok(module) => {
                    if module.name() != entry.name {
                        warn!(
                            entry = entry.name,
                            module = module.name(),
                            "module name differs from its registry entry"
                        );
                    }
                    loaded.push(module);
                }
                Err(e) => warn!(module = entry.name, error = %e, "skipping module"),
            }
        }
        info!(
            loaded = loaded.len(),
            registered = self.entries.len(),
            "realtime modules loaded"
        );
        loaded
    }
}
