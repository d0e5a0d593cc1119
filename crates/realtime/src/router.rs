//! Event router: `(module, type)` → handlers.
//!
//! The connection layer hands every decoded frame to [`EventRouter::dispatch`]
//! without knowing anything about feature semantics. Keepalive frames are
//! consumed here; everything else goes to the handlers registered for the
//! frame's module and type, in registration order, each one isolated from
//! the others' failures.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, trace, warn};

use geoqueue_protocol::Frame;
use geoqueue_protocol::constants::FRAME_PONG;

use crate::heartbeat::Heartbeat;
use crate::registry::{EventHandler, ModuleContext, RealtimeModule};
use crate::types::{ConnectionEvent, LifecycleKind};

/// Handler for channel lifecycle events.
pub type LifecycleHandler = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// What happened to a dispatched frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// `ping`/`pong`, consumed internally.
    Keepalive,
    /// No module (or no handler) for the frame.
    Dropped,
    /// Handlers ran; `failed` of them returned an error or panicked.
    Delivered { handlers: usize, failed: usize },
}

struct InstalledModule {
    module: Arc<dyn RealtimeModule>,
    initialized: AtomicBool,
}

type Routes = HashMap<String, HashMap<String, Vec<EventHandler>>>;

/// Dispatches frames to module handlers and lifecycle events to global
/// observers.
pub struct EventRouter {
    routes: RwLock<Routes>,
    modules: RwLock<Vec<InstalledModule>>,
    lifecycle: RwLock<Vec<(Option<LifecycleKind>, LifecycleHandler)>>,
    heartbeat: Heartbeat,
    default_module: Option<String>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            modules: RwLock::new(Vec::new()),
            lifecycle: RwLock::new(Vec::new()),
            heartbeat: Heartbeat::new(),
            default_module: None,
        }
    }

    /// Router for a single-purpose channel whose frames omit `module`.
    pub fn with_default_module(module: impl Into<String>) -> Self {
        Self {
            default_module: Some(module.into()),
            ..Self::new()
        }
    }

    /// Keepalive state fed by consumed `pong` frames.
    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    /// Registers a handler for `(module, event_type)`.
    pub fn subscribe(&self, module: &str, event_type: &str, handler: EventHandler) {
        if let Ok(mut routes) = self.routes.write() {
            routes
                .entry(module.to_owned())
                .or_default()
                .entry(event_type.to_owned())
                .or_default()
                .push(handler);
        }
    }

    /// Installs a module: registers its subscriptions once and tracks it
    /// for `initialize`/`cleanup`. Installing the same name twice is
    /// ignored.
    pub fn install(&self, module: Arc<dyn RealtimeModule>) {
        let name = module.name();
        {
            let Ok(mut modules) = self.modules.write() else {
                return;
            };
            if modules.iter().any(|m| m.module.name() == name) {
                warn!(module = name, "module already installed, ignoring");
                return;
            }
            modules.push(InstalledModule {
                module: module.clone(),
                initialized: AtomicBool::new(false),
            });
        }

        let subs = module.subscriptions();
        debug!(module = name, subscriptions = subs.len(), "installing module");
        for sub in subs {
            self.subscribe(name, sub.event_type, sub.handler);
        }
    }

    /// Installs every module produced by a registry.
    pub fn install_all(&self, modules: Vec<Arc<dyn RealtimeModule>>) {
        for module in modules {
            self.install(module);
        }
    }

    /// Names of installed modules.
    pub fn module_names(&self) -> Vec<&'static str> {
        self.modules
            .read()
            .map(|m| m.iter().map(|i| i.module.name()).collect())
            .unwrap_or_default()
    }

    /// Routes one frame.
    pub fn dispatch(&self, frame: &Frame) -> Routed {
        if frame.is_keepalive() {
            if frame.frame_type == FRAME_PONG {
                trace!("pong received");
                self.heartbeat.record_pong();
            }
            return Routed::Keepalive;
        }

        let Some(module) = frame.module_or(self.default_module.as_deref()) else {
            debug!(frame_type = %frame.frame_type, "frame without module, dropping");
            return Routed::Dropped;
        };

        let handlers: Vec<EventHandler> = {
            let Ok(routes) = self.routes.read() else {
                return Routed::Dropped;
            };
            let Some(by_type) = routes.get(module) else {
                debug!(module, frame_type = %frame.frame_type, "no module registered, dropping");
                return Routed::Dropped;
            };
            match by_type.get(&frame.frame_type) {
                Some(h) => h.clone(),
                None => {
                    debug!(module, frame_type = %frame.frame_type, "no handler for event type, dropping");
                    return Routed::Dropped;
                }
            }
        };

        let mut failed = 0;
        for handler in &handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(frame))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failed += 1;
                    warn!(module, frame_type = %frame.frame_type, error = %e, "handler failed");
                }
                Err(_panic) => {
                    failed += 1;
                    warn!(module, frame_type = %frame.frame_type, "handler panicked");
                }
            }
        }

        Routed::Delivered {
            handlers: handlers.len(),
            failed,
        }
    }

    /// Parses and routes a text frame. Malformed input is logged and
    /// dropped.
    pub fn dispatch_text(&self, text: &str) -> Routed {
        match serde_json::from_str::<Frame>(text) {
            Ok(frame) => self.dispatch(&frame),
            Err(e) => {
                warn!("failed to parse frame: {e}");
                Routed::Dropped
            }
        }
    }

    /// Subscribes to channel lifecycle events. `None` receives all kinds.
    pub fn on_lifecycle<F>(&self, kind: Option<LifecycleKind>, handler: F)
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        if let Ok(mut lifecycle) = self.lifecycle.write() {
            lifecycle.push((kind, Arc::new(handler)));
        }
    }

    pub(crate) fn emit_lifecycle(&self, event: &ConnectionEvent) {
        let kind = event.kind();
        let handlers: Vec<LifecycleHandler> = self
            .lifecycle
            .read()
            .map(|l| {
                l.iter()
                    .filter(|(k, _)| k.is_none_or(|k| k == kind))
                    .map(|(_, h)| h.clone())
                    .collect()
            })
            .unwrap_or_default();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(?kind, "lifecycle handler panicked");
            }
        }
    }

    /// Runs `initialize` on every installed module not yet initialized.
    pub(crate) fn initialize_modules(&self, ctx: &ModuleContext) {
        let Ok(modules) = self.modules.read() else {
            return;
        };
        for installed in modules.iter() {
            if installed.initialized.swap(true, Ordering::AcqRel) {
                continue;
            }
            let name = installed.module.name();
            if catch_unwind(AssertUnwindSafe(|| installed.module.initialize(ctx))).is_err() {
                warn!(module = name, "module initialize panicked");
            } else {
                info!(module = name, "module initialized");
            }
        }
    }

    /// Runs `cleanup` on every initialized module.
    pub(crate) fn cleanup_modules(&self) {
        let Ok(modules) = self.modules.read() else {
            return;
        };
        for installed in modules.iter() {
            if !installed.initialized.swap(false, Ordering::AcqRel) {
                continue;
            }
            let name = installed.module.name();
            if catch_unwind(AssertUnwindSafe(|| installed.module.cleanup())).is_err() {
                warn!(module = name, "module cleanup panicked");
            } else {
                debug!(module = name, "module cleaned up");
            }
        }
    }
}
