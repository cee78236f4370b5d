//! Engine assembly and the tick loop.
//!
//! ```text
//!           ┌─────────────────────── tick ───────────────────────┐
//!           │                                                    │
//!   Document│  check_navigation   pump mutations   pump timers   │
//!   ───────▶│  (load/unload)  ──▶ (watch dispatch) ──▶ (polls) ──▶ pump visibility
//!           │                                                    │
//!           └────────────────────────────────────────────────────┘
//! ```
//!
//! [`Engine::tick`] is pure with respect to wall clocks: callers pass
//! `now`, so tests drive time explicitly. [`Runtime`] wraps the same
//! engine in a tokio loop for embedders that want a real clock.

mod env;
mod runtime;
#[cfg(test)]
mod tests;

pub use env::EngineEnv;
pub use runtime::Runtime;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dom::Document;
use crate::error::EngineError;
use crate::log;
use crate::manager::{ModuleManager, PageClassifier, Pages};
use crate::module::Module;
use crate::settings::{MemoryStore, SettingsStore};
use crate::timers::DEFAULT_POLL_INTERVAL;

pub struct Engine {
    env: EngineEnv,
    manager: ModuleManager,
    poll_interval: Duration,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// One scheduler turn: react to navigation, then flush mutation
    /// records, due timers and visibility checks, in that order. Watch
    /// registrations made by a freshly loaded module see the same tick's
    /// mutations.
    pub fn tick(&mut self, doc: &mut Document, now: Instant) {
        self.manager.check_navigation(doc, &mut self.env, now);
        self.env.dispatcher.pump(doc);
        self.env.timers.pump(now, doc);
        self.env.gate.pump(doc);
    }

    pub fn manager(&self) -> &ModuleManager {
        &self.manager
    }

    pub fn env(&self) -> &EngineEnv {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut EngineEnv {
        &mut self.env
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Unloads every module and drops all remaining registrations. The
    /// engine is inert afterwards; further ticks only drain records.
    pub fn shutdown(&mut self, doc: &mut Document, now: Instant) {
        log!("engine"; "shutting down");
        self.manager.unload_all(doc, &mut self.env, now);
        self.env.dispatcher.release();
        self.env.gate.clear();
        self.env.timers.clear();
    }
}

// ============================================================================
// Builder
// ============================================================================

pub struct EngineBuilder {
    classifier: Box<dyn PageClassifier>,
    settings: Arc<dyn SettingsStore>,
    poll_interval: Duration,
    modules: Vec<(Module, Pages)>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            classifier: Box::new(|_: &str| -> Option<crate::manager::LobbyContext> { None }),
            settings: Arc::new(MemoryStore::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
            modules: Vec::new(),
        }
    }

    pub fn classifier(mut self, classifier: impl PageClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = settings;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn register(mut self, module: Module, pages: Pages) -> Self {
        self.modules.push((module, pages));
        self
    }

    /// Fails when the settings store cannot be read while resolving the
    /// per-module enabled flags.
    pub fn build(self) -> Result<Engine, EngineError> {
        let mut manager = ModuleManager::new(self.classifier);
        for (module, pages) in self.modules {
            manager.register(module, pages);
        }
        manager.resolve_enabled(self.settings.as_ref())?;
        let env = EngineEnv::new(self.settings, manager.context_handle());
        log!("engine"; "ready with {} modules", manager.module_count());
        Ok(Engine {
            env,
            manager,
            poll_interval: self.poll_interval,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
