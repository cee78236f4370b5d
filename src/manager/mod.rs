//! Module manager.
//!
//! Owns the registered modules and reacts to navigation:
//!
//! ```text
//!   tick ──▶ check_navigation
//!              │  url changed?
//!              ▼
//!           classify ──▶ LobbyContext diff ──▶ per module:
//!                                               Load / Reload / Unload / Skip
//! ```
//!
//! Modules are visited in registration order and each transition runs to
//! completion before the next module is touched, so cross-module DOM
//! effects are deterministic.

mod classify;
#[cfg(test)]
mod tests;

pub use classify::{LobbyContext, PageClassifier, PageTag, UrlPatterns};

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use rustc_hash::FxHashSet;

use crate::dom::Document;
use crate::engine::EngineEnv;
use crate::error::SettingsError;
use crate::module::Module;
use crate::settings::SettingsStore;
use crate::{debug, log};

// ============================================================================
// Page bindings
// ============================================================================

/// Which page classes a module runs on.
#[derive(Debug, Clone)]
pub enum Pages {
    /// Every recognized page. Unrecognized pages still count as "nowhere":
    /// a URL the classifier rejects unloads even `All`-bound modules.
    All,
    /// Only the listed page tags.
    Only(FxHashSet<PageTag>),
}

impl Pages {
    pub fn only<I, T>(tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<PageTag>,
    {
        Self::Only(tags.into_iter().map(Into::into).collect())
    }

    fn applies(&self, ctx: Option<&LobbyContext>) -> bool {
        match self {
            Pages::All => ctx.is_some(),
            Pages::Only(tags) => ctx.is_some_and(|c| tags.contains(&c.page)),
        }
    }
}

/// Transition for one module on one navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleAction {
    Load,
    Reload,
    Unload,
    Skip,
}

impl ModuleAction {
    fn compute(was_applicable: bool, is_applicable: bool) -> Self {
        match (was_applicable, is_applicable) {
            (false, true) => ModuleAction::Load,
            (true, true) => ModuleAction::Reload,
            (true, false) => ModuleAction::Unload,
            (false, false) => ModuleAction::Skip,
        }
    }
}

struct Binding {
    module: Module,
    pages: Pages,
    enabled: bool,
}

// ============================================================================
// Manager
// ============================================================================

pub struct ModuleManager {
    classifier: Box<dyn PageClassifier>,
    bindings: Vec<Binding>,
    last_url: Option<String>,
    context: Option<LobbyContext>,
    /// Shared snapshot read by module callbacks via `ModuleCtx::context`.
    published: Arc<ArcSwapOption<LobbyContext>>,
}

impl ModuleManager {
    pub fn new(classifier: impl PageClassifier + 'static) -> Self {
        Self {
            classifier: Box::new(classifier),
            bindings: Vec::new(),
            last_url: None,
            context: None,
            published: Arc::new(ArcSwapOption::empty()),
        }
    }

    pub fn register(&mut self, module: Module, pages: Pages) {
        debug!("manager"; "registered module {}", module.name());
        self.bindings.push(Binding {
            module,
            pages,
            enabled: true,
        });
    }

    /// Handle to the published context snapshot; cloned into [`EngineEnv`].
    pub fn context_handle(&self) -> Arc<ArcSwapOption<LobbyContext>> {
        Arc::clone(&self.published)
    }

    pub fn context(&self) -> Option<&LobbyContext> {
        self.context.as_ref()
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.bindings
            .iter()
            .map(|b| &b.module)
            .find(|m| m.name() == name)
    }

    pub fn module_count(&self) -> usize {
        self.bindings.len()
    }

    /// Re-reads every module's `module.<name>.enabled` flag. Missing keys
    /// default to enabled; store failures abort so a broken settings file
    /// is surfaced instead of silently enabling everything.
    pub(crate) fn resolve_enabled(
        &mut self,
        settings: &dyn SettingsStore,
    ) -> Result<(), SettingsError> {
        for binding in &mut self.bindings {
            let key = format!("module.{}.enabled", binding.module.name());
            binding.enabled = settings.get_bool(&key, true)?;
            if !binding.enabled {
                log!("manager"; "module {} disabled by settings", binding.module.name());
            }
        }
        Ok(())
    }

    /// Diffs the document URL against the last seen one and applies the
    /// resulting per-module transitions. Cheap no-op when the URL is
    /// unchanged, which is the common case on every tick.
    pub fn check_navigation(&mut self, doc: &mut Document, env: &mut EngineEnv, now: Instant) {
        let url = doc.url();
        if self.last_url.as_deref() == Some(url) {
            return;
        }
        let url = url.to_string();
        self.last_url = Some(url.clone());

        let new_ctx = self.classifier.classify(&url);
        if new_ctx == self.context {
            debug!("manager"; "navigation to {url} kept the same context");
            return;
        }

        match &new_ctx {
            Some(ctx) => log!("manager"; "navigated to {url} [{}]", ctx.page),
            None => log!("manager"; "navigated to {url} [unclassified]"),
        }

        let old_ctx = std::mem::replace(&mut self.context, new_ctx.clone());
        self.published.store(new_ctx.clone().map(Arc::new));

        for binding in &mut self.bindings {
            if !binding.enabled {
                continue;
            }
            let action = ModuleAction::compute(
                binding.pages.applies(old_ctx.as_ref()),
                binding.pages.applies(new_ctx.as_ref()),
            );
            match action {
                ModuleAction::Load | ModuleAction::Reload => {
                    // Reload of a never-loaded module degrades to a plain
                    // load inside Module::reload.
                    let result = if action == ModuleAction::Load {
                        binding.module.load(doc, env, now)
                    } else {
                        binding.module.reload(doc, env, now)
                    };
                    if let Err(err) = result {
                        log!("error"; "module {} failed to load: {err}", binding.module.name());
                    }
                }
                ModuleAction::Unload => binding.module.unload(doc, env, now),
                ModuleAction::Skip => {}
            }
        }
    }

    /// Tears down every loaded module, in registration order.
    pub fn unload_all(&mut self, doc: &mut Document, env: &mut EngineEnv, now: Instant) {
        for binding in &mut self.bindings {
            binding.module.unload(doc, env, now);
        }
    }
}
