//! Module lifecycle - named, independently loadable units of behavior.
//!
//! A module owns a private slice of engine state: its watch
//! registrations, the nodes it stamped, injected or hid, and its timers.
//! All of it is released before `is_loaded` flips back to false, so the
//! invariant "unloaded module owns nothing" holds at every observation
//! point.
//!
//! State machine: `unloaded -> loaded -> unloaded`, plus the
//! `loaded -> loaded` reload transition (full teardown, fresh session,
//! rebuild) used when navigation stays within a module's page types but
//! page-scoped identifiers changed.

mod session;

#[cfg(test)]
mod tests;

pub use session::Session;

use std::time::{Duration, Instant};

use crate::dom::{Document, Matcher, NodeId};
use crate::engine::EngineEnv;
use crate::error::EngineError;
use crate::timers::{DEFAULT_POLL_INTERVAL, TimerHandle};
use crate::watch::{
    BatchCallback, NodeTest, Owner, VisibilityCallback, WatchCallback, WatchId,
};

/// Load/unload hook. Caller code: arbitrary failure shapes, so `anyhow`.
pub type ModuleHook = Box<dyn FnMut(&mut ModuleCtx<'_>) -> anyhow::Result<()> + Send>;

/// Everything a module session holds on to. Emptied atomically (from the
/// engine's single-threaded point of view) during teardown.
#[derive(Default)]
struct OwnedResources {
    /// Nodes stamped with the session marker attribute.
    processed: Vec<NodeId>,
    /// Injected nodes queued for removal at teardown.
    removals: Vec<NodeId>,
    /// Hidden nodes with their prior inline display value.
    hidden: Vec<(NodeId, Option<String>)>,
    /// Interval/poll timers.
    timers: Vec<TimerHandle>,
}

impl OwnedResources {
    fn total(&self) -> usize {
        self.processed.len() + self.removals.len() + self.hidden.len() + self.timers.len()
    }
}

/// A named unit of page augmentation with load/unload hooks.
pub struct Module {
    name: String,
    load_hook: ModuleHook,
    unload_hook: ModuleHook,
    session: Option<Session>,
    generation: u64,
    owned: OwnedResources,
}

enum Hook {
    Load,
    Unload,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            load_hook: Box::new(|_| Ok(())),
            unload_hook: Box::new(|_| Ok(())),
            session: None,
            generation: 0,
            owned: OwnedResources::default(),
        }
    }

    pub fn with_load(
        mut self,
        hook: impl FnMut(&mut ModuleCtx<'_>) -> anyhow::Result<()> + Send + 'static,
    ) -> Self {
        self.load_hook = Box::new(hook);
        self
    }

    pub fn with_unload(
        mut self,
        hook: impl FnMut(&mut ModuleCtx<'_>) -> anyhow::Result<()> + Send + 'static,
    ) -> Self {
        self.unload_hook = Box::new(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(Session::id)
    }

    /// Total owned resources; zero whenever the module is unloaded.
    pub fn owned_resource_count(&self) -> usize {
        self.owned.total()
    }

    fn owner(&self) -> Option<Owner> {
        self.session
            .as_ref()
            .map(|s| Owner::new(self.name.as_str(), s.id()))
    }

    // =========================================================================
    // Lifecycle verbs
    // =========================================================================

    /// Load: fresh session, arm the shared observer, run the load hook.
    /// No-op when already loaded. A failing hook aborts the load: every
    /// resource it managed to register is released and the module stays
    /// unloaded.
    pub fn load(
        &mut self,
        doc: &mut Document,
        env: &mut EngineEnv,
        now: Instant,
    ) -> Result<(), EngineError> {
        if self.is_loaded() {
            return Ok(());
        }
        self.generation += 1;
        let session = Session::generate(&self.name, self.generation);
        crate::log!("module"; "load {} ({})", self.name, session.id());
        self.session = Some(session);

        env.dispatcher.register();
        if let Err(source) = self.run_hook(Hook::Load, doc, env, now) {
            crate::log!("error"; "load hook of {} failed, rolling back: {source:#}", self.name);
            self.release_resources(doc, env);
            self.session = None;
            return Err(EngineError::ModuleLoad { name: self.name.clone(), source });
        }
        Ok(())
    }

    /// Unload: run the unload hook (errors logged, teardown proceeds
    /// regardless), then release everything. No-op when not loaded.
    pub fn unload(&mut self, doc: &mut Document, env: &mut EngineEnv, now: Instant) {
        if !self.is_loaded() {
            return;
        }
        crate::log!("module"; "unload {}", self.name);
        if let Err(err) = self.run_hook(Hook::Unload, doc, env, now) {
            crate::log!("error"; "unload hook of {} failed: {err:#}", self.name);
        }
        self.release_resources(doc, env);
        self.session = None;
    }

    /// Reload: teardown, then load under a strictly new session id. The
    /// teardown completes before any new registration, so old and new
    /// session-tagged nodes never coexist.
    pub fn reload(
        &mut self,
        doc: &mut Document,
        env: &mut EngineEnv,
        now: Instant,
    ) -> Result<(), EngineError> {
        crate::debug!("module"; "reload {}", self.name);
        self.unload(doc, env, now);
        self.load(doc, env, now)
    }

    fn run_hook(
        &mut self,
        which: Hook,
        doc: &mut Document,
        env: &mut EngineEnv,
        now: Instant,
    ) -> anyhow::Result<()> {
        let session = self.session.as_ref().expect("hooks require a session");
        let owner = Owner::new(self.name.as_str(), session.id());
        let hook = match which {
            Hook::Load => &mut self.load_hook,
            Hook::Unload => &mut self.unload_hook,
        };
        let mut ctx = ModuleCtx {
            session,
            owner,
            owned: &mut self.owned,
            doc,
            env,
            now,
        };
        hook(&mut ctx)
    }

    /// Release every owned resource. The DOM keeps everything the module
    /// did not inject: markers come off claimed nodes, hidden nodes get
    /// their display back, only queued injections are removed.
    fn release_resources(&mut self, doc: &mut Document, env: &mut EngineEnv) {
        let Some(owner) = self.owner() else {
            return;
        };
        env.dispatcher.release_owner(&owner);
        env.gate.release_owner(&owner);
        env.timers.cancel_owner(&owner);
        self.owned.timers.clear();

        let marker = self
            .session
            .as_ref()
            .expect("owner implies session")
            .marker()
            .to_string();
        for node in self.owned.processed.drain(..) {
            if doc.contains(node) {
                doc.remove_attribute(node, &marker).ok();
            }
        }
        for node in self.owned.removals.drain(..) {
            if doc.contains(node) {
                doc.remove_child(node).ok();
            }
        }
        for (node, prior) in self.owned.hidden.drain(..) {
            if doc.contains(node) {
                doc.set_style_display(node, prior.as_deref()).ok();
            }
        }
        debug_assert_eq!(self.owned.total(), 0);
    }
}

// =============================================================================
// Hook context
// =============================================================================

/// What a module's hooks (and nothing else) get to touch: the document,
/// owner-tagged watch/timer/visibility registration, the session marker
/// helpers, settings and the current navigation context.
pub struct ModuleCtx<'a> {
    session: &'a Session,
    owner: Owner,
    owned: &'a mut OwnedResources,
    doc: &'a mut Document,
    env: &'a mut EngineEnv,
    now: Instant,
}

impl ModuleCtx<'_> {
    pub fn doc(&mut self) -> &mut Document {
        self.doc
    }

    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    /// The session-scoped marker attribute name.
    pub fn marker(&self) -> &str {
        self.session.marker()
    }

    pub fn context(&self) -> Option<std::sync::Arc<crate::manager::LobbyContext>> {
        self.env.context.load_full()
    }

    pub fn settings(&self) -> &dyn crate::settings::SettingsStore {
        self.env.settings.as_ref()
    }

    // --- watch registration (owner-tagged, released on teardown) ---

    pub fn watch_appear(&mut self, matcher: Matcher, cb: WatchCallback) -> WatchId {
        self.env
            .dispatcher
            .watch_appear(self.doc, self.owner.clone(), matcher, cb)
    }

    pub fn watch_appear_filtered(
        &mut self,
        matcher: Matcher,
        test: NodeTest,
        cb: WatchCallback,
    ) -> WatchId {
        self.env
            .dispatcher
            .watch_appear_filtered(self.doc, self.owner.clone(), matcher, test, cb)
    }

    pub fn watch_all(&mut self, matcher: Matcher, cb: WatchCallback) -> WatchId {
        self.env
            .dispatcher
            .watch_all(self.doc, self.owner.clone(), matcher, cb)
    }

    pub fn watch_batch(&mut self, matcher: Matcher, cb: BatchCallback) -> WatchId {
        self.env
            .dispatcher
            .watch_batch(self.doc, self.owner.clone(), matcher, cb)
    }

    pub fn watch_removed(&mut self, matcher: Matcher, cb: WatchCallback) -> WatchId {
        self.env
            .dispatcher
            .watch_removed(self.owner.clone(), matcher, cb)
    }

    pub fn when_visible(&mut self, node: NodeId, cb: VisibilityCallback) {
        self.env
            .gate
            .when_visible(self.doc, node, Some(self.owner.clone()), cb);
    }

    // --- node claiming ---

    /// Stamp a node as handled by this session, making repeat deliveries
    /// of the same logical element idempotent.
    pub fn processed_node(&mut self, node: NodeId) -> Result<(), EngineError> {
        self.doc.set_attribute(node, self.session.marker(), "")?;
        self.owned.processed.push(node);
        Ok(())
    }

    pub fn is_processed_node(&self, node: NodeId) -> bool {
        self.doc.attr(node, self.session.marker()).is_some()
    }

    /// Queue an injected node for removal at teardown. Not removed now -
    /// the current session may still reference it.
    pub fn removal_node(&mut self, node: NodeId) {
        self.owned.removals.push(node);
    }

    /// Insert `new_node` right after `old_node` and hide the original
    /// instead of removing it, so host-page logic holding on to it keeps
    /// working. Both the hide and the injection are undone at teardown.
    pub fn append_to_and_hide(
        &mut self,
        new_node: NodeId,
        old_node: NodeId,
    ) -> Result<(), EngineError> {
        self.doc.insert_after(old_node, new_node)?;
        let prior = self.doc.display(old_node).map(str::to_string);
        self.doc.set_style_display(old_node, Some("none"))?;
        self.owned.hidden.push((old_node, prior));
        self.owned.removals.push(new_node);
        Ok(())
    }

    // --- timers ---

    /// Module-scoped repeating timer; cancelled at teardown.
    pub fn every(
        &mut self,
        period: Duration,
        cb: impl FnMut(&mut Document) -> anyhow::Result<()> + Send + 'static,
    ) -> TimerHandle {
        let handle =
            self.env
                .timers
                .every(Some(self.owner.clone()), self.now, period, Box::new(cb));
        self.owned.timers.push(handle);
        handle
    }

    /// Poll `cond` until it yields a value, then run `cb` once with it.
    /// Uses the default 50ms cadence; see [`Self::do_after_every`].
    pub fn do_after<T, C, F>(&mut self, cond: C, cb: F) -> TimerHandle
    where
        T: Send + 'static,
        C: FnMut(&Document) -> Option<T> + Send + 'static,
        F: FnOnce(&mut Document, T) -> anyhow::Result<()> + Send + 'static,
    {
        self.do_after_every(DEFAULT_POLL_INTERVAL, cond, cb)
    }

    pub fn do_after_every<T, C, F>(&mut self, interval: Duration, cond: C, cb: F) -> TimerHandle
    where
        T: Send + 'static,
        C: FnMut(&Document) -> Option<T> + Send + 'static,
        F: FnOnce(&mut Document, T) -> anyhow::Result<()> + Send + 'static,
    {
        let handle =
            self.env
                .timers
                .do_after(Some(self.owner.clone()), self.now, interval, cond, cb);
        self.owned.timers.push(handle);
        handle
    }

    /// Cancel one of this module's timers early.
    pub fn cancel_timer(&mut self, handle: TimerHandle) -> bool {
        self.owned.timers.retain(|&h| h != handle);
        self.env.timers.cancel(handle)
    }
}
