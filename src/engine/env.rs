use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::manager::LobbyContext;
use crate::settings::SettingsStore;
use crate::timers::TimerWheel;
use crate::watch::{MutationDispatcher, VisibilityGate};

/// The shared services modules register against: the dispatcher, the
/// visibility gate, the timer wheel, the settings store and the current
/// navigation context snapshot.
///
/// Split out of [`Engine`](crate::engine::Engine) so the manager can
/// drive module lifecycles while borrowing the services mutably.
pub struct EngineEnv {
    pub dispatcher: MutationDispatcher,
    pub gate: VisibilityGate,
    pub timers: TimerWheel,
    pub settings: Arc<dyn SettingsStore>,
    pub context: Arc<ArcSwapOption<LobbyContext>>,
}

impl EngineEnv {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        context: Arc<ArcSwapOption<LobbyContext>>,
    ) -> Self {
        Self {
            dispatcher: MutationDispatcher::new(),
            gate: VisibilityGate::new(),
            timers: TimerWheel::new(),
            settings,
            context,
        }
    }
}
