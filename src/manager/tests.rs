use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use serde_json::json;

use super::*;
use crate::module::Module;
use crate::settings::MemoryStore;

fn env() -> EngineEnv {
    EngineEnv::new(Arc::new(MemoryStore::new()), Arc::new(ArcSwapOption::empty()))
}

fn classifier() -> UrlPatterns {
    UrlPatterns::new()
        .route(r"/lobby", "lobby")
        .unwrap()
        .route(r"/profile/(?P<nick>[^/]+)", "profile")
        .unwrap()
        .route(r"/game\.php\?id=(?P<match_id>\d+)", "game")
        .unwrap()
}

fn counting_module(name: &str) -> (Module, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let loads = Arc::new(AtomicUsize::new(0));
    let unloads = Arc::new(AtomicUsize::new(0));
    let loads_in_hook = Arc::clone(&loads);
    let unloads_in_hook = Arc::clone(&unloads);
    let module = Module::new(name)
        .with_load(move |_ctx| {
            loads_in_hook.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .with_unload(move |_ctx| {
            unloads_in_hook.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    (module, loads, unloads)
}

#[test]
fn test_first_navigation_loads_applicable_modules() {
    let mut doc = Document::new();
    let mut env = env();
    let mut manager = ModuleManager::new(classifier());

    let (lobby_mod, lobby_loads, _) = counting_module("lobby-tweaks");
    let (all_mod, all_loads, _) = counting_module("everywhere");
    manager.register(lobby_mod, Pages::only(["lobby"]));
    manager.register(all_mod, Pages::All);

    doc.set_url("https://example.org/lobby");
    manager.check_navigation(&mut doc, &mut env, Instant::now());

    assert_eq!(lobby_loads.load(Ordering::SeqCst), 1);
    assert_eq!(all_loads.load(Ordering::SeqCst), 1);
    assert_eq!(manager.context().unwrap().page, PageTag::from("lobby"));
}

#[test]
fn test_cross_page_navigation_swaps_modules() {
    let mut doc = Document::new();
    let mut env = env();
    let mut manager = ModuleManager::new(classifier());

    let (lobby_mod, lobby_loads, lobby_unloads) = counting_module("lobby-tweaks");
    let (profile_mod, profile_loads, profile_unloads) = counting_module("profile-badges");
    let (all_mod, all_loads, all_unloads) = counting_module("everywhere");
    manager.register(lobby_mod, Pages::only(["lobby"]));
    manager.register(profile_mod, Pages::only(["profile"]));
    manager.register(all_mod, Pages::All);

    let now = Instant::now();
    doc.set_url("https://example.org/lobby");
    manager.check_navigation(&mut doc, &mut env, now);
    doc.set_url("https://example.org/profile/alice");
    manager.check_navigation(&mut doc, &mut env, now);

    // Lobby module out, profile module in, all-pages module reloaded.
    assert_eq!(lobby_unloads.load(Ordering::SeqCst), 1);
    assert_eq!(lobby_loads.load(Ordering::SeqCst), 1);
    assert!(!manager.module("lobby-tweaks").unwrap().is_loaded());
    assert!(manager.module("profile-badges").unwrap().is_loaded());
    assert_eq!(profile_loads.load(Ordering::SeqCst), 1);
    assert_eq!(profile_unloads.load(Ordering::SeqCst), 0);
    assert_eq!(all_loads.load(Ordering::SeqCst), 2);
    assert_eq!(all_unloads.load(Ordering::SeqCst), 1);
    assert_eq!(manager.context().unwrap().nick.as_deref(), Some("alice"));
}

#[test]
fn test_same_page_new_parameters_reloads() {
    let mut doc = Document::new();
    let mut env = env();
    let mut manager = ModuleManager::new(classifier());

    let (game_mod, loads, unloads) = counting_module("game-hud");
    manager.register(game_mod, Pages::only(["game"]));

    let now = Instant::now();
    doc.set_url("https://example.org/game.php?id=100");
    manager.check_navigation(&mut doc, &mut env, now);
    let first_session = manager.module("game-hud").unwrap().session_id().unwrap().to_string();

    doc.set_url("https://example.org/game.php?id=101");
    manager.check_navigation(&mut doc, &mut env, now);

    assert_eq!(loads.load(Ordering::SeqCst), 2);
    assert_eq!(unloads.load(Ordering::SeqCst), 1);
    let second_session = manager.module("game-hud").unwrap().session_id().unwrap();
    assert_ne!(first_session, second_session);
}

#[test]
fn test_same_context_url_change_is_a_no_op() {
    let mut doc = Document::new();
    let mut env = env();
    let mut manager = ModuleManager::new(classifier());

    let (lobby_mod, loads, unloads) = counting_module("lobby-tweaks");
    manager.register(lobby_mod, Pages::only(["lobby"]));

    let now = Instant::now();
    doc.set_url("https://example.org/lobby");
    manager.check_navigation(&mut doc, &mut env, now);
    doc.set_url("https://example.org/lobby#filters");
    manager.check_navigation(&mut doc, &mut env, now);

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(unloads.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unclassified_page_unloads_everything() {
    let mut doc = Document::new();
    let mut env = env();
    let mut manager = ModuleManager::new(classifier());

    let (all_mod, loads, unloads) = counting_module("everywhere");
    manager.register(all_mod, Pages::All);

    let now = Instant::now();
    doc.set_url("https://example.org/lobby");
    manager.check_navigation(&mut doc, &mut env, now);
    doc.set_url("https://example.org/totally-unknown");
    manager.check_navigation(&mut doc, &mut env, now);

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(unloads.load(Ordering::SeqCst), 1);
    assert!(manager.context().is_none());
}

#[test]
fn test_disabled_module_never_loads() {
    let mut doc = Document::new();
    let mut env = env();
    let settings = MemoryStore::new();
    settings
        .set("module.lobby-tweaks.enabled", json!(false))
        .unwrap();

    let mut manager = ModuleManager::new(classifier());
    let (disabled_mod, disabled_loads, _) = counting_module("lobby-tweaks");
    let (enabled_mod, enabled_loads, _) = counting_module("other");
    manager.register(disabled_mod, Pages::only(["lobby"]));
    manager.register(enabled_mod, Pages::All);
    manager.resolve_enabled(&settings).unwrap();

    doc.set_url("https://example.org/lobby");
    manager.check_navigation(&mut doc, &mut env, Instant::now());

    assert_eq!(disabled_loads.load(Ordering::SeqCst), 0);
    assert_eq!(enabled_loads.load(Ordering::SeqCst), 1);
}

#[test]
fn test_transitions_run_in_registration_order() {
    let mut doc = Document::new();
    let mut env = env();
    let mut manager = ModuleManager::new(classifier());

    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second", "third"] {
        let order_in_hook = Arc::clone(&order);
        manager.register(
            Module::new(name).with_load(move |_ctx| {
                order_in_hook.lock().push(name);
                Ok(())
            }),
            Pages::All,
        );
    }

    doc.set_url("https://example.org/lobby");
    manager.check_navigation(&mut doc, &mut env, Instant::now());

    assert_eq!(order.lock().as_slice(), &["first", "second", "third"]);
}

#[test]
fn test_context_snapshot_is_published() {
    let mut doc = Document::new();
    let mut env = env();
    let mut manager = ModuleManager::new(classifier());
    let handle = manager.context_handle();

    doc.set_url("https://example.org/profile/bob");
    manager.check_navigation(&mut doc, &mut env, Instant::now());

    let published = handle.load_full().unwrap();
    assert_eq!(published.page, PageTag::from("profile"));
    assert_eq!(published.nick.as_deref(), Some("bob"));

    doc.set_url("https://example.org/unknown");
    manager.check_navigation(&mut doc, &mut env, Instant::now());
    assert!(handle.load_full().is_none());
}

#[test]
fn test_failed_module_load_does_not_block_others() {
    let mut doc = Document::new();
    let mut env = env();
    let mut manager = ModuleManager::new(classifier());

    manager.register(
        Module::new("flaky").with_load(|_ctx| anyhow::bail!("nope")),
        Pages::All,
    );
    let (healthy, loads, _) = counting_module("healthy");
    manager.register(healthy, Pages::All);

    doc.set_url("https://example.org/lobby");
    manager.check_navigation(&mut doc, &mut env, Instant::now());

    assert!(!manager.module("flaky").unwrap().is_loaded());
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}
