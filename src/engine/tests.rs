use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::json;

use super::*;
use crate::dom::{NodeId, Rect, Selector};
use crate::manager::LobbyContext;

fn lobby_classifier() -> impl PageClassifier + 'static {
    |url: &str| url.contains("/lobby").then(|| LobbyContext::new("lobby"))
}

#[test]
fn test_tick_drives_watches_end_to_end() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_hook = Arc::clone(&seen);

    let module = Module::new("chat-filter").with_load(move |ctx| {
        let seen = Arc::clone(&seen_in_hook);
        ctx.watch_all(
            Selector::parse(".chat-line").unwrap().matcher(),
            Box::new(move |_doc, node| {
                seen.lock().push(node);
                Ok(())
            }),
        );
        Ok(())
    });

    let mut engine = Engine::builder()
        .classifier(lobby_classifier())
        .register(module, Pages::All)
        .build()
        .unwrap();

    let mut doc = Document::new();
    doc.set_url("https://example.org/lobby");
    let t0 = Instant::now();

    // First tick: navigation loads the module, no chat lines yet.
    engine.tick(&mut doc, t0);
    assert!(engine.manager().module("chat-filter").unwrap().is_loaded());
    assert!(seen.lock().is_empty());

    // Host page appends two chat lines; the next tick delivers both.
    let root = doc.root();
    let mut lines: Vec<NodeId> = Vec::new();
    for _ in 0..2 {
        let line = doc.create_element("div");
        doc.set_attribute(line, "class", "chat-line").unwrap();
        doc.append_child(root, line).unwrap();
        lines.push(line);
    }
    engine.tick(&mut doc, t0 + Duration::from_millis(50));
    assert_eq!(seen.lock().as_slice(), lines.as_slice());

    // Idle tick delivers nothing new.
    engine.tick(&mut doc, t0 + Duration::from_millis(100));
    assert_eq!(seen.lock().len(), 2);
}

#[test]
fn test_tick_order_navigation_before_pumps() {
    // A module loaded by this very tick must see mutations queued before
    // the tick, because registration replays current matches.
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_in_hook = Arc::clone(&seen);

    let module = Module::new("eager").with_load(move |ctx| {
        let seen = Arc::clone(&seen_in_hook);
        ctx.watch_appear(
            Selector::parse("button").unwrap().matcher(),
            Box::new(move |_doc, _node| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        Ok(())
    });

    let mut engine = Engine::builder()
        .classifier(lobby_classifier())
        .register(module, Pages::All)
        .build()
        .unwrap();

    let mut doc = Document::new();
    let root = doc.root();
    let button = doc.create_element("button");
    doc.append_child(root, button).unwrap();
    doc.set_url("https://example.org/lobby");

    engine.tick(&mut doc, Instant::now());
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn test_visibility_deferred_until_scrolled_into_view() {
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_hook = Arc::clone(&fired);

    let module = Module::new("lazy-panel").with_load(move |ctx| {
        let fired = Arc::clone(&fired_in_hook);
        ctx.watch_appear(
            Selector::parse("#panel").unwrap().matcher(),
            Box::new(move |_doc, _node| Ok(())),
        );
        let panel = ctx.doc().query(&|d, n| d.attr(n, "id") == Some("panel"));
        if let Some(panel) = panel {
            let fired = Arc::clone(&fired);
            ctx.when_visible(
                panel,
                Box::new(move |_doc, _node| {
                    fired.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }
        Ok(())
    });

    let mut engine = Engine::builder()
        .classifier(lobby_classifier())
        .register(module, Pages::All)
        .build()
        .unwrap();

    let mut doc = Document::new();
    let root = doc.root();
    let panel = doc.create_element("section");
    doc.set_attribute(panel, "id", "panel").unwrap();
    // Below the fold at load time.
    doc.set_bounds(panel, Some(Rect::new(0, 2000, 300, 100))).unwrap();
    doc.append_child(root, panel).unwrap();
    doc.set_url("https://example.org/lobby");

    let t0 = Instant::now();
    engine.tick(&mut doc, t0);
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    // Scrolled into the viewport.
    doc.set_bounds(panel, Some(Rect::new(0, 120, 300, 100))).unwrap();
    engine.tick(&mut doc, t0 + Duration::from_millis(50));
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // Fire-once.
    engine.tick(&mut doc, t0 + Duration::from_millis(100));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_builder_rejects_unreadable_settings() {
    struct BrokenStore;
    impl SettingsStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<serde_json::Value>, crate::error::SettingsError> {
            Err(crate::error::SettingsError::NotAnObject)
        }
        fn set(
            &self,
            _key: &str,
            _value: serde_json::Value,
        ) -> Result<(), crate::error::SettingsError> {
            Ok(())
        }
    }

    let result = Engine::builder()
        .settings(Arc::new(BrokenStore))
        .register(Module::new("anything"), Pages::All)
        .build();
    assert!(result.is_err());
}

#[test]
fn test_settings_reachable_from_hooks() {
    let seen = Arc::new(Mutex::new(None));
    let seen_in_hook = Arc::clone(&seen);
    let module = Module::new("greeter").with_load(move |ctx| {
        *seen_in_hook.lock() = ctx.settings().get("greeting")?;
        Ok(())
    });

    let settings = Arc::new(crate::settings::MemoryStore::new());
    settings.set("greeting", json!("hello")).unwrap();

    let mut engine = Engine::builder()
        .classifier(lobby_classifier())
        .settings(settings)
        .register(module, Pages::All)
        .build()
        .unwrap();

    let mut doc = Document::new();
    doc.set_url("https://example.org/lobby");
    engine.tick(&mut doc, Instant::now());

    assert_eq!(seen.lock().clone(), Some(json!("hello")));
}

#[test]
fn test_shutdown_leaves_engine_inert() {
    let module = Module::new("anything").with_load(|ctx| {
        ctx.watch_appear(
            Selector::parse("div").unwrap().matcher(),
            Box::new(|_, _| Ok(())),
        );
        ctx.every(Duration::from_millis(10), |_doc| Ok(()));
        Ok(())
    });

    let mut engine = Engine::builder()
        .classifier(lobby_classifier())
        .register(module, Pages::All)
        .build()
        .unwrap();

    let mut doc = Document::new();
    let t0 = Instant::now();
    doc.set_url("https://example.org/lobby");
    engine.tick(&mut doc, t0);
    assert!(engine.env().dispatcher.is_armed());

    engine.shutdown(&mut doc, t0);
    assert!(!engine.env().dispatcher.is_armed());
    assert_eq!(engine.env().dispatcher.task_count(), 0);
    assert_eq!(engine.env().timers.live_count(), 0);
    assert!(!engine.manager().module("anything").unwrap().is_loaded());
}
