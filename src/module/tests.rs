use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use crate::dom::{Document, Selector};
use crate::engine::EngineEnv;
use crate::module::Module;
use crate::settings::MemoryStore;

fn env() -> EngineEnv {
    EngineEnv::new(Arc::new(MemoryStore::new()), Arc::new(ArcSwapOption::empty()))
}

fn matcher(selector: &str) -> crate::dom::Matcher {
    Selector::parse(selector).unwrap().matcher()
}

#[test]
fn test_load_then_unload_releases_everything() {
    let mut doc = Document::new();
    let mut env = env();
    let root = doc.root();
    let target = doc.create_element("div");
    doc.set_attribute(target, "class", "seat").unwrap();
    doc.append_child(root, target).unwrap();
    doc.take_records();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_hook = Arc::clone(&seen);
    let mut module = Module::new("seats").with_load(move |ctx| {
        let seen = Arc::clone(&seen_in_hook);
        ctx.watch_appear(
            matcher(".seat"),
            Box::new(move |_doc, node| {
                seen.lock().push(node);
                Ok(())
            }),
        );
        ctx.processed_node(target)?;
        ctx.every(Duration::from_secs(1), |_doc| Ok(()));
        Ok(())
    });

    let now = Instant::now();
    module.load(&mut doc, &mut env, now).unwrap();

    assert!(module.is_loaded());
    assert!(env.dispatcher.is_armed());
    assert_eq!(env.dispatcher.task_count(), 1);
    assert_eq!(env.timers.live_count(), 1);
    // Registration-time delivery saw the pre-existing node.
    assert_eq!(seen.lock().as_slice(), &[target]);
    // Marker attribute stamped with the session id.
    let marker = format!("data-dw-{}", module.session_id().unwrap());
    assert!(doc.attr(target, &marker).is_some());

    module.unload(&mut doc, &mut env, now);

    assert!(!module.is_loaded());
    assert_eq!(module.owned_resource_count(), 0);
    assert_eq!(env.dispatcher.task_count(), 0);
    assert_eq!(env.timers.live_count(), 0);
    assert!(doc.attr(target, &marker).is_none());
}

#[test]
fn test_double_load_is_a_no_op() {
    let mut doc = Document::new();
    let mut env = env();
    let loads = Arc::new(AtomicUsize::new(0));
    let loads_in_hook = Arc::clone(&loads);
    let mut module = Module::new("idem").with_load(move |_ctx| {
        loads_in_hook.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let now = Instant::now();
    module.load(&mut doc, &mut env, now).unwrap();
    let first_session = module.session_id().unwrap().to_string();
    module.load(&mut doc, &mut env, now).unwrap();

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(module.session_id().unwrap(), first_session);
}

#[test]
fn test_failed_load_rolls_back() {
    let mut doc = Document::new();
    let mut env = env();
    let root = doc.root();
    let target = doc.create_element("div");
    doc.append_child(root, target).unwrap();

    let marker = Arc::new(Mutex::new(String::new()));
    let marker_in_hook = Arc::clone(&marker);
    let mut module = Module::new("broken").with_load(move |ctx| {
        *marker_in_hook.lock() = ctx.marker().to_string();
        ctx.watch_appear(matcher("div"), Box::new(|_, _| Ok(())));
        ctx.processed_node(target)?;
        ctx.every(Duration::from_secs(1), |_doc| Ok(()));
        anyhow::bail!("backend unreachable")
    });

    let err = module.load(&mut doc, &mut env, Instant::now());
    assert!(err.is_err());
    assert!(!module.is_loaded());
    assert_eq!(module.owned_resource_count(), 0);
    assert_eq!(env.dispatcher.task_count(), 0);
    assert_eq!(env.timers.live_count(), 0);
    // The stamp from the partial load is gone too.
    assert!(doc.attr(target, &marker.lock()).is_none());
}

#[test]
fn test_reload_rotates_the_session() {
    let mut doc = Document::new();
    let mut env = env();
    let root = doc.root();
    let target = doc.create_element("span");
    doc.append_child(root, target).unwrap();

    let mut module = Module::new("badge").with_load(move |ctx| {
        ctx.processed_node(target)?;
        Ok(())
    });

    let now = Instant::now();
    module.load(&mut doc, &mut env, now).unwrap();
    let first = module.session_id().unwrap().to_string();
    let first_marker = format!("data-dw-{first}");
    assert!(doc.attr(target, &first_marker).is_some());

    module.reload(&mut doc, &mut env, now).unwrap();
    let second = module.session_id().unwrap().to_string();

    assert_ne!(first, second);
    // Old stamp gone, new stamp present: stale-session work is inert.
    assert!(doc.attr(target, &first_marker).is_none());
    assert!(doc.attr(target, &format!("data-dw-{second}")).is_some());
}

#[test]
fn test_append_to_and_hide_round_trips() {
    let mut doc = Document::new();
    let mut env = env();
    let root = doc.root();
    let original = doc.create_element("table");
    doc.set_style_display(original, Some("inline-block")).unwrap();
    doc.append_child(root, original).unwrap();

    let injected = Arc::new(Mutex::new(None));
    let injected_in_hook = Arc::clone(&injected);
    let mut module = Module::new("scoreboard").with_load(move |ctx| {
        let replacement = ctx.doc().create_element("div");
        ctx.append_to_and_hide(replacement, original)?;
        *injected_in_hook.lock() = Some(replacement);
        Ok(())
    });

    let now = Instant::now();
    module.load(&mut doc, &mut env, now).unwrap();
    let replacement = injected.lock().unwrap();

    assert_eq!(doc.display(original), Some("none"));
    assert!(doc.is_attached(replacement));
    assert_eq!(doc.children(root), &[original, replacement]);

    module.unload(&mut doc, &mut env, now);

    // Original restored to its prior inline display, injection detached.
    assert_eq!(doc.display(original), Some("inline-block"));
    assert!(!doc.is_attached(replacement));
}

#[test]
fn test_do_after_fires_once_then_stops() {
    let mut doc = Document::new();
    let mut env = env();
    let root = doc.root();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_hook = Arc::clone(&fired);
    let mut module = Module::new("poller").with_load(move |ctx| {
        let fired = Arc::clone(&fired_in_hook);
        ctx.do_after(
            |doc: &Document| doc.query(&|d, n| d.get(n).is_some_and(|node| node.tag() == "aside")),
            move |_doc, _found| {
                fired.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );
        Ok(())
    });

    let t0 = Instant::now();
    module.load(&mut doc, &mut env, t0).unwrap();

    // Condition not met yet.
    env.timers.pump(t0 + Duration::from_millis(50), &mut doc);
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    let aside = doc.create_element("aside");
    doc.append_child(root, aside).unwrap();
    env.timers.pump(t0 + Duration::from_millis(100), &mut doc);
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // One-shot: the entry is gone, no further polling.
    assert_eq!(env.timers.live_count(), 0);
    env.timers.pump(t0 + Duration::from_millis(150), &mut doc);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unload_hook_failure_still_tears_down() {
    let mut doc = Document::new();
    let mut env = env();

    let mut module = Module::new("grumpy")
        .with_load(|ctx| {
            ctx.every(Duration::from_secs(1), |_doc| Ok(()));
            Ok(())
        })
        .with_unload(|_ctx| anyhow::bail!("refusing to go quietly"));

    let now = Instant::now();
    module.load(&mut doc, &mut env, now).unwrap();
    module.unload(&mut doc, &mut env, now);

    assert!(!module.is_loaded());
    assert_eq!(env.timers.live_count(), 0);
    assert_eq!(module.owned_resource_count(), 0);
}

#[test]
fn test_visibility_registration_released_on_unload() {
    let mut doc = Document::new();
    let mut env = env();
    let root = doc.root();
    let offscreen = doc.create_element("div");
    doc.append_child(root, offscreen).unwrap();
    // No bounds set, so the node is never visible.

    let mut module = Module::new("lazy").with_load(move |ctx| {
        ctx.when_visible(offscreen, Box::new(|_doc, _node| Ok(())));
        Ok(())
    });

    let now = Instant::now();
    module.load(&mut doc, &mut env, now).unwrap();
    assert_eq!(env.gate.pending_count(), 1);

    module.unload(&mut doc, &mut env, now);
    assert_eq!(env.gate.pending_count(), 0);
}
