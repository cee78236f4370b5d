use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::Receiver;
use parking_lot::Mutex;

use crate::dom::Document;
use crate::engine::Engine;
use crate::{debug, log};

/// Tokio shell around the synchronous [`Engine`] core.
///
/// The document lives behind a mutex so the embedder can mutate it from
/// other tasks between ticks; the runtime only holds the lock for the
/// duration of one tick. Sleeping adapts to the timer wheel: a timer due
/// sooner than the poll interval shortens the nap.
pub struct Runtime {
    doc: Arc<Mutex<Document>>,
    engine: Engine,
    shutdown_rx: Option<Receiver<()>>,
}

impl Runtime {
    pub fn new(doc: Arc<Mutex<Document>>, engine: Engine) -> Self {
        Self {
            doc,
            engine,
            shutdown_rx: None,
        }
    }

    /// A message (or disconnect) on `rx` stops the loop after the current
    /// tick and runs engine shutdown.
    pub fn with_shutdown_signal(mut self, rx: Receiver<()>) -> Self {
        self.shutdown_rx = Some(rx);
        self
    }

    pub fn document(&self) -> Arc<Mutex<Document>> {
        Arc::clone(&self.doc)
    }

    /// Ticks until the shutdown signal fires (forever without one).
    /// Returns the engine so callers can inspect final state.
    pub async fn run(mut self) -> Engine {
        log!("engine"; "runtime started");
        loop {
            if let Some(rx) = &self.shutdown_rx
                && rx.try_recv() != Err(crossbeam::channel::TryRecvError::Empty)
            {
                break;
            }

            let now = Instant::now();
            let sleep = {
                let mut doc = self.doc.lock();
                self.engine.tick(&mut doc, now);
                match self.engine.env().timers.next_due() {
                    Some(due) => self
                        .engine
                        .poll_interval()
                        .min(due.saturating_duration_since(now)),
                    None => self.engine.poll_interval(),
                }
            };
            debug!("engine"; "sleeping {sleep:?}");
            tokio::time::sleep(sleep).await;
        }

        {
            let mut doc = self.doc.lock();
            self.engine.shutdown(&mut doc, Instant::now());
        }
        log!("engine"; "runtime stopped");
        self.engine
    }
}
