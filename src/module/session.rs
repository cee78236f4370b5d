use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque per-load identity. Regenerated on every load and reload, and
/// baked into the DOM marker attribute, so a callback surviving from a
/// previous session can never mistake the new session's nodes for its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: String,
    marker: String,
}

impl Session {
    /// Derive a fresh session id from the module name, a monotonic
    /// per-module generation and the wall clock.
    pub fn generate(name: &str, generation: u64) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        let mut hasher = blake3::Hasher::new();
        hasher.update(name.as_bytes());
        hasher.update(&generation.to_le_bytes());
        hasher.update(&nanos.to_le_bytes());
        let digest = hasher.finalize();

        let id = hex::encode(&digest.as_bytes()[..6]);
        let marker = format!("data-dw-{id}");
        Self { id, marker }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The session-scoped attribute name used to claim processed nodes.
    pub fn marker(&self) -> &str {
        &self.marker
    }
}
