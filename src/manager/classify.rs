//! URL classification.
//!
//! Every navigation runs the current URL through a [`PageClassifier`],
//! producing a [`LobbyContext`] snapshot (or `None` for pages the engine
//! does not know about). The manager diffs consecutive snapshots to
//! decide which modules to load, reload, or unload.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::EngineError;

// ============================================================================
// Page tags
// ============================================================================

/// Opaque label for a class of pages ("lobby", "profile", ...).
///
/// Cheap to clone; two tags compare equal iff their labels do.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageTag(Arc<str>);

impl PageTag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PageTag {
    fn from(label: &str) -> Self {
        Self(Arc::from(label))
    }
}

impl fmt::Display for PageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Classification result
// ============================================================================

/// Everything the engine knows about the current page.
///
/// `match_id`, `nick`, and `lang` are populated from the URL when the
/// classifier can extract them. Two contexts with the same `page` but
/// different captures are distinct contexts; landing on them triggers a
/// reload rather than a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyContext {
    pub page: PageTag,
    pub match_id: Option<String>,
    pub nick: Option<String>,
    pub lang: Option<String>,
}

impl LobbyContext {
    pub fn new(page: impl Into<PageTag>) -> Self {
        Self {
            page: page.into(),
            match_id: None,
            nick: None,
            lang: None,
        }
    }

    /// Same page class, ignoring captured parameters.
    pub fn same_page(&self, other: &LobbyContext) -> bool {
        self.page == other.page
    }
}

// ============================================================================
// Classifier trait
// ============================================================================

/// Maps a URL to a page context. Returning `None` means the page is
/// unrecognized and no page-scoped module applies there.
pub trait PageClassifier: Send {
    fn classify(&self, url: &str) -> Option<LobbyContext>;
}

impl<F> PageClassifier for F
where
    F: Fn(&str) -> Option<LobbyContext> + Send,
{
    fn classify(&self, url: &str) -> Option<LobbyContext> {
        self(url)
    }
}

impl PageClassifier for Box<dyn PageClassifier> {
    fn classify(&self, url: &str) -> Option<LobbyContext> {
        (**self).classify(url)
    }
}

// ============================================================================
// Regex-table classifier
// ============================================================================

/// Ordered regex table, first match wins.
///
/// Named capture groups `match_id`, `nick`, and `lang` are lifted into
/// the resulting context when present:
///
/// ```
/// use domwatch::{PageClassifier, UrlPatterns};
///
/// let patterns = UrlPatterns::new()
///     .route(r"/game\.php\?id=(?P<match_id>\d+)", "game").unwrap()
///     .route(r"/profile/(?P<nick>[^/]+)$", "profile").unwrap();
///
/// let ctx = patterns.classify("https://example.org/game.php?id=42").unwrap();
/// assert_eq!(ctx.page.as_str(), "game");
/// assert_eq!(ctx.match_id.as_deref(), Some("42"));
/// ```
pub struct UrlPatterns {
    routes: Vec<(Regex, PageTag)>,
}

impl UrlPatterns {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Appends a route. Routes are tried in registration order.
    pub fn route(mut self, pattern: &str, tag: &str) -> Result<Self, EngineError> {
        let regex = Regex::new(pattern)?;
        self.routes.push((regex, PageTag::from(tag)));
        Ok(self)
    }
}

impl Default for UrlPatterns {
    fn default() -> Self {
        Self::new()
    }
}

impl PageClassifier for UrlPatterns {
    fn classify(&self, url: &str) -> Option<LobbyContext> {
        for (regex, tag) in &self.routes {
            let Some(caps) = regex.captures(url) else {
                continue;
            };
            let capture = |name: &str| caps.name(name).map(|m| m.as_str().to_string());
            return Some(LobbyContext {
                page: tag.clone(),
                match_id: capture("match_id"),
                nick: capture("nick"),
                lang: capture("lang"),
            });
        }
        None
    }
}
