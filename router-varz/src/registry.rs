//! The view of the backend registry needed to compute derived varz fields.
use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use portable_atomic::{AtomicUsize, Ordering};

/// Request volume of one application over a trailing window.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TopAppsEntry {
    /// The application identifier.
    pub application_id: String,
    /// Requests routed to the application during the window.
    pub requests: u64,
}

impl TopAppsEntry {
    /// Creates a new `TopAppsEntry`.
    pub fn new(application_id: impl Into<String>, requests: u64) -> Self {
        Self { application_id: application_id.into(), requests }
    }
}

/// The backend registry, as seen by [`Varz`](crate::Varz).
///
/// Implementations are queried while the aggregator lock is held, so every method is expected to
/// be a fast, non-blocking read of in-memory state.
pub trait BackendRegistry: Send + Sync {
    /// Gets the number of registered routes.
    fn num_uris(&self) -> usize;

    /// Gets the number of registered backend instances.
    fn num_backends(&self) -> usize;

    /// Gets the most active applications over the trailing `window`, busiest first, returning at
    /// most `limit` entries.
    fn top_apps(&self, window: Duration, limit: usize) -> Vec<TopAppsEntry>;
}

impl<T> BackendRegistry for Arc<T>
where
    T: BackendRegistry + ?Sized,
{
    fn num_uris(&self) -> usize {
        (**self).num_uris()
    }

    fn num_backends(&self) -> usize {
        (**self).num_backends()
    }

    fn top_apps(&self, window: Duration, limit: usize) -> Vec<TopAppsEntry> {
        (**self).top_apps(window, limit)
    }
}

/// A registry whose values are set directly.
///
/// Useful for processes that do not run service discovery, and in tests.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    uris: AtomicUsize,
    backends: AtomicUsize,
    top_apps: Mutex<Vec<TopAppsEntry>>,
}

impl StaticRegistry {
    /// Creates an empty `StaticRegistry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of registered routes.
    pub fn set_uris(&self, uris: usize) {
        self.uris.store(uris, Ordering::Release);
    }

    /// Sets the number of registered backends.
    pub fn set_backends(&self, backends: usize) {
        self.backends.store(backends, Ordering::Release);
    }

    /// Replaces the application ranking.  Entries are sorted busiest first.
    pub fn set_top_apps(&self, mut entries: Vec<TopAppsEntry>) {
        entries.sort_by(|a, b| b.requests.cmp(&a.requests));
        *self.top_apps.lock() = entries;
    }
}

impl BackendRegistry for StaticRegistry {
    fn num_uris(&self) -> usize {
        self.uris.load(Ordering::Acquire)
    }

    fn num_backends(&self) -> usize {
        self.backends.load(Ordering::Acquire)
    }

    fn top_apps(&self, _window: Duration, limit: usize) -> Vec<TopAppsEntry> {
        self.top_apps.lock().iter().take(limit).cloned().collect()
    }
}
