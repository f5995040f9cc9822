//! Application state shared across request handlers.

use std::sync::Arc;

use crate::registry::Registry;

/// Shared application state.
///
/// Passed to request handlers via Axum's state extractor. The registry is
/// never mutated once the state is built.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: Registry,
}

impl AppState {
    pub fn new(registry: Registry) -> Self {
        Self {
            inner: Arc::new(AppStateInner { registry }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }
}
