use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Lazily created read-write locks, one per `(bundle id, item slug)`.
///
/// Locks are never removed; the map grows with the number of distinct
/// slugs ever touched.
#[derive(Debug, Default)]
pub struct SlugLocks {
    inner: Mutex<HashMap<(String, String), Arc<RwLock<()>>>>,
}

impl SlugLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bundle_id: &str, slug: &str) -> Arc<RwLock<()>> {
        let mut map = self.inner.lock();
        map.entry((bundle_id.to_string(), slug.to_string()))
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
