//! Cache change notifications.
//!
//! Interested parties (disk quota accounting, seed tracking) register a
//! [`BlobStoreListener`] with the store. Notifications are delivered to
//! every listener in registration order; a failing listener is logged and
//! never stops delivery to the others or the operation that triggered it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::warn;

use crate::tile::TileRef;

/// Error a listener may report from a callback.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

pub type ListenerResult = Result<(), ListenerError>;

/// Receives notifications about tiles and layers changing in the store.
///
/// Every method has a no-op default, so implementors only override the
/// events they care about.
pub trait BlobStoreListener: Send + Sync {
    fn tile_stored(&self, _tile: &TileRef) -> ListenerResult {
        Ok(())
    }

    /// A tile was overwritten; `old_size` is the size of the replaced blob.
    fn tile_updated(&self, _tile: &TileRef, _old_size: u64) -> ListenerResult {
        Ok(())
    }

    fn tile_deleted(&self, _tile: &TileRef) -> ListenerResult {
        Ok(())
    }

    fn layer_deleted(&self, _layer_name: &str) -> ListenerResult {
        Ok(())
    }

    fn gridset_deleted(&self, _layer_name: &str, _gridset_id: &str) -> ListenerResult {
        Ok(())
    }

    fn parameters_deleted(&self, _layer_name: &str, _parameters_id: &str) -> ListenerResult {
        Ok(())
    }

    fn layer_renamed(&self, _old_name: &str, _new_name: &str) -> ListenerResult {
        Ok(())
    }
}

/// Registered listeners, shared by the facade and the delete workers.
#[derive(Default)]
pub struct ListenerList {
    listeners: RwLock<Vec<Arc<dyn BlobStoreListener>>>,
}

impl ListenerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn BlobStoreListener>) {
        self.listeners.write().push(listener);
    }

    /// Removes a previously added listener, compared by identity.
    pub fn remove(&self, listener: &Arc<dyn BlobStoreListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn send_tile_stored(&self, tile: &TileRef) {
        self.each("tile_stored", |l| l.tile_stored(tile));
    }

    pub fn send_tile_updated(&self, tile: &TileRef, old_size: u64) {
        self.each("tile_updated", |l| l.tile_updated(tile, old_size));
    }

    pub fn send_tile_deleted(&self, tile: &TileRef) {
        self.each("tile_deleted", |l| l.tile_deleted(tile));
    }

    pub fn send_layer_deleted(&self, layer_name: &str) {
        self.each("layer_deleted", |l| l.layer_deleted(layer_name));
    }

    pub fn send_gridset_deleted(&self, layer_name: &str, gridset_id: &str) {
        self.each("gridset_deleted", |l| l.gridset_deleted(layer_name, gridset_id));
    }

    pub fn send_parameters_deleted(&self, layer_name: &str, parameters_id: &str) {
        self.each("parameters_deleted", |l| {
            l.parameters_deleted(layer_name, parameters_id)
        });
    }

    pub fn send_layer_renamed(&self, old_name: &str, new_name: &str) {
        self.each("layer_renamed", |l| l.layer_renamed(old_name, new_name));
    }

    fn each<F>(&self, event: &'static str, f: F)
    where
        F: Fn(&dyn BlobStoreListener) -> ListenerResult,
    {
        // Snapshot so callbacks may add or remove listeners
        let listeners: Vec<Arc<dyn BlobStoreListener>> = self.listeners.read().clone();
        for listener in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(event, error = %e, "Listener failed"),
                Err(payload) => {
                    warn!(event, panic = panic_message(payload.as_ref()), "Listener panicked")
                }
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl BlobStoreListener for Recorder {
        fn layer_deleted(&self, layer_name: &str) -> ListenerResult {
            self.events.lock().push(format!("layer:{}", layer_name));
            Ok(())
        }

        fn tile_deleted(&self, tile: &TileRef) -> ListenerResult {
            self.events.lock().push(format!("tile:{}", tile.key));
            Ok(())
        }
    }

    struct Failing;

    impl BlobStoreListener for Failing {
        fn layer_deleted(&self, _layer_name: &str) -> ListenerResult {
            Err(ListenerError("quota store offline".to_string()))
        }
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let list = ListenerList::new();
        let recorder = Arc::new(Recorder::default());
        list.add(Arc::new(Failing));
        list.add(recorder.clone());

        list.send_layer_deleted("roads");

        assert_eq!(*recorder.events.lock(), vec!["layer:roads".to_string()]);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        struct Panicking;
        impl BlobStoreListener for Panicking {
            fn tile_deleted(&self, _tile: &TileRef) -> ListenerResult {
                panic!("quota index corrupted");
            }
        }

        let list = ListenerList::new();
        let recorder = Arc::new(Recorder::default());
        list.add(Arc::new(Panicking));
        list.add(recorder.clone());

        list.send_tile_deleted(&TileRef::new("L1/g/png/default/0/0/0.png", [0, 0, 0], 1));
        list.send_tile_deleted(&TileRef::new("L1/g/png/default/0/1/0.png", [1, 0, 0], 1));

        assert_eq!(recorder.events.lock().len(), 2);
    }

    #[test]
    fn test_remove_by_identity() {
        let list = ListenerList::new();
        let first: Arc<dyn BlobStoreListener> = Arc::new(Recorder::default());
        let second: Arc<dyn BlobStoreListener> = Arc::new(Recorder::default());
        list.add(first.clone());
        list.add(second.clone());

        assert!(list.remove(&first));
        assert!(!list.remove(&first));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_default_methods_are_noops() {
        struct Silent;
        impl BlobStoreListener for Silent {}

        let list = ListenerList::new();
        list.add(Arc::new(Silent));
        list.send_layer_renamed("a", "b");
        list.send_tile_stored(&TileRef::new("k", [0, 0, 0], 1));
    }
}
