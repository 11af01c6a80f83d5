//! Runtime-swappable backend handle.
//!
//! Callers never keep the backend itself, only the switch. Every operation
//! calls [`BackendSwitch::current`] again, so a backend installed after a
//! caller obtained its handle is picked up on that caller's next call.

use std::sync::Arc;

use parking_lot::RwLock;

pub struct BackendSwitch<T: ?Sized> {
    current: RwLock<Arc<T>>,
}

impl<T: ?Sized> BackendSwitch<T> {
    pub fn new(initial: Arc<T>) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    /// The backend active right now.
    #[must_use]
    pub fn current(&self) -> Arc<T> {
        Arc::clone(&self.current.read())
    }

    /// Installs `next` and returns the backend it replaced.
    pub fn replace(&self, next: Arc<T>) -> Arc<T> {
        std::mem::replace(&mut *self.current.write(), next)
    }
}

impl<T: ?Sized> std::fmt::Debug for BackendSwitch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSwitch").finish_non_exhaustive()
    }
}
