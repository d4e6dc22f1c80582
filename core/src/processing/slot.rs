use std::sync::{Arc, Mutex, PoisonError};

/// Single shared value replaced wholesale. The lock only guards the pointer swap.
pub struct ArcCell<T> {
    inner: Mutex<Arc<T>>,
}

impl<T: Clone> ArcCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Arc::new(value)),
        }
    }

    pub fn load(&self) -> Arc<T> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn store(&self, value: T) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Arc::new(value);
    }

    /// Publishes a modified copy of the current value.
    pub fn update(&self, apply: impl FnOnce(&mut T)) -> Arc<T> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = T::clone(&guard);
        apply(&mut next);
        let next = Arc::new(next);
        *guard = next.clone();
        next
    }
}

/// Optional shared value, e.g. a mask that may not have been built yet.
pub struct ArcSlot<T> {
    inner: Mutex<Option<Arc<T>>>,
}

impl<T> ArcSlot<T> {
    pub fn empty() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    pub fn load(&self) -> Option<Arc<T>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn store(&self, value: Arc<T>) -> Option<Arc<T>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(value)
    }

    pub fn clear(&self) -> Option<Arc<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn is_set(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<T> Default for ArcSlot<T> {
    fn default() -> Self {
        Self::empty()
    }
}
