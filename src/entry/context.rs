//! Opaque context handles forwarded to callbacks.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Shared, type-erased handle to caller-owned data (a controller or user
/// data object).
///
/// The scheduler only clones handles and compares them by identity. Callbacks
/// get their concrete type back with a checked [`Context::downcast`].
#[derive(Clone)]
pub struct Context {
    inner: Arc<dyn Any + Send + Sync>,
}

impl Context {
    /// Wrap a value in a new handle.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self { inner: Arc::new(value) }
    }

    /// Wrap an existing `Arc`, keeping its identity.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self { inner: value }
    }

    /// Typed shared pointer to the data, if it is a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.inner).downcast::<T>().ok()
    }

    /// Borrow the data as a `T`, if it is one.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Whether both handles point at the same object.
    pub fn same_as(&self, other: &Context) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.inner), Arc::as_ptr(&other.inner))
    }

    /// Number of live handles (including `Arc`s the caller still holds).
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context({:p})", Arc::as_ptr(&self.inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Default)]
    struct Counter {
        hits: AtomicU32,
    }

    #[test]
    fn test_downcast_to_right_type() {
        let ctx = Context::new(Counter::default());
        let counter = ctx.downcast::<Counter>().unwrap();
        counter.hits.fetch_add(1, Ordering::SeqCst);
        assert_eq!(ctx.downcast_ref::<Counter>().unwrap().hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_downcast_to_wrong_type() {
        let ctx = Context::new(5u32);
        assert!(ctx.downcast::<String>().is_none());
        assert!(ctx.downcast_ref::<i64>().is_none());
    }

    #[test]
    fn test_identity_not_value() {
        let a = Context::new(1u8);
        let b = Context::new(1u8);
        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
    }

    #[test]
    fn test_from_arc_keeps_identity() {
        let shared = Arc::new(Counter::default());
        let a = Context::from_arc(Arc::clone(&shared));
        let b = Context::from_arc(Arc::clone(&shared));
        assert!(a.same_as(&b));
        assert_eq!(a.holders(), 3);
    }
}
