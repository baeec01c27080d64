//! Teardown of started operations.
//!
//! Every operation the engine starts hands back something that implements
//! [`Dispose`]. Disposing stops its timers and aborts its in-flight call.
//! [`DisposeGuard`] ties that to a scope, the way a view ties it to its
//! lifetime.

/// Something that can be torn down.
///
/// Disposing is idempotent and synchronous: once `dispose` returns, no
/// timer belonging to the operation will fire and no late outcome will be
/// applied.
pub trait Dispose {
    /// Tear the operation down.
    fn dispose(&self);
}

/// A guard that disposes the wrapped operation when dropped.
///
/// # Example
///
/// ```ignore
/// use wolweb_core::{DeviceBoard, DisposeGuard};
///
/// let board = DeviceBoard::new(transport, options)?;
/// {
///     let _poll = DisposeGuard::new(board.begin_ping(&address)?);
///     // ... the view is alive, probes run ...
/// } // view gone: the timer is cancelled, the in-flight probe aborted
/// ```
#[must_use = "dropping the guard disposes the operation immediately"]
pub struct DisposeGuard<T: Dispose> {
    inner: Option<T>,
}

impl<T: Dispose> DisposeGuard<T> {
    /// Create a new guard.
    pub fn new(inner: T) -> Self {
        Self { inner: Some(inner) }
    }

    /// Take the operation back without disposing it.
    ///
    /// Returns `None` if it was already taken.
    pub fn into_inner(mut self) -> Option<T> {
        self.inner.take()
    }

    /// Get a reference to the operation.
    pub fn get(&self) -> Option<&T> {
        self.inner.as_ref()
    }
}

impl<T: Dispose> Drop for DisposeGuard<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.dispose();
        }
    }
}
