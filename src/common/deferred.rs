//! Single-slot coalescing of deferred work.
//!
//! Any number of requests made before the event loop reaches its next idle
//! point collapse into one pending unit of work. The owner consumes it with
//! [`Deferred::take`] when it runs the work.

use std::fmt;

/// Hook invoked when the slot goes from idle to pending, so a host event loop
/// can schedule its idle callback.
pub type Waker = Box<dyn FnMut()>;

#[derive(Default)]
pub struct Deferred {
    pending: bool,
    waker: Option<Waker>,
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("pending", &self.pending)
            .field("waker", &self.waker.is_some())
            .finish()
    }
}

impl Deferred {
    pub fn new() -> Self { Self::default() }

    pub fn set_waker(&mut self, waker: Waker) { self.waker = Some(waker); }

    /// Marks the work as needed. Returns true if this call scheduled it, false
    /// if it was already pending.
    pub fn request(&mut self) -> bool {
        if self.pending {
            return false;
        }
        self.pending = true;
        if let Some(waker) = self.waker.as_mut() {
            waker();
        }
        true
    }

    pub fn is_pending(&self) -> bool { self.pending }

    /// Consumes the pending request, returning whether there was one.
    pub fn take(&mut self) -> bool { std::mem::take(&mut self.pending) }

    /// Drops a pending request without running it.
    pub fn cancel(&mut self) { self.pending = false; }
}
