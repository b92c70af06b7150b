//! Heap snapshots of live stack regions.
//!
//! Every context owns a [`Snapshot`]: a byte buffer holding the most recent
//! copy of the `[low, high)` slice of the physical stack the context occupied
//! when it last suspended. The buffer capacity tracks the live size with
//! hysteresis so that a context yielding at a steady depth never reallocates:
//! the buffer is replaced only when it can no longer hold the live bytes or
//! when it exceeds twice their size.

use alloc::boxed::Box;
use alloc::vec;
use core::ptr;

/// Address range `[low, high)` of a context's live stack bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct StackExtent {
    low: usize,
    high: usize,
}

impl StackExtent {
    pub(crate) fn new(low: usize, high: usize) -> Self {
        debug_assert!(low <= high, "inverted stack extent");
        Self { low, high }
    }

    pub(crate) const fn empty() -> Self {
        Self { low: 0, high: 0 }
    }

    pub(crate) fn low(&self) -> usize {
        self.low
    }

    pub(crate) fn high(&self) -> usize {
        self.high
    }

    pub(crate) fn len(&self) -> usize {
        self.high - self.low
    }

    pub(crate) fn contains(&self, addr: usize) -> bool {
        self.low <= addr && addr < self.high
    }
}

/// Captured copy of a context's stack bytes plus the extent they came from.
pub(crate) struct Snapshot {
    buf: Box<[u8]>,
    extent: StackExtent,
}

impl Snapshot {
    pub(crate) fn new() -> Self {
        Self {
            buf: Box::default(),
            extent: StackExtent::empty(),
        }
    }

    /// Copy the live bytes of `extent` into the buffer, resizing it to
    /// exactly `extent.len()` if the current capacity lies outside
    /// `[len, 2 * len]`.
    ///
    /// Allocation failure aborts the process (the infallible `alloc` path);
    /// the engine cannot suspend a context without a place for its stack.
    ///
    /// # Safety
    ///
    /// `extent` must describe readable stack memory owned by the suspending
    /// context for the whole duration of the copy.
    pub(crate) unsafe fn capture(&mut self, extent: StackExtent) {
        let len = extent.len();
        if self.buf.len() < len || self.buf.len() > len.saturating_mul(2) {
            self.buf = vec![0; len].into_boxed_slice();
        }
        // Safety: source is readable per the caller contract; the buffer was
        // just sized to hold at least `len` bytes and cannot alias the stack.
        unsafe {
            ptr::copy_nonoverlapping(extent.low() as *const u8, self.buf.as_mut_ptr(), len);
        }
        self.extent = extent;
    }

    pub(crate) fn extent(&self) -> StackExtent {
        self.extent
    }

    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.buf.as_ptr()
    }

    /// Allocated capacity in bytes; `0` until the first capture.
    pub(crate) fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Whether this snapshot has captured anything yet.
    pub(crate) fn is_captured(&self) -> bool {
        self.extent.len() != 0
    }
}
