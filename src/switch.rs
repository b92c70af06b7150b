//! Capture/restore orchestration.
//!
//! This module is the narrow waist through which every context switch moves.
//! The shared-stack discipline is: at any instant exactly one context (the
//! current one) owns the physical stack region below the engine's
//! `stack_base`; everyone else's bytes live in their heap [`Snapshot`]s.
//! Suspending copies the outgoing context's live extent out to its snapshot;
//! resuming copies the incoming context's snapshot back to the exact
//! addresses it was captured from and performs a non-local jump to its
//! checkpoint.
//!
//! The one hazard is that the frame performing a restore could itself sit
//! inside the byte range being written, in which case the copy would corrupt
//! the code doing the copying. Before any restore, the engine therefore
//! forces the call stack clear of the destination: [`resume`] re-enters
//! through [`arch::begin`], which plants the restoring frame
//! [`RESTORE_SLACK`] bytes below the target extent. This bounds the "move
//! deeper" step to a single hop instead of recursing frame by frame until
//! clear, and the restoring trampoline asserts it ended up outside the
//! destination range.
//!
//! [`Snapshot`]: crate::snapshot::Snapshot

use core::hint::black_box;
use core::ptr;

use crate::arch;
use crate::arena::IDLE_INDEX;
use crate::engine::Engine;
use crate::snapshot::StackExtent;

/// Distance below the restore target's `low` bound at which the restoring
/// frame is planted. Needs to cover the trampoline frame plus the copy; the
/// trampoline double-checks with a marker before touching anything.
const RESTORE_SLACK: usize = 512;

/// Which way stack addresses move as calls nest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StackGrowth {
    /// Addresses decrease as calls nest (all supported targets).
    Down,
    /// Addresses increase as calls nest.
    Up,
}

#[inline(never)]
fn probe_frame(outer: usize) -> StackGrowth {
    let inner = 0u8;
    if black_box(ptr::from_ref(&inner) as usize) < outer {
        StackGrowth::Down
    } else {
        StackGrowth::Up
    }
}

/// Determine the stack growth direction by comparing marker addresses in two
/// nested frames. Done once per [`Engine::start`] and used consistently for
/// every extent computation afterwards.
pub(crate) fn probe_growth() -> StackGrowth {
    let outer = 0u8;
    probe_frame(black_box(ptr::from_ref(&outer) as usize))
}

/// Capture the current context's live stack into its snapshot, then hand the
/// stack over to `next`.
///
/// Runs in its own non-inlined frame so that its marker local bounds the live
/// extent *below* the caller's `save` point: everything the resumed context
/// will ever re-execute lies between the marker and `stack_base` and is
/// therefore part of the copy.
///
/// # Safety
///
/// The caller must have just stored a checkpoint for the current context (a
/// [`arch::save`] that returned `0`), and `next` must be a schedulable slot
/// index distinct from the current one.
#[inline(never)]
pub(crate) unsafe fn capture_and_resume(engine: &Engine, next: u32) -> ! {
    let marker = 0u8;
    let marker_addr = black_box(ptr::from_ref(&marker) as usize);
    // Safety: single-threaded engine; the borrow ends before the stack is
    // handed over.
    unsafe {
        let state = engine.state_mut();
        let extent = state.live_extent(marker_addr);
        let current = state.current;
        state.arena.slot_mut(current).snapshot.capture(extent);
    }
    // Safety: the current context is now fully captured; its physical stack
    // bytes may be overwritten.
    unsafe { resume(engine, next) }
}

/// Make `next` the current context and transfer control to it, consuming the
/// physical stack region. Never returns to the caller's frame.
///
/// # Safety
///
/// The previous current context must be either fully captured or finished;
/// nothing on the physical stack below `stack_base` may be live.
pub(crate) unsafe fn resume(engine: &Engine, next: u32) -> ! {
    // Safety: single-threaded engine; the borrow ends before the jump.
    let (entry, sp) = unsafe {
        let state = engine.state_mut();
        state.current = next;
        let base = state.stack_base;
        let slot = state.arena.slot(next);
        if slot.snapshot.is_captured() {
            let extent = slot.snapshot.extent();
            // A context captured against a different (shallower) stack base
            // cannot be put back without clobbering the host's frames. This
            // only trips when a context blocked during one `start` is resumed
            // by a later one; see DESIGN.md.
            assert!(
                extent.high() <= base,
                "context was captured above the current stack base"
            );
            let entry: extern "C" fn(*mut u8) -> ! = restore_current;
            let sp = match state.growth {
                StackGrowth::Down => extent.low() - RESTORE_SLACK,
                StackGrowth::Up => extent.high() + RESTORE_SLACK,
            };
            (entry, sp)
        } else {
            debug_assert!(next != IDLE_INDEX, "idle context resumed before first capture");
            let entry: extern "C" fn(*mut u8) -> ! = context_main;
            (entry, base)
        }
    };
    let arg = ptr::from_ref(engine).cast_mut().cast::<u8>();
    // Safety: `sp` lies within the engine's stack region and below any frame
    // that is still live (fresh contexts start at the base, which only dead
    // captured frames sit under; restores start below the target extent).
    // Both trampolines never return.
    unsafe { arch::begin(arg, entry, sp) }
}

/// First activation of a fresh context. Runs its entry function on a clean
/// extent at the stack base and retires the context when the entry returns.
extern "C" fn context_main(arg: *mut u8) -> ! {
    // Safety: `arg` is the engine pointer smuggled through `resume`; the
    // engine outlives every context it runs.
    let engine = unsafe { &*arg.cast::<Engine>().cast_const() };
    let entry = {
        // Safety: single-threaded engine; the borrow ends before user code.
        let state = unsafe { engine.state_mut() };
        let current = state.current;
        state
            .arena
            .take_entry(current)
            .expect("fresh context scheduled without an entry")
    };
    entry(engine);
    engine.finish_current()
}

/// Restore trampoline: copies the (already current) context's snapshot back
/// onto the physical stack and jumps to its checkpoint. Entered via
/// [`arch::begin`] with the stack pointer already clear of the target extent.
extern "C" fn restore_current(arg: *mut u8) -> ! {
    // Safety: as in `context_main`.
    let engine = unsafe { &*arg.cast::<Engine>().cast_const() };
    // Safety: single-threaded engine; the borrow ends before the copy.
    let (src, extent, checkpoint) = unsafe {
        let state = engine.state_mut();
        let slot = state.arena.slot(state.current);
        (
            slot.snapshot.as_ptr(),
            slot.snapshot.extent(),
            ptr::from_ref(&slot.checkpoint),
        )
    };

    let marker = 0u8;
    debug_assert!(
        !extent.contains(black_box(ptr::from_ref(&marker) as usize)),
        "restoring frame overlaps the restore target"
    );

    // Safety: the destination is the suspended context's own extent, which no
    // live frame occupies (this frame sits RESTORE_SLACK below it); `src`
    // holds exactly `extent.len()` captured bytes; the checkpoint points into
    // the arena (heap) and stays valid across the copy.
    unsafe {
        ptr::copy_nonoverlapping(src, extent.low() as *mut u8, extent.len());
        arch::restore(checkpoint, 1);
    }
}

/// Extent arithmetic shared with the engine: the live region between a marker
/// in the deepest engine frame and the probed stack base.
pub(crate) fn live_extent(growth: StackGrowth, base: usize, marker: usize) -> StackExtent {
    match growth {
        StackGrowth::Down => StackExtent::new(marker, base),
        StackGrowth::Up => StackExtent::new(base, marker),
    }
}
