//! The coroutine engine: lifecycle and scheduling.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ptr;

use crate::arch;
use crate::arena::{Arena, Handle, IDLE_INDEX, ListId, Status};
use crate::error::Error;
use crate::snapshot::StackExtent;
use crate::switch::{self, StackGrowth};

/// A single-threaded, cooperative, stackful coroutine engine.
///
/// Contexts created with [`create`] share the one physical stack below the
/// point where [`start`] was called; each keeps a private heap snapshot of
/// its live stack bytes while suspended. Control moves between contexts only
/// at explicit [`yield_now`], [`sched`] and [`block`] points; a context that
/// never calls one of these runs to completion uninterrupted.
///
/// The engine is strictly single-threaded: it is neither `Send` nor `Sync`,
/// and several engines can coexist independently on different threads (or on
/// the same one, nested).
///
/// ```compile_fail
/// fn send<T: Send>() {}
/// send::<strand::Engine>();
/// ```
///
/// # Example
///
/// ```
/// let engine = strand::Engine::new();
/// engine
///     .start(|engine| {
///         engine.create(|engine| {
///             engine.yield_now();
///         });
///         engine.yield_now();
///     })
///     .unwrap();
/// ```
///
/// [`create`]: Engine::create
/// [`start`]: Engine::start
/// [`yield_now`]: Engine::yield_now
/// [`sched`]: Engine::sched
/// [`block`]: Engine::block
pub struct Engine {
    state: UnsafeCell<EngineState>,
    /// Engine must be !Send.
    _marker: PhantomData<*mut ()>,
}

pub(crate) struct EngineState {
    pub(crate) arena: Arena,
    pub(crate) current: u32,
    pub(crate) stack_base: usize,
    pub(crate) growth: StackGrowth,
    pub(crate) running: bool,
}

impl EngineState {
    /// Live extent of the current context, bounded by `marker` (a local in
    /// the deepest engine frame) and the probed stack base.
    pub(crate) fn live_extent(&self, marker: usize) -> StackExtent {
        switch::live_extent(self.growth, self.stack_base, marker)
    }

    /// Round robin: the next alive context after `current`, scanning forward
    /// through the list links, wrapping to the head and skipping `current`
    /// itself. `None` when no other alive context exists.
    fn next_alive_after(&self, current: u32) -> Option<u32> {
        let head = self.arena.head(ListId::Alive)?;
        if current == IDLE_INDEX || self.arena.status_of(current) != Status::Alive {
            return Some(head);
        }
        let candidate = self.arena.next_of(current).unwrap_or(head);
        (candidate != current).then_some(candidate)
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            state: UnsafeCell::new(EngineState {
                arena: Arena::new(),
                current: IDLE_INDEX,
                stack_base: 0,
                growth: StackGrowth::Down,
                running: false,
            }),
            _marker: PhantomData,
        }
    }

    /// Exclusive access to the scheduling state.
    ///
    /// # Safety
    ///
    /// The engine is single-threaded, so no two borrows can be produced
    /// concurrently; the caller must not let the returned borrow live across
    /// a context switch or a call into user code.
    pub(crate) unsafe fn state_mut(&self) -> &mut EngineState {
        // Safety: per the function contract.
        unsafe { &mut *self.state.get() }
    }

    /// Create a new context running `entry` when first scheduled.
    ///
    /// The context is prepended to the alive list; the currently running
    /// context is unaffected. Contexts may be created before [`Engine::start`]
    /// or from within any running context.
    pub fn create<F>(&self, entry: F) -> Handle
    where
        F: FnOnce(&Engine) + 'static,
    {
        // Safety: borrow confined to this block.
        let handle = unsafe {
            let state = self.state_mut();
            state.arena.insert(alloc::boxed::Box::new(entry))
        };
        tracing::trace!(ctx = handle.index(), "created context");
        handle
    }

    /// Run the engine until nothing is left to schedule.
    ///
    /// Establishes the caller's own stack as the idle context, creates `main`
    /// as the first scheduled unit of work and round-robins the alive list
    /// until it drains. Contexts still blocked when the alive list empties
    /// stay blocked; their resources are released when the engine is dropped.
    ///
    /// This is the sole entry/exit boundary between host code and the engine.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyRunning`] if called from within a running context of
    /// this engine.
    pub fn start<F>(&self, main: F) -> Result<(), Error>
    where
        F: FnOnce(&Engine) + 'static,
    {
        // Safety: borrow confined to this block.
        unsafe {
            let state = self.state_mut();
            if state.running {
                return Err(Error::AlreadyRunning);
            }
            state.running = true;
            state.growth = switch::probe_growth();
        }
        let main = self.create(main);
        tracing::trace!(main = main.index(), "engine started");
        self.enter();
        // Safety: borrow confined to this block.
        unsafe {
            self.state_mut().running = false;
        }
        tracing::trace!("engine drained");
        Ok(())
    }

    /// The idle loop. Kept out of line so that the probed stack base bounds
    /// every frame the engine or its contexts will ever occupy: everything at
    /// or above `base` belongs to the host and is never captured or
    /// overwritten.
    #[inline(never)]
    fn enter(&self) {
        let base = arch::stack_pointer();
        // Safety: borrow confined to this block.
        unsafe {
            let state = self.state_mut();
            state.stack_base = base;
            state.current = IDLE_INDEX;
        }
        loop {
            // Safety: borrow confined to this statement.
            let next = unsafe { self.state_mut().arena.head(ListId::Alive) };
            match next {
                Some(next) => self.switch_to(next),
                None => break,
            }
        }
    }

    /// Yield to the next alive context in round-robin order.
    ///
    /// A no-op when the caller is the only alive context (control never
    /// leaves it) or when the engine is not running.
    pub fn yield_now(&self) {
        // Safety: borrow confined to this block.
        let next = unsafe {
            let state = self.state_mut();
            if !state.running {
                return;
            }
            state.next_alive_after(state.current)
        };
        let Some(next) = next else { return };
        tracing::trace!(to = next, "yield");
        self.switch_to(next);
    }

    /// Switch to a specific context unconditionally.
    ///
    /// Used for targeted hand-off, e.g. resuming a context just unblocked.
    /// No-op if `target` is the current context, is blocked or finished, or
    /// the handle is stale. The idle handle is a valid target and returns
    /// control to the idle loop.
    pub fn sched(&self, target: Handle) {
        // Safety: borrow confined to this block.
        let next = unsafe {
            let state = self.state_mut();
            if !state.running {
                return;
            }
            let Some(index) = state.arena.lookup(target) else {
                return;
            };
            if index == state.current {
                return;
            }
            match state.arena.status_of(index) {
                Status::Alive | Status::Idle => index,
                Status::Blocked | Status::Finished => return,
            }
        };
        tracing::trace!(to = next, "sched");
        self.switch_to(next);
    }

    /// Move a context from the alive to the blocked list.
    ///
    /// `None` blocks the caller itself, which then hands control to the idle
    /// context (it can no longer resume itself). Blocking another context
    /// only changes its list membership. No-ops: stale or finished handles,
    /// already-blocked contexts, the idle context, an engine that is not
    /// running.
    pub fn block(&self, target: Option<Handle>) {
        // Safety: borrow confined to this block.
        let (index, is_self) = unsafe {
            let state = self.state_mut();
            if !state.running {
                return;
            }
            let index = match target {
                Some(handle) => match state.arena.lookup(handle) {
                    Some(index) => index,
                    None => return,
                },
                None => state.current,
            };
            if index == IDLE_INDEX || state.arena.status_of(index) != Status::Alive {
                return;
            }
            state.arena.unlink(index);
            state.arena.push_front(ListId::Blocked, index);
            (index, index == state.current)
        };
        tracing::trace!(ctx = index, is_self, "blocked");
        if is_self {
            self.switch_to(IDLE_INDEX);
        }
    }

    /// Move a context from the blocked back to the alive list.
    ///
    /// Does not transfer control: the context becomes eligible for a future
    /// [`Engine::yield_now`]/[`Engine::sched`]. No-op for handles that are
    /// stale, finished or not blocked, and for an engine that is not running.
    pub fn unblock(&self, target: Handle) {
        // Safety: borrow confined to this block.
        let index = unsafe {
            let state = self.state_mut();
            if !state.running {
                return;
            }
            let Some(index) = state.arena.lookup(target) else {
                return;
            };
            if state.arena.status_of(index) != Status::Blocked {
                return;
            }
            state.arena.unlink(index);
            state.arena.push_front(ListId::Alive, index);
            index
        };
        tracing::trace!(ctx = index, "unblocked");
    }

    /// Externally observable state of a handle. Stale handles report
    /// [`Status::Finished`].
    pub fn status(&self, handle: Handle) -> Status {
        // Safety: borrow confined to this block.
        unsafe {
            let state = self.state_mut();
            match state.arena.lookup(handle) {
                Some(index) => state.arena.status_of(index),
                None => Status::Finished,
            }
        }
    }

    /// Handle of the currently running context; the idle handle when control
    /// is with the host.
    pub fn current(&self) -> Handle {
        // Safety: borrow confined to this block.
        unsafe {
            let state = self.state_mut();
            state.arena.handle_of(state.current)
        }
    }

    /// The idle sentinel: always valid, never alive or blocked.
    pub fn idle(&self) -> Handle {
        Handle::idle()
    }

    /// Number of contexts currently in the alive list.
    pub fn alive_count(&self) -> usize {
        // Safety: borrow confined to this block.
        unsafe { self.state_mut().arena.len(ListId::Alive) }
    }

    /// Number of contexts currently in the blocked list.
    pub fn blocked_count(&self) -> usize {
        // Safety: borrow confined to this block.
        unsafe { self.state_mut().arena.len(ListId::Blocked) }
    }

    /// Suspend the current context and transfer control to `next`.
    ///
    /// Returns (much later) when some other context switches back here.
    fn switch_to(&self, next: u32) {
        // Safety: borrow confined to this statement; the pointer stays valid
        // because the arena is not touched between here and the capture.
        let checkpoint = unsafe {
            let state = self.state_mut();
            debug_assert_ne!(state.current, next);
            ptr::from_mut(&mut state.arena.slot_mut(state.current).checkpoint)
        };
        // Safety: `checkpoint` points at the current context's slot.
        let resumed = unsafe { arch::save(checkpoint) };
        if resumed == 0 {
            // Safety: the checkpoint for the current context was just saved;
            // `next` was validated by the caller.
            unsafe { switch::capture_and_resume(self, next) }
        }
        // Non-zero: the checkpoint was restored and this context is current
        // again, with its stack bytes back in place.
    }

    /// Retire the current context after its entry returned, then schedule the
    /// next alive context or fall back to the idle loop.
    pub(crate) fn finish_current(&self) -> ! {
        // Safety: borrow confined to this block.
        let next = unsafe {
            let state = self.state_mut();
            let current = state.current;
            debug_assert_ne!(current, IDLE_INDEX);
            state.arena.release(current);
            tracing::trace!(ctx = current, "context finished");
            state.arena.head(ListId::Alive).unwrap_or(IDLE_INDEX)
        };
        // Safety: the finished context has no live frames worth preserving;
        // the physical stack is free for `next`.
        unsafe { switch::resume(self, next) }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
