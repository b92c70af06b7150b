//! Single-threaded, cooperative, stackful coroutines on a shared stack.
//!
//! This crate provides the [`Engine`]: a user-level scheduler that lets many
//! independent logical execution contexts share one OS thread, each with its
//! own private stack snapshot, switching between them only at explicit
//! yield/block points.
//!
//! Unlike fiber libraries that give every coroutine its own stack allocation,
//! all contexts here execute on the *same* physical stack region below the
//! [`Engine::start`] call. Suspending a context copies its live stack bytes
//! into a per-context heap buffer; resuming copies them back to the exact
//! addresses they were captured from and jumps to the saved checkpoint. The
//! raw register save/restore and the stack-byte shuffling are confined to the
//! `arch` and `switch` modules, which are the only unsafe regions in the
//! crate.
//!
//! Scheduling is plain round robin over an intrusive *alive* list, with a
//! second *blocked* list for contexts waiting on an external event. A
//! connection handler short on data calls [`Engine::block`] on itself and
//! hands control away; an external readiness notifier calls
//! [`Engine::unblock`] with its handle to make it schedulable again. There is
//! no preemption and no locking: exactly one context is ever current.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod arch;
mod arena;
mod engine;
mod error;
mod snapshot;
mod switch;

pub use crate::arena::{Handle, Status};
pub use crate::engine::Engine;
pub use crate::error::Error;
