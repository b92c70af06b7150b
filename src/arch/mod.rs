//! Per-architecture checkpoint primitives.
//!
//! Each backend provides:
//! - [`Checkpoint`]: the callee-saved register file plus stack pointer and
//!   resume address of a suspended context.
//! - [`save`]: setjmp-like capture of the calling context. Returns `0` on the
//!   direct path and the non-zero value handed to [`restore`] when the
//!   checkpoint is resumed.
//! - [`restore`]: longjmp-like non-local transfer to a saved checkpoint.
//! - [`begin`]: resets the stack pointer to a caller-chosen position and
//!   tail-calls an entry trampoline that must never return.
//! - [`stack_pointer`]: the current stack pointer value.
//!
//! All supported targets grow their stacks downwards; the engine relies on
//! that when computing live extents and when placing fresh frames.

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "x86_64", not(windows)))] {
        mod x86_64;
        pub(crate) use x86_64::*;
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        pub(crate) use aarch64::*;
    } else if #[cfg(target_arch = "riscv64")] {
        mod riscv;
        pub(crate) use riscv::*;
    } else {
        compile_error!("Unsupported target architecture");
    }
}
