//! AArch64 (AAPCS64) checkpoint primitives.

use core::arch::{asm, naked_asm};
use core::mem::offset_of;
use static_assertions::const_assert_eq;

/// Saved execution point of a suspended context.
///
/// `x19`-`x28`, the frame pointer, link register, stack pointer and the
/// callee-saved low halves of `v8`-`v15`.
#[repr(C)]
#[derive(Clone, Debug)]
pub(crate) struct Checkpoint {
    x: [u64; 10],
    fp: u64,
    /// Link register; the resume point of the `save` call.
    lr: u64,
    sp: u64,
    d: [u64; 8],
}

const_assert_eq!(offset_of!(Checkpoint, fp), 0x50);
const_assert_eq!(offset_of!(Checkpoint, lr), 0x58);
const_assert_eq!(offset_of!(Checkpoint, sp), 0x60);
const_assert_eq!(offset_of!(Checkpoint, d), 0x68);
const_assert_eq!(size_of::<Checkpoint>(), 168);

impl Checkpoint {
    pub(crate) const fn new() -> Self {
        Self {
            x: [0; 10],
            fp: 0,
            lr: 0,
            sp: 0,
            d: [0; 8],
        }
    }
}

/// Capture the calling context into `checkpoint`.
///
/// Returns `0` on the direct path and the non-zero value passed to
/// [`restore`] when the checkpoint is resumed.
///
/// # Safety
///
/// See the x86_64 twin: `checkpoint` must be valid for writes and resuming is
/// only sound once the captured stack bytes are back in place.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn save(_checkpoint: *mut Checkpoint) -> usize {
    naked_asm!(
        "stp x19, x20, [x0, #0x00]",
        "stp x21, x22, [x0, #0x10]",
        "stp x23, x24, [x0, #0x20]",
        "stp x25, x26, [x0, #0x30]",
        "stp x27, x28, [x0, #0x40]",
        "stp x29, x30, [x0, #0x50]",
        "mov x9, sp",
        "str x9, [x0, #0x60]",
        "stp d8, d9, [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        "mov x0, xzr",
        "ret",
    );
}

/// Transfer control to a checkpoint previously filled by [`save`].
///
/// # Safety
///
/// Same contract as the x86_64 twin.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn restore(_checkpoint: *const Checkpoint, _value: usize) -> ! {
    naked_asm!(
        "ldp x19, x20, [x0, #0x00]",
        "ldp x21, x22, [x0, #0x10]",
        "ldp x23, x24, [x0, #0x20]",
        "ldp x25, x26, [x0, #0x30]",
        "ldp x27, x28, [x0, #0x40]",
        "ldp x29, x30, [x0, #0x50]",
        "ldr x9, [x0, #0x60]",
        "mov sp, x9",
        "ldp d8, d9, [x0, #0x68]",
        "ldp d10, d11, [x0, #0x78]",
        "ldp d12, d13, [x0, #0x88]",
        "ldp d14, d15, [x0, #0x98]",
        // x0 = value, forced to 1 when 0 was passed.
        "cmp x1, #0",
        "csinc x0, x1, xzr, ne",
        // Returns through the restored link register, re-emerging from `save`.
        "ret",
    );
}

/// Reset the stack pointer to `sp` and call `entry` with `arg`.
///
/// # Safety
///
/// Same contract as the x86_64 twin.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn begin(
    _arg: *mut u8,
    _entry: extern "C" fn(*mut u8) -> !,
    _sp: usize,
) -> ! {
    naked_asm!(
        "and x9, x2, #0xfffffffffffffff0",
        "mov sp, x9",
        "mov x29, xzr",
        "mov x30, xzr",
        "br x1",
    );
}

/// Current stack pointer value.
#[inline(always)]
pub(crate) fn stack_pointer() -> usize {
    let sp: usize;
    // Safety: reads a register, no memory or flags touched.
    unsafe {
        asm!("mov {}, sp", out(reg) sp, options(nomem, nostack, preserves_flags));
    }
    sp
}
