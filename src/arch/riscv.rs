//! riscv64 (LP64D) checkpoint primitives.

use core::arch::{asm, naked_asm};
use core::mem::offset_of;
use static_assertions::const_assert_eq;

/// Saved execution point of a suspended context.
///
/// `s0`-`s11`, return address, stack pointer and `fs0`-`fs11`.
#[repr(C)]
#[derive(Clone, Debug)]
pub(crate) struct Checkpoint {
    s: [u64; 12],
    /// Return address; the resume point of the `save` call.
    ra: u64,
    sp: u64,
    fs: [u64; 12],
}

const_assert_eq!(offset_of!(Checkpoint, ra), 0x60);
const_assert_eq!(offset_of!(Checkpoint, sp), 0x68);
const_assert_eq!(offset_of!(Checkpoint, fs), 0x70);
const_assert_eq!(size_of::<Checkpoint>(), 208);

impl Checkpoint {
    pub(crate) const fn new() -> Self {
        Self {
            s: [0; 12],
            ra: 0,
            sp: 0,
            fs: [0; 12],
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
        "sd s0, 0x00(a0)",
        "sd s1, 0x08(a0)",
        "sd s2, 0x10(a0)",
        "sd s3, 0x18(a0)",
        "sd s4, 0x20(a0)",
        "sd s5, 0x28(a0)",
        "sd s6, 0x30(a0)",
        "sd s7, 0x38(a0)",
        "sd s8, 0x40(a0)",
        "sd s9, 0x48(a0)",
        "sd s10, 0x50(a0)",
        "sd s11, 0x58(a0)",
        "sd ra, 0x60(a0)",
        "sd sp, 0x68(a0)",
        "fsd fs0, 0x70(a0)",
        "fsd fs1, 0x78(a0)",
        "fsd fs2, 0x80(a0)",
        "fsd fs3, 0x88(a0)",
        "fsd fs4, 0x90(a0)",
        "fsd fs5, 0x98(a0)",
        "fsd fs6, 0xA0(a0)",
        "fsd fs7, 0xA8(a0)",
        "fsd fs8, 0xB0(a0)",
        "fsd fs9, 0xB8(a0)",
        "fsd fs10, 0xC0(a0)",
        "fsd fs11, 0xC8(a0)",
        "li a0, 0",
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
        "ld s0, 0x00(a0)",
        "ld s1, 0x08(a0)",
        "ld s2, 0x10(a0)",
        "ld s3, 0x18(a0)",
        "ld s4, 0x20(a0)",
        "ld s5, 0x28(a0)",
        "ld s6, 0x30(a0)",
        "ld s7, 0x38(a0)",
        "ld s8, 0x40(a0)",
        "ld s9, 0x48(a0)",
        "ld s10, 0x50(a0)",
        "ld s11, 0x58(a0)",
        "ld ra, 0x60(a0)",
        "ld sp, 0x68(a0)",
        "fld fs0, 0x70(a0)",
        "fld fs1, 0x78(a0)",
        "fld fs2, 0x80(a0)",
        "fld fs3, 0x88(a0)",
        "fld fs4, 0x90(a0)",
        "fld fs5, 0x98(a0)",
        "fld fs6, 0xA0(a0)",
        "fld fs7, 0xA8(a0)",
        "fld fs8, 0xB0(a0)",
        "fld fs9, 0xB8(a0)",
        "fld fs10, 0xC0(a0)",
        "fld fs11, 0xC8(a0)",
        "bnez a1, 2f",
        "li a1, 1",
        "2:",
        "mv a0, a1",
        // Returns through the restored `ra`, re-emerging from `save`.
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
        "andi sp, a2, -16",
        "mv s0, zero",
        "mv ra, zero",
        "jr a1",
    );
}

/// Current stack pointer value.
#[inline(always)]
pub(crate) fn stack_pointer() -> usize {
    let sp: usize;
    // Safety: reads a register, no memory or flags touched.
    unsafe {
        asm!("mv {}, sp", out(reg) sp, options(nomem, nostack, preserves_flags));
    }
    sp
}
