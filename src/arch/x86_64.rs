//! x86_64 (System V ABI) checkpoint primitives.

use core::arch::{asm, naked_asm};
use core::mem::offset_of;
use static_assertions::const_assert_eq;

/// Saved execution point of a suspended context.
///
/// Holds the System V callee-saved registers plus the stack pointer and the
/// resume address. Caller-saved registers do not need to be preserved here:
/// the compiler treats [`save`] as an ordinary call and spills anything live
/// across it onto the stack, which the engine snapshots separately.
#[repr(C)]
#[derive(Clone, Debug)]
pub(crate) struct Checkpoint {
    rbx: u64,
    rbp: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    /// Stack pointer as seen by the caller after `save` returns.
    rsp: u64,
    /// Return address of the `save` call, i.e. the resume point.
    rip: u64,
}

const_assert_eq!(offset_of!(Checkpoint, rsp), 0x30);
const_assert_eq!(offset_of!(Checkpoint, rip), 0x38);
const_assert_eq!(size_of::<Checkpoint>(), 64);

impl Checkpoint {
    pub(crate) const fn new() -> Self {
        Self {
            rbx: 0,
            rbp: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rsp: 0,
            rip: 0,
        }
    }
}

/// Capture the calling context into `checkpoint`.
///
/// Returns `0` on the direct path. When a later [`restore`] targets the same
/// checkpoint, control re-emerges from this call a second time with the
/// non-zero value passed to `restore`.
///
/// # Safety
///
/// `checkpoint` must be valid for writes. Resuming the checkpoint is only
/// sound while the stack bytes between the saved stack pointer and the
/// engine's stack base have been restored to their captured contents.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn save(_checkpoint: *mut Checkpoint) -> usize {
    naked_asm!(
        // Callee-saved registers into the checkpoint (rdi).
        "mov [rdi + 0x00], rbx",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], r12",
        "mov [rdi + 0x18], r13",
        "mov [rdi + 0x20], r14",
        "mov [rdi + 0x28], r15",
        // The caller's stack pointer after this call returns.
        "lea rax, [rsp + 8]",
        "mov [rdi + 0x30], rax",
        // The return address doubles as the resume point.
        "mov rax, [rsp]",
        "mov [rdi + 0x38], rax",
        "xor eax, eax",
        "ret",
    );
}

/// Transfer control to a checkpoint previously filled by [`save`].
///
/// `value` becomes the return value of the original `save` call; it is forced
/// to `1` if `0` is passed, mirroring `longjmp`.
///
/// # Safety
///
/// The checkpoint must have been filled by [`save`], and the stack region it
/// refers to must hold the exact bytes it held at capture time.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn restore(_checkpoint: *const Checkpoint, _value: usize) -> ! {
    naked_asm!(
        "mov rbx, [rdi + 0x00]",
        "mov rbp, [rdi + 0x08]",
        "mov r12, [rdi + 0x10]",
        "mov r13, [rdi + 0x18]",
        "mov r14, [rdi + 0x20]",
        "mov r15, [rdi + 0x28]",
        "mov rsp, [rdi + 0x30]",
        "mov rax, rsi",
        "test rax, rax",
        "jnz 2f",
        "mov eax, 1",
        "2:",
        // Jump to the resume address as if `save` had just returned.
        "jmp qword ptr [rdi + 0x38]",
    );
}

/// Reset the stack pointer to `sp` (aligned down to 16 bytes) and call
/// `entry` with `arg`.
///
/// # Safety
///
/// `sp` must point into stack memory that no live frame still relies on, with
/// enough room below it for `entry` to execute. `entry` must never return.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn begin(
    _arg: *mut u8,
    _entry: extern "C" fn(*mut u8) -> !,
    _sp: usize,
) -> ! {
    naked_asm!(
        "mov rsp, rdx",
        "and rsp, -16",
        "xor ebp, ebp",
        // CALL keeps the ABI-mandated entry alignment (rsp % 16 == 8) and
        // leaves a trapping return address should `entry` ever return.
        "call rsi",
        "ud2",
    );
}

/// Current stack pointer value.
#[inline(always)]
pub(crate) fn stack_pointer() -> usize {
    let sp: usize;
    // Safety: reads a register, no memory or flags touched.
    unsafe {
        asm!("mov {}, rsp", out(reg) sp, options(nomem, nostack, preserves_flags));
    }
    sp
}
