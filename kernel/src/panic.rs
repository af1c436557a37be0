//! Fatal fault and Rust panic path (spec §6, "Panic path").
//!
//! Both entry points converge on [`halt_with`]: print a header, the
//! faulting frame's registers, and a best-effort stack trace resolved
//! through [`crate::symtab`], then disable interrupts and spin forever.
//! This bypasses [`crate::log`] entirely and writes straight to the
//! serial port, since the logger's own spinlock (or whatever lock a
//! panicking thread already held) may be the reason we are here.

use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

use x86_64::structures::idt::InterruptStackFrame;

use crate::arch::x86_64::serial;
use crate::sync::percpu::this_cpu_id;

/// Set once the first CPU enters the panic path. A second entry (this
/// CPU re-faulting while printing, or another CPU panicking
/// concurrently) skips straight to [`halt_forever`] rather than risking
/// a recursive fault on the serial port itself.
static PANICKING: AtomicBool = AtomicBool::new(false);

/// Invoked by `idt`'s `#DF`/`#MC` handlers and the page-fault path once
/// [`crate::vmm::fault::handle_page_fault`] gives up. Never returns.
pub fn fatal_fault(vec: usize, stack: &InterruptStackFrame) -> ! {
    if PANICKING.swap(true, Ordering::SeqCst) {
        halt_forever();
    }

    let mut w = serial::writer();
    let _ = writeln!(w, "\n---- fatal fault ----");
    print_common_header(&mut w);
    let _ = writeln!(w, "vector: {}", vec);
    let _ = writeln!(w, "rip:    {:#018x}", stack.instruction_pointer.as_u64());
    let _ = writeln!(w, "cs:     {:#06x}", stack.code_segment.0);
    let _ = writeln!(w, "rflags: {:#018x}", stack.cpu_flags);
    let _ = writeln!(w, "rsp:    {:#018x}", stack.stack_pointer.as_u64());
    let _ = writeln!(w, "ss:     {:#06x}", stack.stack_segment.0);
    print_symbol(&mut w, "rip", stack.instruction_pointer.as_u64());
    print_stack_trace(&mut w, stack.stack_pointer.as_u64());
    let _ = writeln!(w, "---- halting ----");

    halt_forever();
}

#[cfg(not(test))]
#[panic_handler]
fn rust_panic(info: &core::panic::PanicInfo) -> ! {
    if PANICKING.swap(true, Ordering::SeqCst) {
        halt_forever();
    }

    let mut w = serial::writer();
    let _ = writeln!(w, "\n---- kernel panic ----");
    print_common_header(&mut w);
    let _ = writeln!(w, "{}", info);
    let _ = writeln!(w, "---- halting ----");

    halt_forever();
}

#[cfg(not(test))]
#[alloc_error_handler]
fn alloc_error(layout: core::alloc::Layout) -> ! {
    if PANICKING.swap(true, Ordering::SeqCst) {
        halt_forever();
    }

    let mut w = serial::writer();
    let _ = writeln!(w, "\n---- allocation failure ----");
    print_common_header(&mut w);
    let _ = writeln!(w, "requested: {} bytes, align {}", layout.size(), layout.align());
    let _ = writeln!(w, "---- halting ----");

    halt_forever();
}

fn print_common_header(w: &mut serial::SerialWriter) {
    let cpu = this_cpu_id();
    let _ = writeln!(w, "version: {}", env!("CARGO_PKG_VERSION"));
    let _ = writeln!(w, "cpu:     {}", cpu);
    match crate::sched::current_task_id_opt() {
        Some(tid) => {
            let name = crate::sched::task::with(tid, |t| t.name.clone());
            let _ = writeln!(w, "task:    {:?} {}", tid, name.as_deref().unwrap_or("<unknown>"));
        }
        None => {
            let _ = writeln!(w, "task:    <none>");
        }
    }
}

fn print_symbol(w: &mut serial::SerialWriter, label: &str, addr: u64) {
    match crate::symtab::lookup_by_addr(addr) {
        Some((name, offset)) => {
            let _ = writeln!(w, "  {} = {}+{:#x}", label, name, offset);
        }
        None => {
            let _ = writeln!(w, "  {} = <unresolved>", label);
        }
    }
}

/// Walk a standard `push rbp; mov rbp, rsp` frame chain starting from
/// the faulting `rsp`, resolving each return address through the
/// symbol table. Best-effort: stops at the first frame that doesn't
/// look like a plausible kernel stack address, a depth cap, or a
/// non-canonical pointer, whichever comes first. Frame-pointer omission
/// in release builds means this can terminate early; that's accepted
/// per spec §6 ("best-effort ... not guaranteed complete").
fn print_stack_trace(w: &mut serial::SerialWriter, rsp: u64) {
    let _ = writeln!(w, "stack trace:");
    let mut rbp = read_rbp();
    let mut depth = 0;
    const MAX_DEPTH: usize = 32;
    while depth < MAX_DEPTH {
        if rbp == 0 || rbp < rsp || rbp % 8 != 0 {
            break;
        }
        let ret_addr = unsafe { core::ptr::read_volatile((rbp + 8) as *const u64) };
        if ret_addr == 0 {
            break;
        }
        let _ = write!(w, "  #{}: {:#018x}", depth, ret_addr);
        match crate::symtab::lookup_by_addr(ret_addr) {
            Some((name, offset)) => {
                let _ = writeln!(w, " {}+{:#x}", name, offset);
            }
            None => {
                let _ = writeln!(w);
            }
        }
        let next_rbp = unsafe { core::ptr::read_volatile(rbp as *const u64) };
        if next_rbp <= rbp {
            break;
        }
        rbp = next_rbp;
        depth += 1;
    }
}

#[cfg(not(test))]
fn read_rbp() -> u64 {
    let rbp: u64;
    unsafe {
        core::arch::asm!("mov {}, rbp", out(reg) rbp, options(nomem, nostack, preserves_flags));
    }
    rbp
}

#[cfg(test)]
fn read_rbp() -> u64 {
    0
}

fn halt_forever() -> ! {
    loop {
        #[cfg(not(test))]
        {
            x86_64::instructions::interrupts::disable();
            x86_64::instructions::hlt();
        }
        #[cfg(test)]
        {
            // Host unit tests never reach this in a loop that doesn't
            // return; nothing calls `halt_forever` under `#[test]`.
            unreachable!("halt_forever is not exercised by host tests");
        }
    }
}
