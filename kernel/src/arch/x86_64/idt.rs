//! Interrupt Descriptor Table: the 32 architectural exception vectors,
//! each routed onto a dedicated IST stack where a stack-overflow fault
//! would otherwise recurse into its own guard page (see [`gdt::IstSlot`]).
//!
//! Fault handlers log and, for the vectors that cannot be recovered from
//! (`#DF`, `#MC`), hand off to [`crate::panic`]. Device IRQs (timer, IPI,
//! APIC) are out of scope here; they are installed by the APIC driver
//! once it exists and share this same table starting at vector 32.

use core::sync::atomic::{AtomicU64, Ordering};

use lazy_static::lazy_static;
use log::{error, warn};
use spin::Once;
use x86_64::registers::control::Cr2;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use crate::arch::x86_64::gdt::IstSlot;
use crate::sync::percpu::{PerCpu, MAX_CPUS};
use crate::sync::preempt;

const IST_POLICY: [Option<u16>; 32] = {
    let mut arr: [Option<u16>; 32] = [None; 32];
    arr[2] = Some(IstSlot::Nmi as u16);
    arr[8] = Some(IstSlot::Df as u16);
    arr[12] = Some(IstSlot::Ss as u16);
    arr[13] = Some(IstSlot::Gp as u16);
    arr[14] = Some(IstSlot::Pf as u16);
    arr[18] = Some(IstSlot::Mc as u16);
    arr
};

const ZERO_COUNTS: [AtomicU64; 32] = {
    const ZERO: AtomicU64 = AtomicU64::new(0);
    [ZERO; 32]
};
static FAULT_COUNTS: PerCpu<[AtomicU64; 32]> = PerCpu::from_array([ZERO_COUNTS; MAX_CPUS]);

static CPU0_LOADED: Once<()> = Once::new();

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();

        idt.divide_error.set_handler_fn(divide_error);
        idt.debug.set_handler_fn(debug_handler);
        idt.non_maskable_interrupt.set_handler_fn(nmi_handler);
        idt.breakpoint.set_handler_fn(bp_handler);
        idt.overflow.set_handler_fn(of_handler);
        idt.bound_range_exceeded.set_handler_fn(br_handler);
        idt.invalid_opcode.set_handler_fn(ud_handler);
        idt.device_not_available.set_handler_fn(dna_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(df_handler)
                .set_stack_index(IstSlot::Df as u16);
        }
        idt.invalid_tss.set_handler_fn(ts_handler);
        idt.segment_not_present.set_handler_fn(snp_handler);
        idt.stack_segment_fault.set_handler_fn(ss_handler);
        idt.general_protection_fault.set_handler_fn(gp_handler);
        idt.page_fault.set_handler_fn(pf_handler);
        idt.x87_floating_point.set_handler_fn(x87_handler);
        idt.alignment_check.set_handler_fn(ac_handler);
        idt.machine_check.set_handler_fn(mc_handler);
        idt.simd_floating_point.set_handler_fn(simd_handler);
        idt.virtualization.set_handler_fn(virt_handler);
        idt.security_exception.set_handler_fn(se_handler);

        unsafe {
            for vec in 0..32usize {
                if let Some(ist) = IST_POLICY[vec] {
                    idt[vec].set_stack_index(ist);
                }
            }
        }

        idt
    };
}

/// Load the IDT onto the calling CPU. `cpu_id` 0 (the BSP) is the only
/// CPU with IST stacks backing it today; APs share the same vector
/// table (no IST redirection) until per-AP TSS allocation is added.
pub fn init(cpu_id: usize) {
    IDT.load();
    if cpu_id == 0 {
        CPU0_LOADED.call_once(|| ());
    }
    log::info!("idt: loaded on cpu {}", cpu_id);
}

macro_rules! simple_handler {
    ($name:ident, $vec:expr) => {
        extern "x86-interrupt" fn $name(stack: InterruptStackFrame) {
            on_fault($vec, &stack, None);
        }
    };
}

simple_handler!(divide_error, 0);
simple_handler!(debug_handler, 1);
simple_handler!(nmi_handler, 2);
simple_handler!(bp_handler, 3);
simple_handler!(of_handler, 4);
simple_handler!(br_handler, 5);
simple_handler!(ud_handler, 6);
simple_handler!(dna_handler, 7);
simple_handler!(x87_handler, 16);
simple_handler!(simd_handler, 19);
simple_handler!(virt_handler, 20);

extern "x86-interrupt" fn ts_handler(stack: InterruptStackFrame, code: u64) {
    on_fault(10, &stack, Some(code));
}

extern "x86-interrupt" fn snp_handler(stack: InterruptStackFrame, code: u64) {
    on_fault(11, &stack, Some(code));
}

extern "x86-interrupt" fn ss_handler(stack: InterruptStackFrame, code: u64) {
    on_fault(12, &stack, Some(code));
}

extern "x86-interrupt" fn gp_handler(stack: InterruptStackFrame, code: u64) {
    on_fault(13, &stack, Some(code));
}

extern "x86-interrupt" fn ac_handler(stack: InterruptStackFrame, code: u64) {
    on_fault(17, &stack, Some(code));
}

extern "x86-interrupt" fn se_handler(stack: InterruptStackFrame, code: u64) {
    on_fault(30, &stack, Some(code));
}

extern "x86-interrupt" fn pf_handler(stack: InterruptStackFrame, code: PageFaultErrorCode) {
    let addr = Cr2::read();
    if !crate::vmm::fault::handle_page_fault(addr, code) {
        error!(
            "pf: unhandled fault at {:?} err={:?} rip={:#x}",
            addr,
            code,
            stack.instruction_pointer.as_u64()
        );
        on_fault(14, &stack, Some(code.bits() as u64));
        crate::panic::fatal_fault(14, &stack);
    }
}

extern "x86-interrupt" fn df_handler(stack: InterruptStackFrame, code: u64) -> ! {
    on_fault(8, &stack, Some(code));
    crate::panic::fatal_fault(8, &stack)
}

extern "x86-interrupt" fn mc_handler(stack: InterruptStackFrame) -> ! {
    on_fault(18, &stack, None);
    crate::panic::fatal_fault(18, &stack)
}

fn on_fault(vec: usize, stack: &InterruptStackFrame, code: Option<u64>) {
    preempt::enter_hardirq();
    FAULT_COUNTS.this_cpu()[vec].fetch_add(1, Ordering::Relaxed);
    warn!(
        "fault: vec={} rip={:#x} cs={:#x} rflags={:#x} code={:?}",
        vec,
        stack.instruction_pointer.as_u64(),
        stack.code_segment.0,
        stack.cpu_flags,
        code
    );
    preempt::exit_hardirq();
}

/// Number of times vector `vec` has faulted on this CPU, for diagnostics.
pub fn fault_count(vec: usize) -> u64 {
    FAULT_COUNTS.this_cpu()[vec].load(Ordering::Relaxed)
}
