//! GDT and TSS bring-up.
//!
//! Installs a flat kernel code/data segment pair plus a TSS whose
//! Interrupt Stack Table gives each fault class in [`IstSlot`] its own
//! stack, so a double fault (or any fault that hits a kernel stack
//! already overflowing its guard page) runs on a known-good stack
//! instead of re-faulting into the guard page.

use lazy_static::lazy_static;
use log::info;
use x86_64::instructions::segmentation::{Segment, CS, SS};
use x86_64::instructions::tables::load_tss;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

/// IST slots, indexed into `tss.interrupt_stack_table`. Order matches
/// the faults [`crate::arch::x86_64::idt`] routes onto a dedicated stack.
#[derive(Clone, Copy)]
#[repr(u16)]
pub enum IstSlot {
    Df = 0,
    Nmi = 1,
    Gp = 2,
    Pf = 3,
    Ss = 4,
    Mc = 5,
}

const NR_IST_SLOTS: usize = 6;
const IST_STACK_SIZE: usize = 4096 * 5;

static mut IST_STACKS: [[u8; IST_STACK_SIZE]; NR_IST_SLOTS] = [[0; IST_STACK_SIZE]; NR_IST_SLOTS];

lazy_static! {
    static ref TSS: TaskStateSegment = {
        let mut tss = TaskStateSegment::new();
        for slot in 0..NR_IST_SLOTS {
            let stack_start = VirtAddr::from_ptr(unsafe { &IST_STACKS[slot] });
            tss.interrupt_stack_table[slot] = stack_start + IST_STACK_SIZE as u64;
        }
        tss
    };

    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let code_selector = gdt.add_entry(Descriptor::kernel_code_segment());
        let data_selector = gdt.add_entry(Descriptor::kernel_data_segment());
        let tss_selector = gdt.add_entry(Descriptor::tss_segment(&TSS));
        (
            gdt,
            Selectors {
                code_selector,
                data_selector,
                tss_selector,
            },
        )
    };
}

struct Selectors {
    code_selector: SegmentSelector,
    data_selector: SegmentSelector,
    tss_selector: SegmentSelector,
}

/// Load the GDT, reload CS/SS, and install the TSS. Must run once on
/// each CPU before that CPU's IDT is loaded (IST slots referenced by
/// the IDT are only valid once the TSS backing them is live).
pub fn init() {
    GDT.0.load();
    unsafe {
        CS::set_reg(GDT.1.code_selector);
        SS::set_reg(GDT.1.data_selector);
        load_tss(GDT.1.tss_selector);
    }
    info!("gdt: loaded kernel CS/SS and TSS with {} IST stacks", NR_IST_SLOTS);
}
