//! Boot sequencing (spec §6, "Boot interface"): everything between the
//! bootloader's jump into this kernel and the first `schedule()` call.
//!
//! Grounded on the teacher's own staged bring-up (GDT/IDT before
//! anything that can fault, heap before anything that allocates, then
//! subsystem init in dependency order); this crate's version swaps the
//! teacher's capability/runtime bring-up for this spec's five
//! components, in the dependency order §4 implies: symbol table before
//! the module linker (modules resolve against it), VMM before the
//! scheduler (task creation does not itself allocate an address space,
//! but the idle tasks' stacks come from the same physical allocator).

pub mod bootinfo;

pub use bootinfo::{BootInfo, MemoryRegion, MemoryRegionType};

use crate::sched::class::SchedClassKind;
use crate::sched::task::TaskId;
use crate::symtab::static_table::StaticSymbol;

/// Build the handful of entry points the source's linker-section symbol
/// table would export by construction; the rest of the kernel's symbols
/// reach [`crate::symtab`] dynamically (module exports via
/// [`crate::fkx`]'s finalize step). A function pointer's address is not
/// available during const evaluation, so this table is assembled here
/// at boot and leaked to `'static` rather than declared as a `static`
/// array literal.
fn static_exports() -> &'static [StaticSymbol] {
    let table = [
        StaticSymbol { addr: entry as usize as u64, name: "boot::entry" },
        StaticSymbol { addr: crate::sched::schedule as usize as u64, name: "sched::schedule" },
        StaticSymbol { addr: crate::sched::tick as usize as u64, name: "sched::tick" },
    ];
    alloc::boxed::Box::leak(alloc::boxed::Box::new(table))
}

/// A module blob handed off by the bootloader alongside [`BootInfo`]
/// (e.g. an initrd of signed `.fkx` images), kept separate from
/// `BootInfo` itself since the boot protocol for "where are my modules"
/// varies more across bootloaders than the rest of the handoff.
pub struct ModuleBlob {
    pub data: &'static [u8],
}

/// Kernel entry point, called once by the architecture-specific
/// trampoline (outside this crate's scope, per spec §1) with interrupts
/// disabled and a valid initial stack.
///
/// `link_time_entry_addr` is this same function's address as recorded
/// at compile time (e.g. `entry as usize as u64` taken from a
/// build-time symbol dump); comparing it against `entry`'s actual
/// runtime address is this kernel's "well-known function" KASLR slide
/// anchor (spec §4.5).
pub fn entry(info: &BootInfo<'_>, link_time_entry_addr: u64, modules: &[ModuleBlob]) -> ! {
    unsafe {
        crate::heap::init();
    }

    crate::log::init(::log::LevelFilter::Info);
    ::log::info!("booting");

    crate::vmm::init(info.phys_memory_offset, &info.usable_ranges());

    unsafe {
        crate::sync::percpu::init_this_cpu(0);
    }
    crate::arch::x86_64::init_this_cpu(0);

    crate::symtab::static_table::install(static_exports());
    let slide = crate::symtab::compute_slide(link_time_entry_addr, entry as usize as u64);
    crate::symtab::finalize(slide);

    spawn_idle_task();

    load_boot_modules(modules);

    ::log::info!("boot complete, entering idle loop");
    idle_loop();
}

/// Every CPU needs exactly one idle-class task installed before it can
/// take an interrupt (spec §4.2: "idle class: always has a runnable
/// task"); the bootstrap processor's is created here, application
/// processors create their own from their own entry trampoline.
fn spawn_idle_task() {
    let tid: TaskId = crate::sched::task::create("idle/0", SchedClassKind::Idle);
    crate::sched::set_current_task(tid);
    crate::sched::rq::enqueue_task(&mut crate::sched::rq::this_cpu_rq().lock(), tid);
}

/// Step into the FKX pipeline for every boot-supplied module, then run
/// the fixed-point dependency relinking pass and the class-ordered init
/// pass (spec §4.4, "Pipeline per module" through "Initialize by
/// class"). A module whose signature or ELF structure is invalid is
/// logged and skipped rather than aborting the rest of boot, since a
/// probe failure is isolated to that one image.
fn load_boot_modules(modules: &[ModuleBlob]) {
    for module in modules {
        if let Err(e) = crate::fkx::load(module.data) {
            ::log::warn!("module load failed: {}", e);
        }
    }
    if let Err(e) = crate::fkx::finalize_loading() {
        ::log::warn!("module dependency resolution did not converge: {}", e);
    }
    crate::fkx::init_all();
}

/// The idle task's body: halt until the next interrupt, forever. A real
/// `schedule()` call happens from the timer IRQ handler, not from here;
/// this loop only ever runs when nothing else on this CPU is runnable.
fn idle_loop() -> ! {
    loop {
        #[cfg(not(test))]
        {
            x86_64::instructions::interrupts::enable();
            x86_64::instructions::hlt();
        }
        #[cfg(test)]
        {
            unreachable!("idle_loop is not exercised by host tests");
        }
    }
}
