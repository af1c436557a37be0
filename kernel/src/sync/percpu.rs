//! Per-CPU data.
//!
//! Each logical `DEFINE_PER_CPU`-style variable is really just one slot
//! per CPU in a fixed-size array; `this_cpu()` indexes it with the
//! current CPU's id. On real hardware the CPU id is read from the GS
//! segment base, which is programmed once per CPU at boot
//! ([`init_this_cpu`]); nothing here allocates, so it is safe to call
//! before the heap exists.

use core::sync::atomic::{AtomicUsize, Ordering};

pub const MAX_CPUS: usize = 256;

static ONLINE_CPUS: AtomicUsize = AtomicUsize::new(1);

/// Program this CPU's GS base to `cpu_id` so later `this_cpu_id()` calls
/// on this core return it. Must run once per CPU, before any per-CPU
/// accessor is used on that CPU.
///
/// # Safety
/// Must be called exactly once per CPU, on that CPU, before interrupts
/// carrying per-CPU state (timer IRQ, IPIs) are enabled.
pub unsafe fn init_this_cpu(cpu_id: usize) {
    use x86_64::registers::model_specific::GsBase;
    GsBase::write(x86_64::VirtAddr::new(cpu_id as u64));
    ONLINE_CPUS.fetch_max(cpu_id + 1, Ordering::SeqCst);
}

/// The id of the CPU running this code, as programmed by
/// [`init_this_cpu`]. Before `init_this_cpu` has ever run (single-core
/// bring-up, or host-side unit tests), this is CPU 0.
#[inline]
pub fn this_cpu_id() -> usize {
    #[cfg(all(target_arch = "x86_64", not(test)))]
    {
        use x86_64::registers::model_specific::GsBase;
        GsBase::read().as_u64() as usize
    }
    #[cfg(any(not(target_arch = "x86_64"), test))]
    {
        0
    }
}

pub fn online_cpus() -> usize {
    ONLINE_CPUS.load(Ordering::Relaxed)
}

/// A variable with one independent copy per CPU.
///
/// `T` must have a `const fn` constructor per slot since the array is a
/// `static`; callers typically wrap interior-mutable types (atomics, or
/// a [`crate::sync::spinlock::SpinLock`]) as the element type.
pub struct PerCpu<T> {
    slots: [T; MAX_CPUS],
}

impl<T: Copy> PerCpu<T> {
    pub const fn new(init: T) -> Self {
        PerCpu {
            slots: [init; MAX_CPUS],
        }
    }
}

impl<T> PerCpu<T> {
    pub const fn from_array(slots: [T; MAX_CPUS]) -> Self {
        PerCpu { slots }
    }

    /// The slot for the calling CPU.
    #[inline]
    pub fn this_cpu(&self) -> &T {
        &self.slots[this_cpu_id()]
    }

    #[inline]
    pub fn cpu(&self, id: usize) -> &T {
        &self.slots[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn this_cpu_defaults_to_zero_before_init() {
        assert_eq!(this_cpu_id(), 0);
    }

    #[test]
    fn per_cpu_indexes_by_cpu_id() {
        let mut slots = [0u64; MAX_CPUS];
        slots[0] = 42;
        let pc = PerCpu::from_array(slots);
        assert_eq!(*pc.this_cpu(), 42);
        assert_eq!(*pc.cpu(1), 0);
    }
}
