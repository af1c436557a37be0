//! TSC-based monotonic clock and the periodic timer tick.
//!
//! The APIC/HPET programming needed to actually deliver the periodic
//! interrupt is an external collaborator (a concrete LAPIC driver) that
//! this kernel does not implement; [`init`] calibrates the TSC scale
//! factor and [`on_timer_irq`] is the hook a LAPIC driver calls once per
//! tick, which is all the scheduler (spec component C2) needs from the
//! timer subsystem: a monotonic nanosecond clock and a tick callback.

use core::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use spin::Mutex;

#[derive(Clone, Copy)]
struct TscScale {
    mul: u64,
    shift: u8,
}

#[inline(always)]
fn tsc_to_ns(delta: u64, sc: TscScale) -> u64 {
    ((delta as u128 * sc.mul as u128) >> sc.shift) as u64
}

struct TimeState {
    scale: TscScale,
    tsc0: u64,
    tick_hz: u32,
}

static INIT: AtomicBool = AtomicBool::new(false);
static STATE: Mutex<TimeState> = Mutex::new(TimeState {
    scale: TscScale { mul: 1, shift: 0 },
    tsc0: 0,
    tick_hz: 100,
});

/// Slewed offset applied on top of the raw TSC-derived clock, for
/// future NTP-style discipline; currently only ever zero but kept as a
/// distinct knob from the scale factor so later slewing logic does not
/// have to touch calibration state.
static OFFSET_NS: AtomicI64 = AtomicI64::new(0);

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Calibrate the TSC-to-nanosecond scale factor and record the target
/// tick rate (spec default: 100 Hz). Idempotent.
pub fn init(target_hz: u32) {
    if INIT.swap(true, Ordering::SeqCst) {
        return;
    }
    let (mul, shift) = calibrate_tsc_quick();
    let mut s = STATE.lock();
    s.scale = TscScale { mul, shift };
    s.tsc0 = rdtsc();
    s.tick_hz = if target_hz == 0 { 100 } else { target_hz };
}

pub fn tick_hz() -> u32 {
    STATE.lock().tick_hz
}

/// Nanoseconds since [`init`] was called.
pub fn now_ns() -> u64 {
    let s = STATE.lock();
    let base = tsc_to_ns(rdtsc().saturating_sub(s.tsc0), s.scale);
    let adj = OFFSET_NS.load(Ordering::Relaxed);
    if adj >= 0 {
        base + adj as u64
    } else {
        base.saturating_sub((-adj) as u64)
    }
}

pub fn now_us() -> u64 {
    now_ns() / 1_000
}

pub fn now_ms() -> u64 {
    now_ns() / 1_000_000
}

/// Total ticks delivered since boot (diagnostics).
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Called by the LAPIC driver once per timer interrupt. Advances the
/// tick counter and drives the scheduler's per-tick accounting.
pub fn on_timer_irq() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    crate::sched::tick();
}

fn calibrate_tsc_quick() -> (u64, u8) {
    let t0 = rdtsc();
    busy_delay_cal(10_000);
    let t1 = rdtsc();
    let delta = (t1 - t0).max(1);
    let cycles_per_us = delta / 10;
    let khz = cycles_per_us * 1000;
    let freq = (khz as u128) * 1000;
    let mut shift: u8 = 26;
    let mut mul: u64 = ((1_000_000_000u128 << shift) / freq).max(1) as u64;
    while mul > (1u64 << 63) {
        shift -= 1;
        mul = ((1_000_000_000u128 << shift) / freq) as u64;
    }
    (mul, shift)
}

#[inline(always)]
fn busy_delay_cal(iter: u32) {
    for _ in 0..iter {
        core::hint::spin_loop();
    }
}

#[inline(always)]
fn rdtsc() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        let hi: u32;
        let lo: u32;
        core::arch::asm!("rdtsc", out("edx") hi, out("eax") lo, options(nomem, nostack, preserves_flags));
        ((hi as u64) << 32) | (lo as u64)
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        0
    }
}
