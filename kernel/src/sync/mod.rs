//! SMP concurrency primitives (spec component C3).
//!
//! Everything above this layer — the scheduler, the VMM, the module
//! linker — is built on top of the primitives exported here: IRQ-safe
//! spinlocks, sleepable RCU, wait queues, per-CPU data, and softirq
//! (bottom-half) dispatch.

pub mod percpu;
pub mod preempt;
pub mod softirq;
pub mod spinlock;
pub mod srcu;
pub mod waitqueue;

pub use spinlock::{IrqState, SpinLock};
pub use srcu::SrcuStruct;
pub use waitqueue::WaitQueue;
