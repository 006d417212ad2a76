//! Thin wrappers over the atomic operations the packed-word mutexes are
//! built from.
//!
//! [`crate::mutex_v2`], [`crate::mutex_v3`] and [`crate::mutex_v4`] each
//! pack their whole header into one `AtomicU64` and only ever load/store/CAS
//! it as a unit, so their header CAS loops go through [`Word64`] instead of
//! picking an `Ordering` at each call site. [`crate::mcs`] and the request
//! queue it backs in [`crate::mutex_v4`] have no such packed word — they
//! coordinate a linked queue of per-request `AtomicPtr`/`AtomicUsize`/
//! `AtomicU8` cells, each with its own handoff protocol, so that traffic
//! calls `core::sync::atomic` directly with an explicit `Ordering` at each
//! site instead of going through a shared wrapper here.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A 64-bit word accessed exclusively through acquire/release/CAS, matching
/// the packed headers of [`crate::mutex_v2`], [`crate::mutex_v3`] and
/// [`crate::mutex_v4`].
pub trait Word64 {
    fn load(&self) -> u64;
    fn load_acquire(&self) -> u64;
    fn store_release(&self, v: u64);
    fn compare_exchange(&self, current: u64, new: u64) -> Result<u64, u64>;
    fn compare_exchange_acquire(&self, current: u64, new: u64) -> Result<u64, u64>;
    fn compare_exchange_release(&self, current: u64, new: u64) -> Result<u64, u64>;
}

impl Word64 for AtomicU64 {
    #[inline(always)]
    fn load(&self) -> u64 {
        self.load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn load_acquire(&self) -> u64 {
        self.load(Ordering::Acquire)
    }

    #[inline(always)]
    fn store_release(&self, v: u64) {
        self.store(v, Ordering::Release)
    }

    #[inline(always)]
    fn compare_exchange(&self, current: u64, new: u64) -> Result<u64, u64> {
        AtomicU64::compare_exchange(self, current, new, Ordering::AcqRel, Ordering::Acquire)
    }

    #[inline(always)]
    fn compare_exchange_acquire(&self, current: u64, new: u64) -> Result<u64, u64> {
        AtomicU64::compare_exchange(self, current, new, Ordering::Acquire, Ordering::Relaxed)
    }

    #[inline(always)]
    fn compare_exchange_release(&self, current: u64, new: u64) -> Result<u64, u64> {
        AtomicU64::compare_exchange(self, current, new, Ordering::Release, Ordering::Relaxed)
    }
}

/// `mcs::Queue::tail`'s single swap-and-inspect operation; kept as a named
/// function rather than an inline `self.tail.swap(..)` since its AcqRel
/// ordering has to match the plain `load`/`compare_exchange` the rest of
/// [`crate::mcs`] uses on the same word.
#[inline(always)]
pub fn exchange_usize(a: &AtomicUsize, v: usize) -> usize {
    a.swap(v, Ordering::AcqRel)
}

/// The cpu-yield hint every bounded spin loop uses between retries. Goes
/// through `spin::relax::RelaxStrategy` rather than a hand-rolled
/// `core::hint::spin_loop()` call so the hint stays swappable.
#[inline(always)]
pub fn cpu_relax() {
    use spin::relax::RelaxStrategy;
    spin::relax::Spin::relax();
}
