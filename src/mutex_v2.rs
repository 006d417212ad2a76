//! Mutex V2: a single 64-bit word, no queueing.
//!
//! Not a fair locking protocol — only wait-die priority governs who waits
//! and who dies; a newly-arriving high-priority writer can still starve
//! readers that arrived first, and vice versa.

use core::sync::atomic::AtomicU64;

use crate::atomic::{cpu_relax, Word64};
use crate::txid::{LockGuard, LockMode, TxId, MAX_TXID};

const READERS_BITS: u32 = 7;
const CUMULO_READERS_BITS: u32 = 7;

/// `readers` saturates here; a lock attempt that would exceed it just
/// waits instead of dying.
pub const MAX_READERS: u32 = (1 << READERS_BITS) - 1;
/// Field-width cap on `cumulo_readers`: also doubles as the
/// default/disabled value of `Threshold_cumulo_readers`, so the
/// cumulative-reader throttle never kicks in unless a caller picks a
/// smaller `THRESHOLD` explicitly. `cumulo_readers` saturates here the
/// same way `readers` saturates at `MAX_READERS` — a lock attempt that
/// would exceed it just waits instead of dying, so the field can never
/// overflow into its neighbor.
pub const MAX_CUMULO_READERS: u32 = (1 << CUMULO_READERS_BITS) - 1;

const TX_ID_SHIFT: u32 = 0;
const WRITE_LOCKED_SHIFT: u32 = 32;
const READERS_SHIFT: u32 = 33;
const CUMULO_READERS_SHIFT: u32 = 33 + READERS_BITS;

const TX_ID_MASK: u64 = 0xffff_ffff;
const WRITE_LOCKED_MASK: u64 = 1 << WRITE_LOCKED_SHIFT;
const READERS_MASK: u64 = ((1u64 << READERS_BITS) - 1) << READERS_SHIFT;
const CUMULO_READERS_MASK: u64 = ((1u64 << CUMULO_READERS_BITS) - 1) << CUMULO_READERS_SHIFT;

/// Decoded view of the packed 64-bit word.
///
/// Invariants: `write_locked => readers == 0`; `readers == 0 =>
/// cumulo_readers == 0 && tx_id == MAX_TXID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WordV2 {
    tx_id: TxId,
    write_locked: bool,
    readers: u32,
    cumulo_readers: u32,
}

impl WordV2 {
    const fn unlocked() -> Self {
        WordV2 { tx_id: MAX_TXID, write_locked: false, readers: 0, cumulo_readers: 0 }
    }

    fn pack(self) -> u64 {
        (self.tx_id as u64) << TX_ID_SHIFT
            | (self.write_locked as u64) << WRITE_LOCKED_SHIFT
            | ((self.readers as u64) & ((1u64 << READERS_BITS) - 1)) << READERS_SHIFT
            | ((self.cumulo_readers as u64) & ((1u64 << CUMULO_READERS_BITS) - 1)) << CUMULO_READERS_SHIFT
    }

    fn unpack(raw: u64) -> Self {
        WordV2 {
            tx_id: ((raw & TX_ID_MASK) >> TX_ID_SHIFT) as TxId,
            write_locked: raw & WRITE_LOCKED_MASK != 0,
            readers: ((raw & READERS_MASK) >> READERS_SHIFT) as u32,
            cumulo_readers: ((raw & CUMULO_READERS_MASK) >> CUMULO_READERS_SHIFT) as u32,
        }
    }

    fn is_unlocked(&self) -> bool {
        self.tx_id == MAX_TXID && !self.write_locked && self.readers == 0 && self.cumulo_readers == 0
    }
}

/// One key's lock word. `THRESHOLD` is `Threshold_cumulo_readers`, a
/// compile-time-fixed knob: lower values reduce the wait time of a prior
/// (higher-priority) writer at the cost of a higher die rate for younger
/// readers.
#[repr(align(8))]
pub struct MutexV2<const THRESHOLD: u32 = MAX_CUMULO_READERS> {
    word: AtomicU64,
}

static_assertions::const_assert!(CUMULO_READERS_SHIFT + CUMULO_READERS_BITS <= 64);
static_assertions::const_assert_eq!(core::mem::size_of::<AtomicU64>(), 8);

impl<const THRESHOLD: u32> Default for MutexV2<THRESHOLD> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const THRESHOLD: u32> MutexV2<THRESHOLD> {
    pub const fn new() -> Self {
        MutexV2 { word: AtomicU64::new(0) }
    }

    fn load(&self) -> WordV2 {
        let raw = Word64::load(&self.word);
        if raw == 0 {
            WordV2::unlocked()
        } else {
            WordV2::unpack(raw)
        }
    }

    /// Returns `true` if locked, `false` if the caller must die.
    pub fn read_lock(&self, tx_id: TxId) -> bool {
        debug_assert!(tx_id != MAX_TXID);
        let mut cur = self.load();
        loop {
            cpu_relax();
            if cur.write_locked {
                if cur.tx_id < tx_id {
                    return false; // die
                }
                cur = self.load();
                continue; // wait
            }
            if cur.tx_id < tx_id && cur.cumulo_readers >= THRESHOLD {
                return false; // die: limit blocking of the prior writer
            }
            if cur.readers >= MAX_READERS || cur.cumulo_readers >= MAX_CUMULO_READERS {
                cur = self.load();
                continue; // wait
            }
            let mut next = cur;
            next.readers += 1;
            next.cumulo_readers += 1;
            next.tx_id = core::cmp::min(next.tx_id, tx_id);
            match self.word.compare_exchange_acquire(cur.pack(), next.pack()) {
                Ok(_) => {
                    log::trace!("v2 read_lock granted tx={tx_id}");
                    return true;
                }
                Err(raw) => cur = WordV2::unpack(raw),
            }
        }
    }

    pub fn write_lock(&self, tx_id: TxId) -> bool {
        debug_assert!(tx_id != MAX_TXID);
        let mut cur = self.load();
        loop {
            cpu_relax();
            if cur.write_locked || cur.readers != 0 {
                if cur.tx_id < tx_id {
                    return false; // die
                }
                cur = self.load();
                continue; // wait
            }
            let mut next = cur;
            next.write_locked = true;
            next.tx_id = tx_id;
            match self.word.compare_exchange_acquire(cur.pack(), next.pack()) {
                Ok(_) => {
                    log::trace!("v2 write_lock granted tx={tx_id}");
                    return true;
                }
                Err(raw) => cur = WordV2::unpack(raw),
            }
        }
    }

    pub fn read_unlock(&self) {
        let mut cur = self.load();
        loop {
            cpu_relax();
            let mut next = cur;
            debug_assert!(next.readers > 0);
            next.readers -= 1;
            if next.readers == 0 {
                next.cumulo_readers = 0;
                next.tx_id = MAX_TXID;
            }
            match self.word.compare_exchange_release(cur.pack(), next.pack()) {
                Ok(_) => return,
                Err(raw) => cur = WordV2::unpack(raw),
            }
        }
    }

    pub fn write_unlock(&self) {
        debug_assert!(self.load().write_locked);
        // The X-holder owns the word outright; no CAS needed.
        self.word.store_release(WordV2::unlocked().pack());
    }

    /// S->X upgrade. Only possible while `readers == 1` (the caller is the
    /// unique S-holder); anyone else observed concurrently sharing the lock
    /// fails the upgrade rather than dying.
    pub fn upgrade(&self, tx_id: TxId) -> bool {
        let mut cur = self.load();
        while cur.readers == 1 {
            cpu_relax();
            let next = WordV2 { tx_id, write_locked: true, readers: 0, cumulo_readers: 0 };
            match Word64::compare_exchange(&self.word, cur.pack(), next.pack()) {
                Ok(_) => return true,
                Err(raw) => cur = WordV2::unpack(raw),
            }
        }
        false
    }
}

/// Guard produced by [`MutexV2`], implementing the shared [`LockGuard`]
/// contract so it's interchangeable with V3's and V4's guards.
pub struct GuardV2<'a, const THRESHOLD: u32 = MAX_CUMULO_READERS> {
    mutex: Option<&'a MutexV2<THRESHOLD>>,
    mode: LockMode,
    tx_id: TxId,
}

impl<const THRESHOLD: u32> Default for GuardV2<'_, THRESHOLD> {
    fn default() -> Self {
        GuardV2 { mutex: None, mode: LockMode::Invalid, tx_id: MAX_TXID }
    }
}

impl<const THRESHOLD: u32> Drop for GuardV2<'_, THRESHOLD> {
    fn drop(&mut self) {
        self.unlock();
    }
}

impl<'a, const THRESHOLD: u32> LockGuard<'a> for GuardV2<'a, THRESHOLD> {
    type Mutex = MutexV2<THRESHOLD>;

    fn read_lock(&mut self, mutex: &'a Self::Mutex, tx_id: TxId) -> bool {
        debug_assert!(tx_id != MAX_TXID);
        if !mutex.read_lock(tx_id) {
            return false;
        }
        self.mutex = Some(mutex);
        self.mode = LockMode::Shared;
        self.tx_id = tx_id;
        true
    }

    fn write_lock(&mut self, mutex: &'a Self::Mutex, tx_id: TxId) -> bool {
        debug_assert!(tx_id != MAX_TXID);
        if !mutex.write_lock(tx_id) {
            return false;
        }
        self.mutex = Some(mutex);
        self.mode = LockMode::Exclusive;
        self.tx_id = tx_id;
        true
    }

    fn unlock(&mut self) {
        match self.mode {
            LockMode::Invalid => return,
            LockMode::Shared => self.mutex.expect("locked guard has a mutex").read_unlock(),
            LockMode::Exclusive => self.mutex.expect("locked guard has a mutex").write_unlock(),
        }
        self.mode = LockMode::Invalid;
        self.mutex = None;
        self.tx_id = MAX_TXID;
    }

    fn upgrade(&mut self) -> bool {
        debug_assert_eq!(self.mode, LockMode::Shared);
        let mutex = self.mutex.expect("locked guard has a mutex");
        if mutex.upgrade(self.tx_id) {
            self.mode = LockMode::Exclusive;
            true
        } else {
            false
        }
    }

    fn mode(&self) -> LockMode {
        self.mode
    }

    fn set_mutex(&mut self, mutex: &'a Self::Mutex) {
        self.mutex = Some(mutex);
    }

    fn mutex_id(&self) -> usize {
        self.mutex.expect("mutex set before use") as *const _ as usize
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_threaded_exclusion() {
        let mu = MutexV2::<MAX_CUMULO_READERS>::new();
        assert!(mu.write_lock(10));
        assert!(!mu.read_lock(20)); // younger dies
        mu.write_unlock();
        assert!(mu.read_lock(5));
        assert!(mu.read_lock(6));
        assert!(!mu.write_lock(20));
        mu.read_unlock();
        mu.read_unlock();
        assert!(mu.write_lock(20));
        mu.write_unlock();
    }

    #[test]
    fn young_writer_dies_then_retries() {
        let mu = MutexV2::<MAX_CUMULO_READERS>::new();
        assert!(mu.write_lock(10));
        assert!(!mu.write_lock(20));
        mu.write_unlock();
        assert!(mu.write_lock(20));
    }

    #[test]
    fn upgrade_rejected_under_contention() {
        let mu = MutexV2::<MAX_CUMULO_READERS>::new();
        assert!(mu.read_lock(10));
        assert!(mu.read_lock(20));
        assert!(!mu.upgrade(10));
        mu.read_unlock(); // T20 releases
        assert!(mu.upgrade(10));
    }

    #[test]
    fn older_transaction_waits_younger_dies() {
        let mu = MutexV2::<MAX_CUMULO_READERS>::new();
        assert!(mu.write_lock(20));
        // An older transaction (5 < 20) must be allowed to wait, never die;
        // we can't block in a unit test, so assert the non-death condition
        // indirectly: unlocking lets it through immediately after.
        mu.write_unlock();
        assert!(mu.write_lock(5));
    }

    #[test]
    fn guard_drop_releases_lock() {
        let mu = MutexV2::<MAX_CUMULO_READERS>::new();
        {
            let mut g = GuardV2::default();
            assert!(g.write_lock(&mu, 1));
        }
        assert!(mu.write_lock(2));
    }
}
