//! Per-transaction lock-set: tracks every row a transaction has
//! touched, gives read-own-writes semantics, and defers locking rows that
//! are written without ever having been read ("blind writes") until commit
//! time, to shrink the window in which the lock is actually held.
//!
//! Generic over the mutex implementation via [`LockGuard`] — swapping
//! [`crate::mutex_v2::GuardV2`] for [`crate::mutex_v4::GuardV4`] changes
//! nothing here.

use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::hash::{BuildHasherDefault, Hasher};

use crate::txid::{LockGuard, LockMode, TxId};

/// A stored value plus the mutex that guards it. Lives at a stable address
/// shared by every transaction that might touch it; a [`LockSet`] only ever
/// holds `&'a Row`.
pub struct Row<M, T> {
    mutex: M,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is always mediated by `mutex`, same contract as
// `std::sync::Mutex<T>`.
unsafe impl<M: Sync, T: Send> Sync for Row<M, T> {}

impl<M, T: Copy> Row<M, T> {
    pub const fn new(mutex: M, value: T) -> Self {
        Row { mutex, value: UnsafeCell::new(value) }
    }

    pub fn mutex(&self) -> &M {
        &self.mutex
    }

    fn id(&self) -> usize {
        &self.mutex as *const M as usize
    }

    /// Safety: caller must hold at least a shared lock on `mutex`.
    unsafe fn get(&self) -> T {
        *self.value.get()
    }

    /// Safety: caller must know no other transaction holds `mutex`, e.g.
    /// because the caller is single-threaded and has just unlocked it.
    pub unsafe fn peek(&self) -> T {
        *self.value.get()
    }

    /// Safety: caller must hold the exclusive lock on `mutex`.
    unsafe fn set(&self, v: T) {
        *self.value.get() = v;
    }
}

struct Entry<'a, G: LockGuard<'a>, T> {
    row: &'a Row<G::Mutex, T>,
    guard: G,
    /// Pending value written by this transaction, not yet installed into
    /// `row`, so a later read in the same transaction sees its own write.
    /// `None` means this entry was only ever read.
    local: Option<T>,
    /// Not yet locked — a write to a row this transaction never read.
    /// Resolved by [`LockSet::blind_write_lock_all`] before commit.
    blind_write: bool,
}

#[derive(Default)]
struct FnvHasher(u64);

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        const PRIME: u64 = 0x100_0000_01b3;
        let mut hash = if self.0 == 0 { 0xcbf2_9ce4_8422_2325 } else { self.0 };
        for b in bytes {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(PRIME);
        }
        self.0 = hash;
    }
}

type RowIndex = hashbrown::HashMap<usize, usize, BuildHasherDefault<FnvHasher>>;

/// Past this many entries, a linear scan of the lock-set stops being
/// cheaper than a hash lookup, so a lazy index is built.
const INDEX_THRESHOLD_BYTES: usize = 4096;

/// All rows one in-flight transaction has touched. `G` is the mutex-guard
/// implementation (V2/V3/V4's guard type); `T` is the stored value type.
pub struct LockSet<'a, G: LockGuard<'a>, T> {
    tx_id: TxId,
    entries: Vec<Entry<'a, G, T>>,
    index: Option<RowIndex>,
}

impl<'a, G: LockGuard<'a>, T: Copy> Default for LockSet<'a, G, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, G: LockGuard<'a>, T: Copy> LockSet<'a, G, T> {
    pub fn new() -> Self {
        LockSet { tx_id: crate::txid::MAX_TXID, entries: Vec::new(), index: None }
    }

    pub fn init(&mut self, reserve: usize) {
        self.entries.reserve(reserve);
    }

    /// Starts a new transaction against this lock-set. The set must be
    /// [`LockSet::empty`] already — call [`LockSet::unlock`] or
    /// [`LockSet::update_and_unlock`] first.
    pub fn set_tx_id(&mut self, tx_id: TxId) {
        debug_assert!(self.empty());
        self.tx_id = tx_id;
    }

    pub fn empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn index_threshold(&self) -> usize {
        INDEX_THRESHOLD_BYTES / core::mem::size_of::<Entry<'a, G, T>>().max(1)
    }

    fn find(&self, row: &Row<G::Mutex, T>) -> Option<usize> {
        let id = row.id();
        if let Some(index) = &self.index {
            return index.get(&id).copied();
        }
        self.entries.iter().position(|e| e.row.id() == id)
    }

    fn push_entry(&mut self, row: &'a Row<G::Mutex, T>, guard: G, local: Option<T>, blind_write: bool) {
        let idx = self.entries.len();
        self.entries.push(Entry { row, guard, local, blind_write });
        if self.index.is_none() && self.entries.len() > self.index_threshold() {
            let mut map = RowIndex::default();
            for (i, e) in self.entries.iter().enumerate() {
                map.insert(e.row.id(), i);
            }
            self.index = Some(map);
        } else if let Some(index) = &mut self.index {
            index.insert(row.id(), idx);
        }
    }

    /// Returns the value as this transaction would see it (its own
    /// uncommitted write if any, else the committed value).
    pub fn read(&mut self, row: &'a Row<G::Mutex, T>, out: &mut T) -> bool {
        if let Some(i) = self.find(row) {
            let e = &self.entries[i];
            *out = e.local.unwrap_or_else(|| unsafe { e.row.get() });
            return true;
        }
        let mut guard = G::default();
        if !guard.read_lock(row.mutex(), self.tx_id) {
            return false;
        }
        *out = unsafe { row.get() };
        self.push_entry(row, guard, None, false);
        true
    }

    /// Stages `value` for this row. If the row was never touched before by
    /// this transaction, the write is blind: no lock is taken yet (spec
    /// §4.6), [`LockSet::blind_write_lock_all`] must run before commit.
    pub fn write(&mut self, row: &'a Row<G::Mutex, T>, value: T) -> bool {
        if let Some(i) = self.find(row) {
            let e = &mut self.entries[i];
            if e.guard.mode() == LockMode::Shared && !e.blind_write {
                if !e.guard.upgrade() {
                    return false; // wait-die abort on upgrade
                }
            }
            e.local = Some(value);
            return true;
        }
        let mut guard = G::default();
        guard.set_mutex(row.mutex());
        self.push_entry(row, guard, Some(value), true);
        true
    }

    /// Like [`LockSet::read`], but takes an exclusive lock up front so a
    /// later [`LockSet::write`] of the same row can never abort on upgrade.
    pub fn read_for_update(&mut self, row: &'a Row<G::Mutex, T>, out: &mut T) -> bool {
        if let Some(i) = self.find(row) {
            let e = &mut self.entries[i];
            if e.blind_write {
                if !e.guard.write_lock(row.mutex(), self.tx_id) {
                    return false;
                }
                e.blind_write = false;
            } else if e.guard.mode() == LockMode::Shared {
                if !e.guard.upgrade() {
                    return false;
                }
            }
            *out = e.local.unwrap_or_else(|| unsafe { e.row.get() });
            return true;
        }
        let mut guard = G::default();
        if !guard.write_lock(row.mutex(), self.tx_id) {
            return false;
        }
        *out = unsafe { row.get() };
        self.push_entry(row, guard, None, false);
        true
    }

    /// Resolves every still-deferred blind write by actually taking its
    /// exclusive lock. Must succeed for every entry before
    /// [`LockSet::update_and_unlock`] is called; on failure the transaction
    /// must [`LockSet::unlock`] and restart.
    pub fn blind_write_lock_all(&mut self) -> bool {
        for e in self.entries.iter_mut() {
            if !e.blind_write {
                continue;
            }
            if !e.guard.write_lock(e.row.mutex(), self.tx_id) {
                return false;
            }
            e.blind_write = false;
        }
        true
    }

    /// Commits: installs every staged write into its row's shared slot,
    /// then releases every held lock. The point this is called is the
    /// transaction's serialization point.
    pub fn update_and_unlock(&mut self) {
        debug_assert!(self.entries.iter().all(|e| !e.blind_write));
        for e in self.entries.iter() {
            if e.guard.mode() == LockMode::Exclusive {
                if let Some(v) = e.local {
                    unsafe { e.row.set(v) };
                }
            }
        }
        for e in self.entries.iter_mut() {
            e.guard.unlock();
        }
        self.clear();
    }

    /// Aborts: releases every held lock (or drops an unlocked blind-write
    /// placeholder) without installing anything.
    pub fn unlock(&mut self) {
        for e in self.entries.iter_mut() {
            if !e.blind_write {
                e.guard.unlock();
            }
        }
        self.clear();
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.index = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mutex_v2::{GuardV2, MutexV2, MAX_CUMULO_READERS};

    type TestGuard<'a> = GuardV2<'a, MAX_CUMULO_READERS>;
    type TestRow = Row<MutexV2<MAX_CUMULO_READERS>, u64>;

    #[test]
    fn read_own_writes() {
        let row = TestRow::new(MutexV2::new(), 1);
        let mut ls: LockSet<'_, TestGuard<'_>, u64> = LockSet::new();
        ls.set_tx_id(10);

        let mut v = 0;
        assert!(ls.read(&row, &mut v));
        assert_eq!(v, 1);

        assert!(ls.write(&row, 2));
        assert!(ls.read(&row, &mut v));
        assert_eq!(v, 2); // own write visible before commit

        assert_eq!(unsafe { row.get() }, 1); // not installed yet
        ls.update_and_unlock();
        assert_eq!(unsafe { row.get() }, 2);
        assert!(ls.empty());
    }

    #[test]
    fn blind_write_defers_lock_until_commit() {
        let row = TestRow::new(MutexV2::new(), 0);
        let mut ls: LockSet<'_, TestGuard<'_>, u64> = LockSet::new();
        ls.set_tx_id(5);

        assert!(ls.write(&row, 9)); // never read -> blind write
        assert!(row.mutex().write_lock(99)); // lock not taken yet, a stranger can
        row.mutex().write_unlock();

        assert!(ls.blind_write_lock_all());
        assert!(!row.mutex().write_lock(99)); // now actually held

        ls.update_and_unlock();
        assert_eq!(unsafe { row.get() }, 9);
    }

    #[test]
    fn unlock_drops_everything_without_installing() {
        let row = TestRow::new(MutexV2::new(), 7);
        let mut ls: LockSet<'_, TestGuard<'_>, u64> = LockSet::new();
        ls.set_tx_id(1);

        let mut v = 0;
        assert!(ls.read_for_update(&row, &mut v));
        assert!(ls.write(&row, 42));
        ls.unlock();

        assert_eq!(unsafe { row.get() }, 7);
        assert!(row.mutex().write_lock(2));
        row.mutex().write_unlock();
    }
}
