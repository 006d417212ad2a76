//! Transaction identifiers and lock modes.

/// Smaller means older and higher priority. [`MAX_TXID`] means "no
/// transaction". A restarted transaction may reuse its previous id against
/// the same mutex — several acceptance checks below use `<=` instead of
/// `<` for exactly this reason.
pub type TxId = u32;

/// Sentinel meaning "no transaction holds or waits on this mutex".
pub const MAX_TXID: TxId = TxId::MAX;

/// The mode a lock guard is in. A guard is always in exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// No lock held; for a lock-set entry this also means "blind-write
    /// placeholder, not yet locked" or "locked but value installed via a
    /// local buffer rather than the shared slot".
    Invalid,
    /// Shared (read) lock.
    Shared,
    /// Exclusive (write) lock.
    Exclusive,
}

/// The common guard contract V2/V3/V4 all expose. The lock-set is generic
/// over one implementation of this trait, chosen at compile time; no
/// runtime dispatch is required.
///
/// `'a` is the lifetime of the mutex being guarded: a guard borrows its
/// mutex for as long as it may hold a lock on it, same as the original's
/// `Mutex*` member but checked at compile time instead of by discipline.
pub trait LockGuard<'a>: Default {
    /// The mutex type this guard locks.
    type Mutex: 'a;

    /// Acquire a shared lock. `false` means wait-die abort: the caller
    /// must roll back and may retry later with the same `tx_id`.
    fn read_lock(&mut self, mutex: &'a Self::Mutex, tx_id: TxId) -> bool;

    /// Acquire an exclusive lock. Same failure contract as `read_lock`.
    fn write_lock(&mut self, mutex: &'a Self::Mutex, tx_id: TxId) -> bool;

    /// Release whatever is held; no-op if [`LockGuard::mode`] is
    /// [`LockMode::Invalid`].
    fn unlock(&mut self);

    /// Promote a held shared lock to exclusive without releasing it.
    /// Only legal to call while `mode() == LockMode::Shared`.
    fn upgrade(&mut self) -> bool;

    fn mode(&self) -> LockMode;

    /// Associates this not-yet-locked guard with `mutex`, for the
    /// blind-write case: a placeholder entry is created before the lock
    /// is actually acquired, and the lock-set still needs a mutex identity
    /// to find it by.
    fn set_mutex(&mut self, mutex: &'a Self::Mutex);

    /// Address of the mutex this guard is (or will be) locking; used as
    /// the lock-set's lookup key.
    fn mutex_id(&self) -> usize;
}
