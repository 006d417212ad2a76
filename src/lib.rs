#![no_std]
//! Wait-die reader/writer lock protocols for pessimistic concurrency
//! control over an in-memory transactional key/value store.
//!
//! Three interchangeable mutex implementations ([`mutex_v2`], [`mutex_v3`],
//! [`mutex_v4`]) share one guard contract ([`txid::LockGuard`]); a
//! [`lock_set::LockSet`] is generic over whichever one a caller picks.
//! Older (numerically smaller) transactions wait; younger ones die and
//! must retry — this crate never blocks a transaction to let a younger one
//! finish, which is what makes the protocol deadlock-free.

extern crate alloc;

#[cfg(test)]
extern crate std;

#[macro_use]
extern crate static_assertions;

pub mod atomic;
pub mod lock_set;
pub mod mcs;
pub mod mutex_v2;
pub mod mutex_v3;
pub mod mutex_v4;
pub mod txid;

pub use lock_set::{LockSet, Row};
pub use txid::{LockGuard, LockMode, TxId, MAX_TXID};
