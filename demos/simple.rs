//! Walks one transaction through read, blind-write and commit against a
//! two-row lock-set built on [`wait_die_lock::mutex_v4`].

extern crate wait_die_lock;

use wait_die_lock::mutex_v4::{GuardV4, MutexV4};
use wait_die_lock::{LockSet, Row};

type AccountRow = Row<MutexV4, i64>;

fn main() {
    let checking = AccountRow::new(MutexV4::new(), 100);
    let savings = AccountRow::new(MutexV4::new(), 0);

    let mut ls: LockSet<'_, GuardV4<'_>, i64> = LockSet::new();
    ls.set_tx_id(1);

    let mut checking_balance = 0;
    assert!(ls.read(&checking, &mut checking_balance));
    println!("checking balance before transfer: {checking_balance}");

    let transfer = 30;
    assert!(ls.write(&checking, checking_balance - transfer));
    assert!(ls.write(&savings, transfer)); // blind: never read `savings`

    assert!(ls.blind_write_lock_all());
    ls.update_and_unlock();

    let checking_after = unsafe { checking.peek() };
    let savings_after = unsafe { savings.peek() };
    assert_eq!(checking_after, 70);
    assert_eq!(savings_after, 30);
    println!("transfer committed: checking={checking_after} savings={savings_after}");
}
