//! Mutex V4: the fair queuing lock built on the [`crate::mcs`] template.
//! Every operation becomes a [`Request`] submitted through the queue; the
//! elected owner classifies a whole batch at once, updates the header,
//! then notifies each request SUCCEEDED or FAILED.
//!
//! Request storage lives on the submitter's stack for the lifetime of the
//! call — no heap allocation anywhere here.

use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU64, AtomicU8, Ordering};

use crate::atomic::{cpu_relax, Word64};
use crate::mcs;
use crate::txid::{LockGuard, LockMode, TxId, MAX_TXID};

const READERS_BITS: u32 = 10;
const WRITE_REQUESTS_BITS: u32 = 10;

pub const MAX_READERS: u32 = (1 << READERS_BITS) - 1;
pub const MAX_WRITE_REQUESTS: u32 = (1 << WRITE_REQUESTS_BITS) - 1;

const TX_ID_SHIFT: u32 = 0;
const READERS_SHIFT: u32 = 32;
const WRITE_LOCKED_SHIFT: u32 = READERS_SHIFT + READERS_BITS;
const WRITE_REQUESTS_SHIFT: u32 = WRITE_LOCKED_SHIFT + 1;

const TX_ID_MASK: u64 = 0xffff_ffff;
const READERS_MASK: u64 = ((1u64 << READERS_BITS) - 1) << READERS_SHIFT;
const WRITE_LOCKED_MASK: u64 = 1 << WRITE_LOCKED_SHIFT;
const WRITE_REQUESTS_MASK: u64 = ((1u64 << WRITE_REQUESTS_BITS) - 1) << WRITE_REQUESTS_SHIFT;

static_assertions::const_assert!(WRITE_REQUESTS_SHIFT + WRITE_REQUESTS_BITS <= 64);

/// Decoded view of the V4 header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    tx_id: TxId,
    readers: u32,
    write_locked: bool,
    write_requests: u32,
}

impl Header {
    const fn unlocked() -> Self {
        Header { tx_id: MAX_TXID, readers: 0, write_locked: false, write_requests: 0 }
    }

    fn pack(self) -> u64 {
        (self.tx_id as u64) << TX_ID_SHIFT
            | (self.readers as u64) << READERS_SHIFT
            | (self.write_locked as u64) << WRITE_LOCKED_SHIFT
            | (self.write_requests as u64) << WRITE_REQUESTS_SHIFT
    }

    fn unpack(raw: u64) -> Self {
        Header {
            tx_id: ((raw & TX_ID_MASK) >> TX_ID_SHIFT) as TxId,
            readers: ((raw & READERS_MASK) >> READERS_SHIFT) as u32,
            write_locked: raw & WRITE_LOCKED_MASK != 0,
            write_requests: ((raw & WRITE_REQUESTS_MASK) >> WRITE_REQUESTS_SHIFT) as u32,
        }
    }

    fn is_read_locked(&self) -> bool {
        self.readers != 0
    }

    fn is_write_locked(&self) -> bool {
        self.write_locked
    }

    fn is_locked(&self) -> bool {
        self.is_read_locked() || self.is_write_locked()
    }

    fn is_unlocked(&self) -> bool {
        !self.is_locked()
    }
}

/// `is_lock`/`is_unlock`/`is_write`/`is_read` are the independent
/// single-bit tests the classification pass relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    ReadLock,
    WriteLock,
    ReadUnlock,
    WriteUnlock,
    Upgrade,
}

impl RequestType {
    fn is_lock(self) -> bool {
        matches!(self, RequestType::ReadLock | RequestType::WriteLock)
    }

    fn is_unlock(self) -> bool {
        matches!(self, RequestType::ReadUnlock | RequestType::WriteUnlock)
    }

    fn is_upgrade(self) -> bool {
        matches!(self, RequestType::Upgrade)
    }

    fn is_write(self) -> bool {
        matches!(self, RequestType::WriteLock | RequestType::WriteUnlock)
    }

    fn is_read(self) -> bool {
        matches!(self, RequestType::ReadLock | RequestType::ReadUnlock)
    }
}

/// A request's `receiver` state machine: `Waiting -> Owner` (assigned by
/// the prior owner) or `Waiting -> Succeeded | Failed` (assigned by the
/// current owner). Terminal states never transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Message {
    Waiting = 0,
    Owner = 1,
    Succeeded = 2,
    Failed = 3,
}

impl Message {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Message::Waiting,
            1 => Message::Owner,
            2 => Message::Succeeded,
            3 => Message::Failed,
            _ => unreachable!("receiver byte only ever holds a Message discriminant"),
        }
    }
}

/// One in-flight operation against a [`MutexV4`]. Lives on the submitter's
/// stack; `next` is mutated by whichever request logically follows it
/// (either the [`crate::mcs`] submission chain, or later this mutex's
/// internal pending-request list, which reuses the same field once the
/// request has left the submission chain).
#[repr(align(64))]
pub struct Request {
    next: AtomicPtr<Request>,
    tx_id: TxId,
    /// tx_id of the most recent writer ahead of this read request, or
    /// `MAX_TXID`. Mutated only by whichever thread currently owns the
    /// queue (`wq` is private to the current queue owner); `UnsafeCell`
    /// here, not an atomic, because the owner invariant already rules out
    /// concurrent access — no inter-thread synchronization is being
    /// modeled by this field, happens-before is carried by `receiver`'s
    /// release/acquire pair.
    write_tx_id: core::cell::UnsafeCell<TxId>,
    /// Minimum tx_id of the contiguous run of granted/pending readers
    /// ending with this request. Same access discipline as `write_tx_id`.
    read_tx_id: core::cell::UnsafeCell<TxId>,
    req_type: RequestType,
    receiver: AtomicU8,
}

unsafe impl Sync for Request {}

impl Request {
    pub fn new(tx_id: TxId, req_type: RequestType) -> Self {
        debug_assert!(tx_id != MAX_TXID);
        Request {
            next: AtomicPtr::new(ptr::null_mut()),
            tx_id,
            write_tx_id: core::cell::UnsafeCell::new(MAX_TXID),
            read_tx_id: core::cell::UnsafeCell::new(MAX_TXID),
            req_type,
            receiver: AtomicU8::new(Message::Waiting as u8),
        }
    }

    fn write_tx_id(&self) -> TxId {
        unsafe { *self.write_tx_id.get() }
    }

    fn set_write_tx_id(&self, v: TxId) {
        unsafe { *self.write_tx_id.get() = v };
    }

    fn read_tx_id(&self) -> TxId {
        unsafe { *self.read_tx_id.get() }
    }

    fn set_read_tx_id(&self, v: TxId) {
        unsafe { *self.read_tx_id.get() = v };
    }

    fn notify(&self, msg: Message) {
        self.receiver.store(msg as u8, Ordering::Release);
    }

    /// Spin until another batch member publishes itself as our successor.
    fn get_non_empty_next(&self) -> *const Request {
        loop {
            let n = self.next.load(Ordering::Acquire);
            if !n.is_null() {
                return n;
            }
            cpu_relax();
        }
    }
}

impl mcs::Node for Request {
    type Message = Message;

    fn set_next(&self, next: *const Self) {
        self.next.store(next as *mut Request, Ordering::Release);
    }

    fn delegate_ownership(&self) {
        self.notify(Message::Owner);
    }

    fn wait_for_ownership(&self) {
        loop {
            if self.receiver.load(Ordering::Acquire) == Message::Owner as u8 {
                self.receiver.store(Message::Waiting as u8, Ordering::Relaxed);
                return;
            }
            cpu_relax();
        }
    }

    fn local_spin_wait(&self) -> Message {
        loop {
            let v = self.receiver.load(Ordering::Acquire);
            if v != Message::Waiting as u8 {
                self.receiver.store(Message::Waiting as u8, Ordering::Relaxed);
                return Message::from_u8(v);
            }
            cpu_relax();
        }
    }
}

/// Intrusive singly-linked FIFO over `Request::next`, exclusively owned by
/// whichever thread currently holds [`mcs`] ownership of the mutex. Used
/// both for `wq` (persists across owner-task invocations, lives inside
/// [`MutexV4`]) and for the transient unlock/lock notification lists built
/// fresh on every `owner_task` call.
struct ReqList {
    head: *const Request,
    tail: *const Request,
}

impl ReqList {
    const fn new() -> Self {
        ReqList { head: ptr::null(), tail: ptr::null() }
    }

    fn empty(&self) -> bool {
        self.head.is_null()
    }

    fn push_back(&mut self, req: &Request) {
        req.next.store(ptr::null_mut(), Ordering::Relaxed);
        if self.tail.is_null() {
            self.head = req;
        } else {
            unsafe { (*self.tail).next.store(req as *const Request as *mut Request, Ordering::Relaxed) };
        }
        self.tail = req;
    }

    fn front(&self) -> Option<&Request> {
        if self.head.is_null() {
            None
        } else {
            Some(unsafe { &*self.head })
        }
    }

    fn back(&self) -> Option<&Request> {
        if self.tail.is_null() {
            None
        } else {
            Some(unsafe { &*self.tail })
        }
    }

    fn pop_front<'a>(&mut self) -> &'a Request {
        debug_assert!(!self.head.is_null());
        let p = self.head;
        let req: &'a Request = unsafe { &*p };
        self.head = req.next.load(Ordering::Relaxed);
        if self.head.is_null() {
            self.tail = ptr::null();
        }
        req
    }
}

/// One key's fair lock: header word, [`mcs::Queue`] submission chain, and
/// the owner-private pending-request FIFO.
pub struct MutexV4 {
    header: AtomicU64,
    queue: mcs::Queue<Request>,
    wq: core::cell::UnsafeCell<ReqList>,
}

unsafe impl Sync for MutexV4 {}
unsafe impl Send for MutexV4 {}

impl Default for MutexV4 {
    fn default() -> Self {
        Self::new()
    }
}

impl MutexV4 {
    pub const fn new() -> Self {
        MutexV4 { header: AtomicU64::new(0), queue: mcs::Queue::new(), wq: core::cell::UnsafeCell::new(ReqList::new()) }
    }

    fn load_header(&self) -> Header {
        let raw = self.header.load_acquire();
        if raw == 0 {
            Header::unlocked()
        } else {
            Header::unpack(raw)
        }
    }

    fn store_header(&self, h: Header) {
        self.header.store_release(h.pack());
    }

    fn do_request(&self, req: &Request) -> bool {
        let msg = self.queue.do_request_sync(req, |head, tail| self.owner_task(head, tail));
        debug_assert!(msg == Message::Succeeded || msg == Message::Failed);
        msg == Message::Succeeded
    }

    pub fn read_lock(&self, tx_id: TxId) -> bool {
        debug_assert!(tx_id != MAX_TXID);
        let h0 = self.load_header();
        let writer_exists = h0.is_write_locked() || (h0.is_read_locked() && h0.write_requests > 0);
        if writer_exists && h0.tx_id < tx_id {
            return false; // die
        }
        let req = Request::new(tx_id, RequestType::ReadLock);
        let ok = self.do_request(&req);
        if ok {
            log::trace!("v4 read_lock granted tx={tx_id}");
        }
        ok
    }

    pub fn write_lock(&self, tx_id: TxId) -> bool {
        debug_assert!(tx_id != MAX_TXID);
        let h0 = self.load_header();
        if h0.is_locked() && h0.tx_id < tx_id {
            return false; // die
        }
        let req = Request::new(tx_id, RequestType::WriteLock);
        let ok = self.do_request(&req);
        if ok {
            log::trace!("v4 write_lock granted tx={tx_id}");
        }
        ok
    }

    pub fn read_unlock(&self, tx_id: TxId) {
        let req = Request::new(tx_id, RequestType::ReadUnlock);
        let ok = self.do_request(&req);
        debug_assert!(ok);
    }

    pub fn write_unlock(&self, tx_id: TxId) {
        debug_assert!(self.load_header().is_write_locked());
        let req = Request::new(tx_id, RequestType::WriteUnlock);
        let ok = self.do_request(&req);
        debug_assert!(ok);
    }

    pub fn upgrade(&self, tx_id: TxId) -> bool {
        let h0 = self.load_header();
        if h0.readers != 1 || h0.write_requests != 0 {
            return false;
        }
        let req = Request::new(tx_id, RequestType::Upgrade);
        self.do_request(&req)
    }

    fn owner_task(&self, head: &Request, tail: &Request) {
        let wq: &mut ReqList = unsafe { &mut *self.wq.get() };

        let mut unlock_list = ReqList::new();
        let mut lock_list = ReqList::new();
        let mut nr_write_unlock = 0usize;
        let mut nr_read_unlock = 0usize;
        let mut nr_upgrade = 0usize;

        let h0 = self.load_header();
        let mut h1 = h0;

        // Dispatch pass: classify every request in the batch, in arrival order.
        let mut cur: *const Request = head as *const Request;
        loop {
            let req: &Request = unsafe { &*cur };
            let is_tail = cur == tail as *const Request;
            let next = if is_tail { None } else { Some(req.get_non_empty_next()) };

            if req.req_type.is_lock() {
                if !try_add_lock_req_to_wait_queue(&mut h1, wq, req) {
                    req.notify(Message::Failed);
                }
            } else if req.req_type.is_upgrade() {
                if !try_add_upgrade_req_to_wait_queue(&h1, wq, req) {
                    req.notify(Message::Failed);
                } else {
                    nr_upgrade += 1;
                }
            } else {
                debug_assert!(req.req_type.is_unlock());
                if req.req_type.is_write() {
                    nr_write_unlock += 1;
                } else {
                    nr_read_unlock += 1;
                }
                unlock_list.push_back(req);
            }

            match next {
                Some(n) => cur = n,
                None => break,
            }
        }
        debug_assert!(nr_upgrade <= 1);
        debug_assert!(nr_write_unlock <= 1);
        debug_assert!(nr_write_unlock == 0 || nr_read_unlock == 0);

        prepare_unlock_requests(&mut h1, nr_write_unlock, nr_read_unlock);
        let upgrade_req = if nr_upgrade == 0 { None } else { Some(prepare_upgrade_request(&mut h1, wq)) };
        prepare_lock_requests(&mut h1, wq, &mut lock_list);

        debug_assert!(!h1.is_unlocked() || (h1.write_requests == 0 && h1.tx_id == MAX_TXID));
        self.store_header(h1);

        notify_success_to_all(&mut unlock_list);
        if let Some(req) = upgrade_req {
            req.notify(Message::Succeeded);
        }
        notify_success_to_all(&mut lock_list);
    }
}

fn try_add_upgrade_req_to_wait_queue(h0: &Header, wq: &mut ReqList, req: &Request) -> bool {
    debug_assert!(req.req_type.is_upgrade());
    if h0.readers != 1 || !wq.empty() {
        return false;
    }
    wq.push_back(req);
    true
}

/// The wait-die policy expressed against the pending-request queue.
fn try_add_lock_req_to_wait_queue(h0: &mut Header, wq: &mut ReqList, req: &Request) -> bool {
    let tx_id = req.tx_id;
    if req.req_type.is_write() {
        if wq.empty() {
            // '<=' tolerates id reuse by a restarted transaction.
            if h0.is_unlocked() || tx_id <= h0.tx_id {
                debug_assert!(h0.write_requests < MAX_WRITE_REQUESTS);
                h0.write_requests += 1;
                wq.push_back(req);
                return true;
            }
            return false;
        }
        let back = wq.back().expect("checked non-empty above");
        let back_is_write = back.req_type.is_upgrade() || back.req_type == RequestType::WriteLock;
        let check_tx_id = if back_is_write { back.tx_id } else { back.read_tx_id() };
        if tx_id < check_tx_id {
            debug_assert!(h0.write_requests < MAX_WRITE_REQUESTS);
            h0.write_requests += 1;
            wq.push_back(req);
            return true;
        }
        return false;
    }

    debug_assert!(req.req_type.is_read());
    if wq.empty() {
        if h0.is_unlocked() || h0.is_read_locked() {
            debug_assert_eq!(req.write_tx_id(), MAX_TXID);
            req.set_read_tx_id(core::cmp::min(h0.tx_id, tx_id));
            wq.push_back(req);
            return true;
        }
        return false;
    }
    let back = wq.back().expect("checked non-empty above");
    let back_is_write = back.req_type.is_upgrade() || back.req_type == RequestType::WriteLock;
    if back_is_write {
        let back_tx_id = back.tx_id;
        if tx_id < back_tx_id {
            req.set_write_tx_id(back_tx_id);
            req.set_read_tx_id(tx_id);
            wq.push_back(req);
            return true;
        }
        return false;
    }
    debug_assert!(back.req_type.is_read());
    let back_write_tx_id = back.write_tx_id();
    if tx_id < back_write_tx_id {
        req.set_write_tx_id(back_write_tx_id);
        req.set_read_tx_id(core::cmp::min(tx_id, back.read_tx_id()));
        wq.push_back(req);
        return true;
    }
    false
}

fn prepare_unlock_requests(h0: &mut Header, nr_write: usize, nr_read: usize) {
    debug_assert!(nr_write == 0 || nr_read == 0);
    if nr_read != 0 {
        debug_assert!(h0.readers as usize >= nr_read);
        h0.readers -= nr_read as u32;
        if h0.readers == 0 {
            h0.tx_id = MAX_TXID;
        }
    } else if nr_write != 0 {
        debug_assert!(h0.is_write_locked());
        h0.write_locked = false;
        h0.tx_id = MAX_TXID;
    }
}

fn prepare_upgrade_request<'a>(h0: &mut Header, wq: &mut ReqList) -> &'a Request {
    debug_assert!(!wq.empty());
    let req: &'a Request = wq.pop_front();
    debug_assert!(req.req_type.is_upgrade());
    debug_assert_eq!(h0.readers, 1);
    debug_assert!(!h0.write_locked);
    h0.tx_id = req.tx_id;
    h0.write_locked = true;
    h0.readers = 0;
    req
}

fn prepare_lock_requests(h0: &mut Header, wq: &mut ReqList, lock_list: &mut ReqList) {
    if wq.empty() {
        return;
    }
    debug_assert!(lock_list.empty());
    let is_write = wq.front().expect("checked non-empty above").req_type.is_write();
    if is_write {
        if h0.is_locked() {
            return; // still waiting
        }
        move_write_request_to_lock_list(h0, wq, lock_list);
    } else {
        if h0.is_write_locked() {
            return; // still waiting
        }
        move_read_requests_to_lock_list(h0, wq, lock_list);
    }
}

fn move_write_request_to_lock_list(h0: &mut Header, wq: &mut ReqList, lock_list: &mut ReqList) {
    debug_assert!(wq.front().expect("non-empty").req_type.is_write());
    let req = wq.pop_front();
    h0.tx_id = req.tx_id;
    h0.write_locked = true;
    debug_assert!(h0.write_requests > 0);
    h0.write_requests -= 1;
    lock_list.push_back(req);
}

fn move_read_requests_to_lock_list(h0: &mut Header, wq: &mut ReqList, lock_list: &mut ReqList) {
    debug_assert!(wq.front().expect("non-empty").req_type.is_read());
    loop {
        let is_read_front = match wq.front() {
            Some(r) if r.req_type.is_read() => true,
            _ => false,
        };
        if !is_read_front {
            break;
        }
        if h0.readers >= MAX_READERS {
            // Reader count is already saturated: fail this one request
            // rather than letting it stall forever.
            let req = wq.pop_front();
            req.notify(Message::Failed);
        } else {
            let req = wq.pop_front();
            h0.readers += 1;
            h0.tx_id = core::cmp::min(h0.tx_id, req.tx_id);
            lock_list.push_back(req);
        }
        if wq.empty() {
            break;
        }
    }
}

fn notify_success_to_all(list: &mut ReqList) {
    while !list.empty() {
        let req = list.pop_front();
        req.notify(Message::Succeeded);
    }
}

/// Guard produced by [`MutexV4`].
pub struct GuardV4<'a> {
    mutex: Option<&'a MutexV4>,
    mode: LockMode,
    tx_id: TxId,
}

impl Default for GuardV4<'_> {
    fn default() -> Self {
        GuardV4 { mutex: None, mode: LockMode::Invalid, tx_id: MAX_TXID }
    }
}

impl Drop for GuardV4<'_> {
    fn drop(&mut self) {
        self.unlock();
    }
}

impl<'a> LockGuard<'a> for GuardV4<'a> {
    type Mutex = MutexV4;

    fn read_lock(&mut self, mutex: &'a Self::Mutex, tx_id: TxId) -> bool {
        if !mutex.read_lock(tx_id) {
            return false;
        }
        self.mutex = Some(mutex);
        self.mode = LockMode::Shared;
        self.tx_id = tx_id;
        true
    }

    fn write_lock(&mut self, mutex: &'a Self::Mutex, tx_id: TxId) -> bool {
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
            LockMode::Shared => self.mutex.expect("locked guard has a mutex").read_unlock(self.tx_id),
            LockMode::Exclusive => self.mutex.expect("locked guard has a mutex").write_unlock(self.tx_id),
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
    fn writer_waits_reader_both_prior_ok() {
        let mu = MutexV4::new();
        assert!(mu.read_lock(10));
        // T20's write_lock would block in a real thread; drive it via a
        // background thread so the full wait-then-grant handoff can be
        // observed end-to-end.
        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mu = std::sync::Arc::new(mu);
        let mu2 = mu.clone();
        let done2 = done.clone();
        let t = std::thread::spawn(move || {
            let ok = mu2.write_lock(20);
            done2.store(true, std::sync::atomic::Ordering::Release);
            ok
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!done.load(std::sync::atomic::Ordering::Acquire));
        mu.read_unlock(10);
        assert!(t.join().unwrap());
        let h = mu.load_header();
        assert_eq!(h.tx_id, 20);
        assert!(h.write_locked);
        mu.write_unlock(20);
    }

    #[test]
    fn young_writer_dies_then_retries() {
        let mu = MutexV4::new();
        assert!(mu.write_lock(10));
        assert!(!mu.write_lock(20)); // die: 10 < 20
        mu.write_unlock(10);
        assert!(mu.write_lock(20));
        mu.write_unlock(20);
    }

    #[test]
    fn upgrade_rejected_under_contention() {
        let mu = MutexV4::new();
        assert!(mu.read_lock(10));
        assert!(mu.read_lock(20));
        assert!(!mu.upgrade(10));
        mu.read_unlock(20);
        assert!(mu.upgrade(10));
        mu.write_unlock(10);
    }

    #[test]
    fn old_writer_waits_overtakes_younger_pending_readers() {
        let mu = MutexV4::new();
        assert!(mu.read_lock(50));

        let mu = std::sync::Arc::new(mu);
        let mu_w = mu.clone();
        let t30 = std::thread::spawn(move || mu_w.write_lock(30));
        std::thread::sleep(std::time::Duration::from_millis(20));

        // T40 dies: an older writer (30) is already queued ahead of it.
        assert!(!mu.read_lock(40));

        mu.read_unlock(50);
        assert!(t30.join().unwrap());
        mu.write_unlock(30);
    }

    #[test]
    fn write_requests_blocks_lower_priority_reader_sneak_in() {
        let mu = MutexV4::new();
        assert!(mu.read_lock(50));
        let mu = std::sync::Arc::new(mu);
        let mu_w = mu.clone();
        let t30 = std::thread::spawn(move || mu_w.write_lock(30));
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!mu.read_lock(60));
        mu.read_unlock(50);
        assert!(t30.join().unwrap());
        mu.write_unlock(30);
    }
}
