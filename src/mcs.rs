//! Generic MCS-like request-queue template: one waiter is elected owner
//! and performs queue maintenance on behalf of all others.
//!
//! This module has no notion of locks, tx-ids or wait-die at all — it only
//! guarantees that exactly one thread at a time runs `owner_task`, and that
//! ownership is never lost while a request is mid-enqueue. [`crate::mutex_v4`]
//! is the only consumer; everything lock-specific lives there.
//!
//! Request storage is never heap-allocated: callers submit a stack-local
//! node and block on it (or poll it) until a terminal message appears.

use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::atomic::{cpu_relax, exchange_usize};

/// `tail` has not been claimed by any request yet.
pub const UNOWNED: usize = 0;
/// `tail` is claimed, but the request that owns it has already finished
/// enqueuing and moved on to running `owner_task`; a newcomer must publish
/// itself through `head` instead of chaining off `tail`.
pub const OWNED: usize = 1;

/// What a node submitted to a [`Queue`] must provide. One impl per
/// request type; [`crate::mutex_v4::Request`] is the only one in this
/// crate, kept generic here because nothing below needs to know what a
/// "request" represents.
pub trait Node: Sized {
    /// Message delivered through [`Node::local_spin_wait`]; terminal once
    /// observed — it never transitions again.
    type Message: Copy + PartialEq;

    /// Publish `next` as the node logically following `self` in the queue.
    /// Called by whichever request discovers it was enqueued ahead of
    /// `next`.
    fn set_next(&self, next: *const Self);

    /// Hand ownership to this node (it was waiting in `head`).
    fn delegate_ownership(&self);

    /// Block until [`Node::delegate_ownership`] was called for this node.
    fn wait_for_ownership(&self);

    /// Block until a terminal message is published for this node, then
    /// consume it.
    fn local_spin_wait(&self) -> Self::Message;
}

/// The three-word queue state shared by a [`crate::mutex_v4::MutexV4`]: a
/// tagged `tail` (UNOWNED / OWNED / pointer) and a `head` used only during
/// the handoff window between the two tag states.
pub struct Queue<Req> {
    tail: AtomicUsize,
    head: AtomicPtr<Req>,
}

impl<Req: Node> Default for Queue<Req> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req: Node> Queue<Req> {
    pub const fn new() -> Self {
        Queue { tail: AtomicUsize::new(UNOWNED), head: AtomicPtr::new(ptr::null_mut()) }
    }

    fn release_owner(&self) {
        let t = self.tail.load(Ordering::Acquire);
        if t == OWNED
            && self.tail.compare_exchange(OWNED, UNOWNED, Ordering::AcqRel, Ordering::Acquire).is_ok()
        {
            return;
        }
        // A new request raced us and is mid-publish through `head`.
        loop {
            let h = self.head.load(Ordering::Acquire);
            if !h.is_null() {
                self.head.store(ptr::null_mut(), Ordering::Relaxed);
                unsafe { (&*h).delegate_ownership() };
                return;
            }
            cpu_relax();
        }
    }

    /// Runs `owner_task(head, tail)` exactly once, where `head..=tail`
    /// (walked through `Node::set_next`'s targets by the caller) is the
    /// maximal batch of requests that arrived while ownership was held.
    fn do_owner_task(&self, req: &Req, owner_task: impl FnOnce(&Req, &Req)) {
        let prev_tail = exchange_usize(&self.tail, OWNED);
        debug_assert_ne!(prev_tail, UNOWNED);
        let tail_req: &Req = unsafe { &*(prev_tail as *const Req) };
        owner_task(req, tail_req);
        self.release_owner();
    }

    /// Enqueue `req`; if this makes `req` the owner, runs `owner_task`
    /// before returning. Otherwise returns immediately, leaving the
    /// eventual owner to run `owner_task` on `req`'s behalf. The caller
    /// must poll [`Node::local_spin_wait`] afterwards to learn the
    /// outcome.
    pub fn do_request_async(&self, req: &Req, owner_task: impl FnOnce(&Req, &Req)) {
        let prev = self.tail.swap(req as *const Req as usize, Ordering::AcqRel);
        if prev == UNOWNED {
            self.do_owner_task(req, owner_task);
            return;
        }
        if prev == OWNED {
            self.head.store(req as *const Req as *mut Req, Ordering::Release);
            req.wait_for_ownership();
            self.do_owner_task(req, owner_task);
            return;
        }
        let prev_req: &Req = unsafe { &*(prev as *const Req) };
        prev_req.set_next(req as *const Req);
    }

    /// [`Queue::do_request_async`] followed by a blocking wait for `req`'s
    /// terminal message.
    pub fn do_request_sync(&self, req: &Req, owner_task: impl FnOnce(&Req, &Req)) -> Req::Message {
        self.do_request_async(req, owner_task);
        req.local_spin_wait()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use core::cell::Cell;
    use core::sync::atomic::AtomicU8;

    #[derive(Clone, Copy, PartialEq, Debug)]
    enum Msg {
        Waiting,
        Owner,
        Done(u32),
    }

    struct TestNode {
        next: AtomicPtr<TestNode>,
        receiver: AtomicU8, // 0 waiting, 1 owner, 2 done
        payload: Cell<u32>,
        id: u32,
    }

    impl TestNode {
        fn new(id: u32) -> Self {
            TestNode { next: AtomicPtr::new(ptr::null_mut()), receiver: AtomicU8::new(0), payload: Cell::new(0), id }
        }
    }

    impl Node for TestNode {
        type Message = Msg;

        fn set_next(&self, next: *const Self) {
            self.next.store(next as *mut Self, Ordering::Release);
        }

        fn delegate_ownership(&self) {
            self.receiver.store(1, Ordering::Release);
        }

        fn wait_for_ownership(&self) {
            while self.receiver.load(Ordering::Acquire) != 1 {
                cpu_relax();
            }
            self.receiver.store(0, Ordering::Relaxed);
        }

        fn local_spin_wait(&self) -> Msg {
            loop {
                let v = self.receiver.load(Ordering::Acquire);
                if v == 2 {
                    self.receiver.store(0, Ordering::Relaxed);
                    return Msg::Done(self.payload.get());
                }
                cpu_relax();
            }
        }
    }

    #[test]
    fn single_request_becomes_owner_immediately() {
        let q: Queue<TestNode> = Queue::new();
        let n = TestNode::new(1);
        let ran = Cell::new(false);
        let msg = q.do_request_sync(&n, |_head, tail| {
            ran.set(true);
            tail.payload.set(42);
            tail.receiver.store(2, Ordering::Release);
        });
        assert!(ran.get());
        assert_eq!(msg, Msg::Done(42));
    }

    #[test]
    fn second_request_chains_off_first_owner() {
        // Single-threaded simulation: manually drive the handoff protocol
        // the way two racing threads would, without actual concurrency.
        let q: Queue<TestNode> = Queue::new();
        let a = TestNode::new(1);
        let b = TestNode::new(2);

        // `a` enqueues first: tail UNOWNED -> a, becomes owner synchronously
        // only once we call do_request_async; we want to simulate `b`
        // arriving while `a` is still the registered tail (prev == &a), so
        // drive it manually via the same swap primitive the queue uses.
        let prev = q.tail.swap(&a as *const TestNode as usize, Ordering::AcqRel);
        assert_eq!(prev, UNOWNED);

        let prev_b = q.tail.swap(&b as *const TestNode as usize, Ordering::AcqRel);
        assert_eq!(prev_b, &a as *const TestNode as usize);
        a.set_next(&b as *const TestNode);

        // Now `a` runs do_owner_task and should see `b` via get_non_empty_next style walk.
        q.do_owner_task(&a, |head, tail| {
            assert_eq!(head.id, 1);
            assert_eq!(tail.id, 2);
            let mut cur: *const TestNode = head as *const TestNode;
            loop {
                let node = unsafe { &*cur };
                node.payload.set(node.id * 10);
                node.receiver.store(2, Ordering::Release);
                if cur == tail as *const TestNode {
                    break;
                }
                cur = node.next.load(Ordering::Acquire);
            }
        });

        assert_eq!(a.local_spin_wait(), Msg::Done(10));
        assert_eq!(b.local_spin_wait(), Msg::Done(20));
    }
}
