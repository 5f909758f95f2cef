//! Two-lock linked blocking queue with a runtime-mutable capacity bound.
//!
//! Layout follows the classic dual-lock design: a singly-linked chain with
//! a dummy head, a put-side lock owning the tail pointer and a take-side
//! lock owning the head pointer, with one condvar per side. `count` is
//! atomic so each side can read occupancy without the other side's lock.
//!
//! Locking protocol:
//! - enqueue happens only under the put lock, dequeue only under the take
//!   lock;
//! - any operation that needs a consistent view of the whole chain
//!   (resize, scan, remove, clear, iteration) takes both locks, always
//!   take-then-put;
//! - `not_empty` is signalled by a put that transitions the queue from
//!   empty, `not_full` by a take that transitions it from full, plus
//!   cascading signals on each side while room/items remain.
//!
//! Capacity is only checked in wait predicates, which read the live value,
//! so a resize takes effect for every subsequent operation without waking
//! anyone itself. Shrinking below the current occupancy is allowed; the
//! queue keeps its contents and `remaining_capacity` goes negative until
//! takes drain it back under the bound.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

struct Node<T> {
    item: Option<T>,
    next: Option<NonNull<Node<T>>>,
}

impl<T> Node<T> {
    fn alloc(item: Option<T>) -> NonNull<Node<T>> {
        // Box never returns null.
        unsafe { NonNull::new_unchecked(Box::into_raw(Box::new(Node { item, next: None }))) }
    }

    unsafe fn free(ptr: NonNull<Node<T>>) {
        drop(Box::from_raw(ptr.as_ptr()));
    }
}

/// Owned by the put lock. `tail.next` is always `None`.
struct PutSide<T> {
    tail: NonNull<Node<T>>,
}

/// Owned by the take lock. `head` is a dummy node; `head.item` is `None`
/// and the first real element is `head.next`.
struct TakeSide<T> {
    head: NonNull<Node<T>>,
}

/// A FIFO blocking queue whose capacity bound can change at runtime.
///
/// `len() <= capacity()` holds except transiently after a shrink below the
/// current occupancy, in which case [`remaining_capacity`] reports a
/// negative value and further inserts block or fail fast until occupancy
/// drops back under the bound.
///
/// [`remaining_capacity`]: ResizableQueue::remaining_capacity
pub struct ResizableQueue<T> {
    capacity: AtomicUsize,
    count: AtomicUsize,
    take_side: Mutex<TakeSide<T>>,
    not_empty: Condvar,
    put_side: Mutex<PutSide<T>>,
    not_full: Condvar,
}

// The chain is only touched under the side locks; items cross threads
// through the queue, hence T: Send on both impls.
unsafe impl<T: Send> Send for ResizableQueue<T> {}
unsafe impl<T: Send> Sync for ResizableQueue<T> {}

impl<T> ResizableQueue<T> {
    /// Create a queue bounded at `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. A later [`set_capacity`] may shrink
    /// the bound to zero; only construction requires a positive value.
    ///
    /// [`set_capacity`]: ResizableQueue::set_capacity
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        let dummy = Node::alloc(None);
        Self {
            capacity: AtomicUsize::new(capacity),
            count: AtomicUsize::new(0),
            take_side: Mutex::new(TakeSide { head: dummy }),
            not_empty: Condvar::new(),
            put_side: Mutex::new(PutSide { tail: dummy }),
            not_full: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    /// `capacity - len`; negative after a shrink below current occupancy.
    pub fn remaining_capacity(&self) -> isize {
        self.capacity.load(Ordering::SeqCst) as isize - self.count.load(Ordering::SeqCst) as isize
    }

    /// Replace the capacity bound.
    ///
    /// Takes both locks so no insert or removal is mid-flight while the
    /// bound moves. Waiters are not woken here; their wait predicates read
    /// the live capacity on the next signal.
    pub fn set_capacity(&self, capacity: usize) {
        let _take = self.take_side.lock();
        let _put = self.put_side.lock();
        let old = self.capacity.swap(capacity, Ordering::SeqCst);
        debug!(old, new = capacity, "queue capacity changed");
    }

    // ------------------------------------------------------------------
    // Put side
    // ------------------------------------------------------------------

    /// Insert, blocking while the queue is at capacity.
    pub fn put(&self, item: T) {
        let node = Node::alloc(Some(item));
        let mut put = self.put_side.lock();
        while self.count.load(Ordering::SeqCst) >= self.capacity.load(Ordering::SeqCst) {
            self.not_full.wait(&mut put);
        }
        let prev = unsafe { self.enqueue(&mut put, node) };
        drop(put);
        if prev == 0 {
            self.signal_not_empty();
        }
    }

    /// Non-blocking insert; hands the item back if the queue is at
    /// capacity.
    pub fn offer(&self, item: T) -> Result<(), T> {
        if self.count.load(Ordering::SeqCst) >= self.capacity.load(Ordering::SeqCst) {
            return Err(item);
        }
        let mut put = self.put_side.lock();
        if self.count.load(Ordering::SeqCst) >= self.capacity.load(Ordering::SeqCst) {
            return Err(item);
        }
        let node = Node::alloc(Some(item));
        let prev = unsafe { self.enqueue(&mut put, node) };
        drop(put);
        if prev == 0 {
            self.signal_not_empty();
        }
        Ok(())
    }

    /// Insert, blocking up to `timeout`; hands the item back if the
    /// deadline elapses with the queue still at capacity.
    pub fn offer_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut put = self.put_side.lock();
        while self.count.load(Ordering::SeqCst) >= self.capacity.load(Ordering::SeqCst) {
            if self.not_full.wait_until(&mut put, deadline).timed_out()
                && self.count.load(Ordering::SeqCst) >= self.capacity.load(Ordering::SeqCst)
            {
                return Err(item);
            }
        }
        let node = Node::alloc(Some(item));
        let prev = unsafe { self.enqueue(&mut put, node) };
        drop(put);
        if prev == 0 {
            self.signal_not_empty();
        }
        Ok(())
    }

    /// Link `node` at the tail. Put lock must be held. Returns the element
    /// count before the insert.
    unsafe fn enqueue(&self, put: &mut PutSide<T>, node: NonNull<Node<T>>) -> usize {
        put.tail.as_mut().next = Some(node);
        put.tail = node;
        let prev = self.count.fetch_add(1, Ordering::SeqCst);
        if prev + 1 < self.capacity.load(Ordering::SeqCst) {
            self.not_full.notify_one();
        }
        prev
    }

    // ------------------------------------------------------------------
    // Take side
    // ------------------------------------------------------------------

    /// Remove the head element, blocking while the queue is empty.
    pub fn take(&self) -> T {
        let mut take = self.take_side.lock();
        while self.count.load(Ordering::SeqCst) == 0 {
            self.not_empty.wait(&mut take);
        }
        let (item, prev) = unsafe { self.dequeue(&mut take) };
        if prev > 1 {
            self.not_empty.notify_one();
        }
        drop(take);
        if prev == self.capacity.load(Ordering::SeqCst) {
            self.signal_not_full();
        }
        item
    }

    /// Non-blocking removal; `None` if the queue is empty.
    pub fn poll(&self) -> Option<T> {
        if self.count.load(Ordering::SeqCst) == 0 {
            return None;
        }
        let mut take = self.take_side.lock();
        if self.count.load(Ordering::SeqCst) == 0 {
            return None;
        }
        let (item, prev) = unsafe { self.dequeue(&mut take) };
        if prev > 1 {
            self.not_empty.notify_one();
        }
        drop(take);
        if prev == self.capacity.load(Ordering::SeqCst) {
            self.signal_not_full();
        }
        Some(item)
    }

    /// Removal bounded by a deadline, with remaining-time semantics across
    /// spurious wakeups.
    pub fn poll_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut take = self.take_side.lock();
        while self.count.load(Ordering::SeqCst) == 0 {
            if self.not_empty.wait_until(&mut take, deadline).timed_out()
                && self.count.load(Ordering::SeqCst) == 0
            {
                return None;
            }
        }
        let (item, prev) = unsafe { self.dequeue(&mut take) };
        if prev > 1 {
            self.not_empty.notify_one();
        }
        drop(take);
        if prev == self.capacity.load(Ordering::SeqCst) {
            self.signal_not_full();
        }
        Some(item)
    }

    /// Unlink the head successor. Take lock must be held and the queue
    /// must be non-empty. Returns the item and the element count before
    /// the removal; signalling is the caller's business.
    unsafe fn dequeue(&self, take: &mut TakeSide<T>) -> (T, usize) {
        let old_dummy = take.head;
        // count > 0 guarantees a linked successor.
        let mut first = old_dummy.as_ref().next.expect("non-empty queue has a head successor");
        let item = first.as_mut().item.take().expect("chain nodes always carry an item");
        take.head = first;
        Node::free(old_dummy);
        let prev = self.count.fetch_sub(1, Ordering::SeqCst);
        (item, prev)
    }

    /// Copy of the head element without removing it.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        if self.count.load(Ordering::SeqCst) == 0 {
            return None;
        }
        let take = self.take_side.lock();
        // Re-check under the lock. A positive count orders this read after
        // the put that linked the head successor; reading `head.next` on an
        // empty queue would race a concurrent enqueue through the shared
        // dummy node.
        if self.count.load(Ordering::SeqCst) == 0 {
            return None;
        }
        unsafe {
            let first = take.head.as_ref().next.expect("non-empty queue has a head successor");
            Some(first.as_ref().item.clone().expect("chain nodes always carry an item"))
        }
    }

    /// Remove up to `max` elements from the head.
    ///
    /// Only the take lock is needed: removal never touches the tail as
    /// long as at least the dummy node remains.
    pub fn drain(&self, max: usize) -> Vec<T> {
        let mut take = self.take_side.lock();
        let n = max.min(self.count.load(Ordering::SeqCst));
        let mut drained = Vec::with_capacity(n);
        let mut was_full = false;
        for _ in 0..n {
            let (item, prev) = unsafe { self.dequeue(&mut take) };
            was_full |= prev == self.capacity.load(Ordering::SeqCst);
            drained.push(item);
        }
        drop(take);
        if was_full {
            self.signal_not_full();
        }
        drained
    }

    /// Remove every element currently in the queue.
    pub fn drain_all(&self) -> Vec<T> {
        self.drain(usize::MAX)
    }

    // ------------------------------------------------------------------
    // Whole-structure operations (both locks, take-then-put)
    // ------------------------------------------------------------------

    /// Remove the first element equal to `item`.
    pub fn remove(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        let take = self.take_side.lock();
        let mut put = self.put_side.lock();
        unsafe {
            let mut trail = take.head;
            while let Some(p) = trail.as_ref().next {
                if p.as_ref().item.as_ref() == Some(item) {
                    self.unlink(&mut put, trail, p);
                    return true;
                }
                trail = p;
            }
        }
        false
    }

    /// Whether any element equals `item`.
    pub fn contains(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        let take = self.take_side.lock();
        let _put = self.put_side.lock();
        unsafe {
            let mut cursor = take.head.as_ref().next;
            while let Some(p) = cursor {
                if p.as_ref().item.as_ref() == Some(item) {
                    return true;
                }
                cursor = p.as_ref().next;
            }
        }
        false
    }

    /// Snapshot of the queue contents in FIFO order.
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        let take = self.take_side.lock();
        let _put = self.put_side.lock();
        let mut items = Vec::with_capacity(self.count.load(Ordering::SeqCst));
        unsafe {
            let mut cursor = take.head.as_ref().next;
            while let Some(p) = cursor {
                items.push(p.as_ref().item.clone().expect("chain nodes always carry an item"));
                cursor = p.as_ref().next;
            }
        }
        items
    }

    /// Drop every queued element.
    pub fn clear(&self) {
        let mut take = self.take_side.lock();
        let mut put = self.put_side.lock();
        unsafe {
            let mut cursor = take.head.as_mut().next.take();
            while let Some(p) = cursor {
                cursor = p.as_ref().next;
                Node::free(p);
            }
            put.tail = take.head;
        }
        let prev = self.count.swap(0, Ordering::SeqCst);
        if prev >= self.capacity.load(Ordering::SeqCst) {
            self.not_full.notify_one();
        }
    }

    /// Cursor over the queue contents.
    ///
    /// The cursor holds both locks for its whole lifetime, so the view is
    /// fully consistent and [`Iter::remove_last`] can unlink safely; all
    /// other queue operations block until it is dropped.
    pub fn iter(&self) -> Iter<'_, T> {
        let take = self.take_side.lock();
        let put = self.put_side.lock();
        let cursor = take.head;
        Iter {
            queue: self,
            _take: take,
            put,
            cursor,
            last: None,
            prev_of_last: None,
        }
    }

    /// Unlink interior node `p`, whose predecessor is `trail`. Both locks
    /// must be held.
    unsafe fn unlink(&self, put: &mut PutSide<T>, mut trail: NonNull<Node<T>>, p: NonNull<Node<T>>) {
        trail.as_mut().next = p.as_ref().next;
        if put.tail == p {
            put.tail = trail;
        }
        Node::free(p);
        let prev = self.count.fetch_sub(1, Ordering::SeqCst);
        if prev == self.capacity.load(Ordering::SeqCst) {
            self.not_full.notify_one();
        }
    }

    fn signal_not_empty(&self) {
        let _take = self.take_side.lock();
        self.not_empty.notify_one();
    }

    fn signal_not_full(&self) {
        let _put = self.put_side.lock();
        self.not_full.notify_one();
    }
}

impl<T> Drop for ResizableQueue<T> {
    fn drop(&mut self) {
        let take = self.take_side.get_mut();
        unsafe {
            let mut cursor = Some(take.head);
            while let Some(p) = cursor {
                cursor = p.as_ref().next;
                Node::free(p);
            }
        }
    }
}

impl<T> fmt::Debug for ResizableQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResizableQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Lock-holding cursor returned by [`ResizableQueue::iter`].
///
/// Not a `std::iter::Iterator`: each element borrows from the cursor so
/// the chain cannot outlive the locks that protect it.
pub struct Iter<'a, T> {
    queue: &'a ResizableQueue<T>,
    _take: MutexGuard<'a, TakeSide<T>>,
    put: MutexGuard<'a, PutSide<T>>,
    cursor: NonNull<Node<T>>,
    last: Option<NonNull<Node<T>>>,
    prev_of_last: Option<NonNull<Node<T>>>,
}

impl<'a, T> Iter<'a, T> {
    /// Advance to the next element.
    pub fn next(&mut self) -> Option<&T> {
        let next = unsafe { self.cursor.as_ref().next }?;
        self.prev_of_last = Some(self.cursor);
        self.last = Some(next);
        self.cursor = next;
        unsafe { Some(next.as_ref().item.as_ref().expect("chain nodes always carry an item")) }
    }

    /// Unlink the element most recently returned by [`next`](Self::next).
    ///
    /// Returns `false` if nothing has been yielded yet or the last element
    /// was already removed.
    pub fn remove_last(&mut self) -> bool {
        let (Some(last), Some(prev)) = (self.last.take(), self.prev_of_last.take()) else {
            return false;
        };
        unsafe {
            self.queue.unlink(&mut self.put, prev, last);
        }
        self.cursor = prev;
        true
    }
}
