//! The broadcast port queue (spec §4.7) — the centerpiece of the runtime.
//!
//! A single producer stream is delivered in full to every active consumer
//! without copying payload and without the slowest consumer causing data
//! loss. Unlike a classical MPMC queue, an element stays addressable until
//! every subscriber has passed it; the producer is throttled by the
//! slowest consumer instead.
//!
//! Every mutating operation — register/unregister, push, pop — holds the
//! same inter-process mutex for its whole critical section. This is a
//! stronger guarantee than spec §4.7's described `Release`/`Acquire`
//! protocol strictly requires for the fast path, but a `pthread_mutex_lock`/
//! `unlock` pair already provides the needed acquire/release barriers, and
//! serializing the `min_head` scan against per-consumer head advances is
//! what rules out the producer and a `pop` racing to miscount a refcount
//! (spec §4.7 "the inter-process mutex serializes the `min_head`
//! computation... so that an `unregister` racing with a `push` never
//! double-counts").

use std::time::Duration;

use flowmem_alloc::Allocator;
use flowmem_shm::{Segment, ShmCondvar, ShmMutex};
use flowmem_types::{BufferId, ConsumerId, Error, Result, MAX_CONSUMERS};

const QUEUE_MAGIC: u64 = 0x464c_4f57_4d51_5545; // "FLOWMQUE"
const QUEUE_VERSION: u32 = 1;
const ALIGN: usize = 64;

fn align_up(n: usize) -> usize {
    (n + ALIGN - 1) / ALIGN * ALIGN
}

struct QueueState {
    tail: u64,
    consumer_heads: [u64; MAX_CONSUMERS],
    consumer_active: [bool; MAX_CONSUMERS],
    consumer_count: u32,
    closed: bool,
}

impl QueueState {
    const EMPTY: Self = Self {
        tail: 0,
        consumer_heads: [0; MAX_CONSUMERS],
        consumer_active: [false; MAX_CONSUMERS],
        consumer_count: 0,
        closed: false,
    };

    fn min_head(&self) -> u64 {
        if self.consumer_count == 0 {
            return self.tail;
        }
        self.consumer_heads
            .iter()
            .zip(self.consumer_active.iter())
            .filter(|(_, active)| **active)
            .map(|(head, _)| *head)
            .min()
            .unwrap_or(self.tail)
    }
}

#[repr(C)]
struct QueueHeader {
    magic: u64,
    version: u32,
    capacity: u32,
    mutex: ShmMutex<QueueState>,
    not_full: ShmCondvar,
    not_empty: ShmCondvar,
}

#[derive(Clone, Copy)]
struct QueueLayout {
    header_size: usize,
    slots_offset: usize,
    total_size: usize,
}

impl QueueLayout {
    fn compute(capacity: u32) -> Self {
        let header_size = align_up(std::mem::size_of::<QueueHeader>());
        let slots_offset = header_size;
        let slots_size = align_up(capacity as usize * std::mem::size_of::<u64>());
        Self { header_size, slots_offset, total_size: slots_offset + slots_size }
    }
}

/// Which wait policy a push/pop call uses when the queue is full/empty.
enum Wait {
    None,
    Forever,
    Timeout(Duration),
}

/// A mapped handle to one connection's broadcast port queue.
pub struct PortQueue {
    segment: Segment,
    layout: QueueLayout,
    capacity: u32,
}

impl PortQueue {
    /// Creates a new queue segment of the given ring capacity. Called by
    /// whichever process first connects the two ports (spec §4.10
    /// `connect`: "ensure a port queue exists... if not").
    pub fn create(name: &str, capacity: u32) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid_arg("queue capacity must be > 0"));
        }
        let layout = QueueLayout::compute(capacity);
        let segment = Segment::create(name, layout.total_size)?;
        unsafe {
            let header_ptr = segment.as_mut_ptr_typed::<QueueHeader>();
            std::ptr::addr_of_mut!((*header_ptr).magic).write(QUEUE_MAGIC);
            std::ptr::addr_of_mut!((*header_ptr).version).write(QUEUE_VERSION);
            std::ptr::addr_of_mut!((*header_ptr).capacity).write(capacity);
            ShmMutex::init_in_place(std::ptr::addr_of_mut!((*header_ptr).mutex), QueueState::EMPTY)?;
            ShmCondvar::init_in_place(std::ptr::addr_of_mut!((*header_ptr).not_full))?;
            ShmCondvar::init_in_place(std::ptr::addr_of_mut!((*header_ptr).not_empty))?;
        }
        Ok(Self { segment, layout, capacity })
    }

    /// Opens a queue segment created by another process. `capacity` must
    /// match what the creator used.
    pub fn open(name: &str, capacity: u32) -> Result<Self> {
        let layout = QueueLayout::compute(capacity);
        let segment = Segment::open(name, layout.total_size)?;
        let header = unsafe { segment.as_ref::<QueueHeader>() };
        if header.magic != QUEUE_MAGIC || header.version != QUEUE_VERSION {
            return Err(Error::invalid_arg("queue segment header mismatch"));
        }
        if header.capacity != capacity {
            return Err(Error::invalid_arg("queue capacity mismatch with existing segment"));
        }
        Ok(Self { segment, layout, capacity })
    }

    fn header(&self) -> &QueueHeader {
        unsafe { self.segment.as_ref::<QueueHeader>() }
    }

    fn slot_mut(&self, position: u64) -> *mut u64 {
        let index = (position % u64::from(self.capacity)) as usize;
        unsafe { (self.segment.as_mut_ptr().add(self.layout.slots_offset) as *mut u64).add(index) }
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Scans for an inactive consumer slot, starts it at "now" (`head :=
    /// tail`, so it only sees future pushes), and activates it.
    pub fn register_consumer(&self) -> Result<ConsumerId> {
        let header = self.header();
        let mut state = header.mutex.lock();
        let slot = state
            .consumer_active
            .iter()
            .position(|active| !active)
            .ok_or_else(|| Error::exhausted("port queue has no free consumer slots"))?;
        state.consumer_heads[slot] = state.tail;
        state.consumer_active[slot] = true;
        state.consumer_count += 1;
        Ok(ConsumerId::new(slot as u32))
    }

    /// Releases every refcount this consumer still owed for slots between
    /// its head and `tail`, then frees its slot (spec §4.7 invariant 4).
    pub fn unregister_consumer(&self, id: ConsumerId, allocator: &Allocator) -> Result<()> {
        let header = self.header();
        let slot = id.get() as usize;
        let pending: Vec<u64> = {
            let mut state = header.mutex.lock();
            if slot >= MAX_CONSUMERS || !state.consumer_active[slot] {
                return Err(Error::not_found(format!("consumer {id}")));
            }
            let mut ids = Vec::new();
            let mut pos = state.consumer_heads[slot];
            while pos < state.tail {
                ids.push(unsafe { *self.slot_mut(pos) });
                pos += 1;
            }
            // Deactivate before releasing the lock: a `push` that observes
            // `consumer_count` after this point must not count this slot,
            // since its refcount share is already captured in `ids` above.
            state.consumer_active[slot] = false;
            state.consumer_heads[slot] = 0;
            state.consumer_count -= 1;
            ids
        };
        for raw in pending {
            let _ = allocator.decrement(BufferId::new(raw));
        }
        header.not_full.notify_all();
        Ok(())
    }

    /// Non-blocking push; returns `FULL` immediately if the ring has no
    /// room, rather than waiting.
    pub fn try_push(&self, id: BufferId, allocator: &Allocator) -> Result<()> {
        self.push_impl(id, allocator, Wait::None)
    }

    /// Blocks until there is room (or the queue is closed).
    pub fn push(&self, id: BufferId, allocator: &Allocator) -> Result<()> {
        self.push_impl(id, allocator, Wait::Forever)
    }

    /// Blocks up to `timeout` waiting for room.
    pub fn push_with_timeout(&self, id: BufferId, allocator: &Allocator, timeout: Duration) -> Result<()> {
        self.push_impl(id, allocator, Wait::Timeout(timeout))
    }

    fn push_impl(&self, id: BufferId, allocator: &Allocator, wait: Wait) -> Result<()> {
        let header = self.header();
        let mut state = header.mutex.lock();
        loop {
            if state.closed {
                return Err(Error::Closed);
            }
            let min_head = state.min_head();
            if state.tail - min_head < u64::from(self.capacity) {
                break;
            }
            match wait {
                Wait::None => return Err(Error::Full),
                Wait::Forever => {
                    state = header.not_full.wait(state);
                }
                Wait::Timeout(timeout) => {
                    let (next, woke) = header.not_full.wait_timeout(state, timeout);
                    state = next;
                    if !woke {
                        return Err(Error::Timeout(timeout));
                    }
                }
            }
        }

        let tail = state.tail;
        unsafe {
            *self.slot_mut(tail) = id.get();
        }
        // The buffer arrives with refcount 1, owed to the first consumer;
        // every additional active consumer needs its own (spec §4.7 push).
        let extra_consumers = state.consumer_count.saturating_sub(1);
        for _ in 0..extra_consumers {
            allocator.increment(id)?;
        }
        state.tail = tail + 1;
        drop(state);
        header.not_empty.notify_all();
        Ok(())
    }

    /// Non-blocking pop; returns `EMPTY` immediately if nothing is pending.
    pub fn try_pop(&self, id: ConsumerId) -> Result<BufferId> {
        self.pop_impl(id, Wait::None)
    }

    /// Blocks until an element is available (or the queue is closed and
    /// drained).
    pub fn pop(&self, id: ConsumerId) -> Result<BufferId> {
        self.pop_impl(id, Wait::Forever)
    }

    /// Blocks up to `timeout` waiting for an element.
    pub fn pop_with_timeout(&self, id: ConsumerId, timeout: Duration) -> Result<BufferId> {
        self.pop_impl(id, Wait::Timeout(timeout))
    }

    fn pop_impl(&self, id: ConsumerId, wait: Wait) -> Result<BufferId> {
        let header = self.header();
        let slot = id.get() as usize;
        let mut state = header.mutex.lock();
        if slot >= MAX_CONSUMERS || !state.consumer_active[slot] {
            return Err(Error::not_found(format!("consumer {id}")));
        }
        loop {
            let head = state.consumer_heads[slot];
            if head < state.tail {
                break;
            }
            if state.closed {
                return Err(Error::Closed);
            }
            match wait {
                Wait::None => return Err(Error::Empty),
                Wait::Forever => {
                    state = header.not_empty.wait(state);
                }
                Wait::Timeout(timeout) => {
                    let (next, woke) = header.not_empty.wait_timeout(state, timeout);
                    state = next;
                    if !woke {
                        return Err(Error::Timeout(timeout));
                    }
                }
            }
        }

        let head = state.consumer_heads[slot];
        let raw = unsafe { *self.slot_mut(head) };
        let prior_min_head = state.min_head();
        state.consumer_heads[slot] = head + 1;
        let new_min_head = state.min_head();
        let was_unique_slowest = head == prior_min_head && new_min_head > prior_min_head;
        drop(state);
        if was_unique_slowest {
            header.not_full.notify_all();
        }
        Ok(BufferId::new(raw))
    }

    /// Marks the queue closed and wakes every waiter; subsequent pushes
    /// fail `CLOSED`, pending pops still drain before seeing `CLOSED`.
    pub fn close(&self) {
        let header = self.header();
        {
            let mut state = header.mutex.lock();
            state.closed = true;
        }
        header.not_full.notify_all();
        header.not_empty.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmem_alloc::Allocator;
    use flowmem_buffer::Pool;
    use flowmem_registry::GlobalRegistry;
    use flowmem_shm::unlink_segment;
    use flowmem_types::ProcessId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique_name(tag: &str) -> String {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("/flowmem-test-queue-{tag}-{}-{n}", std::process::id())
    }

    struct Fixture {
        queue_name: String,
        registry_name: String,
        pool_name: String,
        allocator: Arc<Allocator>,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            unlink_segment(&self.queue_name).ok();
            unlink_segment(&self.pool_name).ok();
            unlink_segment(&self.registry_name).ok();
        }
    }

    fn setup() -> (PortQueue, Fixture) {
        let registry_name = unique_name("registry");
        let pool_name = unique_name("pool");
        let queue_name = unique_name("queue");
        let registry = GlobalRegistry::open_or_create_at(&registry_name).expect("registry");
        let pool_id = registry.pools().register(&pool_name, 64, 64).expect("register pool");
        Pool::create(&pool_name, pool_id, 64, 64).expect("create pool segment");
        let allocator = Arc::new(Allocator::new(registry, ProcessId::new(0)));
        let queue = PortQueue::create(&queue_name, 4).expect("create queue");
        (queue, Fixture { queue_name, registry_name, pool_name, allocator })
    }

    #[test]
    fn single_consumer_round_trips() {
        let (queue, fx) = setup();
        let consumer = queue.register_consumer().expect("register");
        let id = fx.allocator.allocate(8).expect("allocate");
        queue.push(id, &fx.allocator).expect("push");
        let popped = queue.pop(consumer).expect("pop");
        assert_eq!(popped, id);
        fx.allocator.decrement(popped).expect("decrement");
    }

    #[test]
    fn broadcast_delivers_to_every_consumer() {
        let (queue, fx) = setup();
        let c1 = queue.register_consumer().expect("c1");
        let c2 = queue.register_consumer().expect("c2");
        let id = fx.allocator.allocate(8).expect("allocate");
        queue.push(id, &fx.allocator).expect("push");

        let entry = fx.allocator.registry().buffers().entry(id.slot()).unwrap();
        assert_eq!(entry.refcount(), 2);

        assert_eq!(queue.try_pop(c1).expect("pop c1"), id);
        assert_eq!(queue.try_pop(c2).expect("pop c2"), id);
        fx.allocator.decrement(id).expect("dec c1");
        fx.allocator.decrement(id).expect("dec c2");
        assert!(!entry.is_valid());
    }

    #[test]
    fn back_pressure_reports_full() {
        let (queue, fx) = setup();
        let slow = queue.register_consumer().expect("register");
        for _ in 0..queue.capacity() {
            let id = fx.allocator.allocate(8).expect("allocate");
            queue.try_push(id, &fx.allocator).expect("push");
        }
        let overflow = fx.allocator.allocate(8).expect("allocate");
        assert!(matches!(queue.try_push(overflow, &fx.allocator), Err(Error::Full)));

        let popped = queue.try_pop(slow).expect("pop");
        fx.allocator.decrement(popped).expect("decrement");
        queue.try_push(overflow, &fx.allocator).expect("push after drain");
    }

    #[test]
    fn unregister_mid_stream_releases_pending_refcounts() {
        let (queue, fx) = setup();
        let c1 = queue.register_consumer().expect("c1");
        let c2 = queue.register_consumer().expect("c2");
        let id = fx.allocator.allocate(8).expect("allocate");
        queue.push(id, &fx.allocator).expect("push");

        queue.unregister_consumer(c2, &fx.allocator).expect("unregister c2");
        let entry = fx.allocator.registry().buffers().entry(id.slot()).unwrap();
        assert_eq!(entry.refcount(), 1);

        let popped = queue.try_pop(c1).expect("pop c1");
        fx.allocator.decrement(popped).expect("decrement");
        assert!(!entry.is_valid());
    }

    #[test]
    fn register_then_immediately_unregister_leaves_no_trace() {
        let (queue, fx) = setup();
        let before = queue.register_consumer().expect("baseline");
        let id = fx.allocator.allocate(8).expect("allocate");
        queue.push(id, &fx.allocator).expect("push");
        let entry = fx.allocator.registry().buffers().entry(id.slot()).unwrap();
        let refcount_before = entry.refcount();

        let probe = queue.register_consumer().expect("register");
        queue.unregister_consumer(probe, &fx.allocator).expect("unregister");

        assert_eq!(entry.refcount(), refcount_before);
        let reused = queue.register_consumer().expect("slot reusable");
        assert_eq!(reused, probe);

        queue.unregister_consumer(reused, &fx.allocator).ok();
        let popped = queue.try_pop(before).expect("original consumer unaffected");
        fx.allocator.decrement(popped).expect("decrement");
    }

    #[test]
    fn close_is_idempotent() {
        let (queue, fx) = setup();
        let consumer = queue.register_consumer().expect("register");
        let id = fx.allocator.allocate(8).expect("allocate");
        queue.push(id, &fx.allocator).expect("push");

        queue.close();
        queue.close();

        assert!(matches!(queue.try_push(id, &fx.allocator), Err(Error::Closed)));
        let popped = queue.try_pop(consumer).expect("drain pending");
        fx.allocator.decrement(popped).expect("decrement");
        assert!(matches!(queue.try_pop(consumer), Err(Error::Closed)));
    }

    #[test]
    fn close_fails_subsequent_pushes_and_drains_pending_pops() {
        let (queue, fx) = setup();
        let consumer = queue.register_consumer().expect("register");
        let id = fx.allocator.allocate(8).expect("allocate");
        queue.push(id, &fx.allocator).expect("push");
        queue.close();

        assert!(matches!(queue.try_push(id, &fx.allocator), Err(Error::Closed)));
        let popped = queue.try_pop(consumer).expect("drain pending");
        assert_eq!(popped, id);
        fx.allocator.decrement(popped).expect("decrement");
        assert!(matches!(queue.try_pop(consumer), Err(Error::Closed)));
    }
}
