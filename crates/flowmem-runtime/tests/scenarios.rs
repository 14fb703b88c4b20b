//! End-to-end dataflow scenarios driven through `Runtime`, exercising the
//! literal walkthroughs a block author would hit in practice: a single
//! producer/consumer pair, a broadcast fan-out, back-pressure, a consumer
//! dropping out mid-stream, a diamond topology built from the conformance
//! blocks, and an approximation of two processes sharing one connection.
//!
//! Every block here is driven by calling `Block::work()` directly rather
//! than through `Scheduler`'s worker threads — deterministic control over
//! when each block runs is what makes these scenarios checkable at all.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use flowmem_alloc::BufferHandle;
use flowmem_block::{Block, InputPort, OutputPort};
use flowmem_demo_blocks::{Amplifier, NullSink, NullSource};
use flowmem_queue::PortQueue;
use flowmem_runtime::{PoolConfig, Runtime, ShmManagerConfig};
use flowmem_shm::unlink_segment;
use flowmem_types::{BlockId, FixedName, WorkResult};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_prefix(tag: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("/flowmem-scenario-{tag}-{}-{n}", std::process::id())
}

/// A runtime plus every segment name it touched, unlinked on drop.
struct Harness {
    runtime: Runtime,
    extra_segments: Vec<String>,
}

impl Harness {
    fn new(tag: &str, pools: Vec<PoolConfig>) -> Self {
        let prefix = unique_prefix(tag);
        let config = ShmManagerConfig { segment_prefix: prefix, pools };
        let runtime = Runtime::initialize(tag, config).expect("runtime init");
        Self { runtime, extra_segments: Vec::new() }
    }

    fn reserve(&self, name: &str) -> BlockId {
        self.runtime.reserve_block(name).expect("reserve block")
    }

    /// Connects `(src, src_port)` to `(dst, dst_port)` and remembers the
    /// queue segment name for teardown.
    fn connect(&mut self, src: BlockId, src_port: &str, dst: BlockId, dst_port: &str, capacity: u32) -> Arc<PortQueue> {
        let queue = self
            .runtime
            .connect(src, src_port, dst, dst_port, Some(capacity))
            .expect("connect");
        let src_name = self.runtime.allocator().registry().blocks().find(src).unwrap().name;
        let queue_name = self.runtime.shm_manager().config().queue_segment_name(src_name.as_str(), src_port);
        if !self.extra_segments.contains(&queue_name) {
            self.extra_segments.push(queue_name);
        }
        queue
    }

    fn output_port(&self, queue: Arc<PortQueue>, name: &str, index: u32) -> OutputPort {
        OutputPort::new(FixedName::new(name).expect("port name"), index, queue, Arc::clone(self.runtime.allocator()))
    }

    fn input_port(&self, queue: Arc<PortQueue>, name: &str, index: u32) -> InputPort {
        InputPort::attach(FixedName::new(name).expect("port name"), index, queue, Arc::clone(self.runtime.allocator()))
            .expect("attach input port")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        for pool in &self.runtime.shm_manager().config().pools.clone() {
            unlink_segment(&self.runtime.shm_manager().config().pool_segment_name(&pool.name)).ok();
        }
        for segment in &self.extra_segments {
            unlink_segment(segment).ok();
        }
        unlink_segment(&self.runtime.shm_manager().config().registry_segment_name()).ok();
    }
}

fn run_until_done(block: &mut dyn Block, max_steps: usize) -> Vec<WorkResult> {
    let mut results = Vec::new();
    for _ in 0..max_steps {
        let result = block.work();
        let done = matches!(result, WorkResult::Done);
        results.push(result);
        if done {
            break;
        }
    }
    results
}

/// Scenario 1: one producer, one consumer, full drain in order.
#[test]
fn single_producer_single_consumer_preserves_order() {
    let mut harness = Harness::new("spsc", vec![PoolConfig::new("small", 4096, 1024)]);
    let source_id = harness.reserve("source");
    let sink_id = harness.reserve("sink");
    let queue = harness.connect(source_id, "out", sink_id, "in", 16);

    let mut source = NullSource::new(Arc::clone(harness.runtime.allocator()), harness.output_port(Arc::clone(&queue), "out", 0), 16, 32);
    let mut sink = NullSink::new(vec![harness.input_port(queue, "in", 0)]);

    assert!(source.initialize() && source.start());
    assert!(sink.initialize() && sink.start());

    let source_results = run_until_done(&mut source, 32);
    assert_eq!(source_results.last(), Some(&WorkResult::Done));
    assert!(source_results[..source_results.len() - 1].iter().all(|r| *r == WorkResult::Ok));

    for _ in 0..16 {
        assert_eq!(sink.work(), WorkResult::Ok);
    }
    assert_eq!(sink.consumed(), 16);
    // sum of 0..16
    assert_eq!(sink.checksum(), (0..16u64).sum());
}

/// Scenario 2: one producer, three independent consumers, each seeing the
/// full stream regardless of the others' pace.
#[test]
fn broadcast_delivers_full_stream_to_every_consumer() {
    let mut harness = Harness::new("broadcast", vec![PoolConfig::new("small", 4096, 1024)]);
    let source_id = harness.reserve("source");
    let sink_a = harness.reserve("sink-a");
    let sink_b = harness.reserve("sink-b");
    let sink_c = harness.reserve("sink-c");

    let queue = harness.connect(source_id, "out", sink_a, "in", 16);
    harness.connect(source_id, "out", sink_b, "in", 16);
    harness.connect(source_id, "out", sink_c, "in", 16);

    let mut source = NullSource::new(Arc::clone(harness.runtime.allocator()), harness.output_port(Arc::clone(&queue), "out", 0), 50, 64);
    let mut sinks = vec![
        NullSink::new(vec![harness.input_port(Arc::clone(&queue), "in", 0)]),
        NullSink::new(vec![harness.input_port(Arc::clone(&queue), "in", 0)]),
        NullSink::new(vec![harness.input_port(queue, "in", 0)]),
    ];

    assert!(source.initialize() && source.start());
    for sink in &mut sinks {
        assert!(sink.initialize() && sink.start());
    }

    // Drive the producer all the way first — the broadcast queue has room
    // for all 50 since capacity (16) only throttles the *slowest* consumer,
    // and nobody has popped yet, so expect some InsufficientOutput once full.
    let mut produced = 0;
    for _ in 0..500 {
        match source.work() {
            WorkResult::Ok => produced += 1,
            WorkResult::InsufficientOutput => {
                for sink in &mut sinks {
                    while sink.work() == WorkResult::Ok {}
                }
            }
            WorkResult::Done => break,
            other => panic!("unexpected source result: {other:?}"),
        }
    }
    assert_eq!(produced, 50);

    for sink in &mut sinks {
        while sink.work() == WorkResult::Ok {}
        assert_eq!(sink.consumed(), 50);
        assert_eq!(sink.checksum(), (0..50u64).sum());
    }
}

/// Scenario 3: a slow consumer throttles the producer without losing data.
#[test]
fn slow_consumer_applies_back_pressure_without_loss() {
    let mut harness = Harness::new("backpressure", vec![PoolConfig::new("small", 4096, 1024)]);
    let source_id = harness.reserve("source");
    let fast_id = harness.reserve("fast");
    let slow_id = harness.reserve("slow");

    let queue = harness.connect(source_id, "out", fast_id, "in", 4);
    harness.connect(source_id, "out", slow_id, "in", 4);

    let mut source = NullSource::new(Arc::clone(harness.runtime.allocator()), harness.output_port(Arc::clone(&queue), "out", 0), 10, 16);
    let mut fast = NullSink::new(vec![harness.input_port(Arc::clone(&queue), "in", 0)]);
    let mut slow = NullSink::new(vec![harness.input_port(queue, "in", 0)]);

    assert!(source.initialize() && source.start());
    assert!(fast.initialize() && fast.start());
    assert!(slow.initialize() && slow.start());

    let mut produced = 0;
    let mut stalls = 0;
    loop {
        match source.work() {
            WorkResult::Ok => produced += 1,
            WorkResult::InsufficientOutput => {
                stalls += 1;
                assert_eq!(slow.work(), WorkResult::Ok, "slow consumer must be the one throttling");
                while fast.work() == WorkResult::Ok {}
            }
            WorkResult::Done => break,
            other => panic!("unexpected source result: {other:?}"),
        }
        if produced == 10 {
            break;
        }
    }
    assert!(stalls > 0, "a queue capacity of 4 against 10 pushes must stall at least once");
    assert_eq!(produced, 10);

    while slow.work() == WorkResult::Ok {}
    while fast.work() == WorkResult::Ok {}
    assert_eq!(fast.consumed(), 10);
    assert_eq!(slow.consumed(), 10);
}

/// Scenario 4: a consumer unregisters mid-stream; the remaining consumer is
/// unaffected and the dropped consumer's owed refcounts are reclaimed.
#[test]
fn consumer_unregister_mid_stream_does_not_disturb_the_survivor() {
    let mut harness = Harness::new("unregister", vec![PoolConfig::new("small", 4096, 1024)]);
    let source_id = harness.reserve("source");
    let a_id = harness.reserve("a");
    let b_id = harness.reserve("b");

    let queue = harness.connect(source_id, "out", a_id, "in", 8);
    harness.connect(source_id, "out", b_id, "in", 8);

    let mut source = NullSource::new(Arc::clone(harness.runtime.allocator()), harness.output_port(Arc::clone(&queue), "out", 0), 6, 16);
    let port_a = harness.input_port(Arc::clone(&queue), "in", 0);
    let mut sink_b = NullSink::new(vec![harness.input_port(queue, "in", 0)]);

    assert!(source.initialize() && source.start());
    assert!(sink_b.initialize() && sink_b.start());

    for _ in 0..6 {
        assert_eq!(source.work(), WorkResult::Ok);
    }
    assert_eq!(source.work(), WorkResult::Done);

    for _ in 0..3 {
        assert!(port_a.try_pop().is_ok());
    }
    port_a.disconnect().expect("disconnect mid-stream");

    let mut consumed = 0;
    while sink_b.work() == WorkResult::Ok {
        consumed += 1;
    }
    assert_eq!(consumed, 6);
    assert_eq!(sink_b.checksum(), (0..6u64).sum());
}

/// Scenario 5: a diamond — one source splits into three amplifier branches
/// (factors 1, 2, 3) that merge back into a single sink.
#[test]
fn diamond_topology_merges_three_amplified_branches() {
    let mut harness = Harness::new("diamond", vec![PoolConfig::new("small", 4096, 1024)]);
    let source_id = harness.reserve("source");
    let amp_a = harness.reserve("amp-a");
    let amp_b = harness.reserve("amp-b");
    let amp_c = harness.reserve("amp-c");
    let sink_id = harness.reserve("sink");

    let split = harness.connect(source_id, "out", amp_a, "in", 8);
    harness.connect(source_id, "out", amp_b, "in", 8);
    harness.connect(source_id, "out", amp_c, "in", 8);

    let queue_a = harness.connect(amp_a, "out", sink_id, "in", 8);
    let queue_b = harness.connect(amp_b, "out", sink_id, "in", 8);
    let queue_c = harness.connect(amp_c, "out", sink_id, "in", 8);

    let allocator = Arc::clone(harness.runtime.allocator());
    let mut source = NullSource::new(Arc::clone(&allocator), harness.output_port(Arc::clone(&split), "out", 0), 4, 16);
    let mut amplifier_a = Amplifier::new(
        Arc::clone(&allocator),
        harness.input_port(Arc::clone(&split), "in", 0),
        harness.output_port(Arc::clone(&queue_a), "out", 0),
        1,
    );
    let mut amplifier_b = Amplifier::new(
        Arc::clone(&allocator),
        harness.input_port(Arc::clone(&split), "in", 0),
        harness.output_port(Arc::clone(&queue_b), "out", 0),
        2,
    );
    let mut amplifier_c = Amplifier::new(
        Arc::clone(&allocator),
        harness.input_port(split, "in", 0),
        harness.output_port(Arc::clone(&queue_c), "out", 0),
        3,
    );
    let mut sink = NullSink::new(vec![
        harness.input_port(queue_a, "in", 0),
        harness.input_port(queue_b, "in", 0),
        harness.input_port(queue_c, "in", 0),
    ]);

    for block in [
        &mut amplifier_a as &mut dyn Block,
        &mut amplifier_b as &mut dyn Block,
        &mut amplifier_c as &mut dyn Block,
    ] {
        assert!(block.initialize() && block.start());
    }
    assert!(source.initialize() && source.start());
    assert!(sink.initialize() && sink.start());

    assert_eq!(run_until_done(&mut source, 8).last(), Some(&WorkResult::Done));
    for _ in 0..4 {
        assert_eq!(amplifier_a.work(), WorkResult::Ok);
        assert_eq!(amplifier_b.work(), WorkResult::Ok);
        assert_eq!(amplifier_c.work(), WorkResult::Ok);
    }

    let mut consumed = 0;
    while sink.work() == WorkResult::Ok {
        consumed += 1;
    }
    assert_eq!(consumed, 12);

    // Each of 0..4 passes through amp factors 1, 2, 3.
    let expected: u64 = (0..4u64).map(|i| i * 1 + i * 2 + i * 3).sum();
    assert_eq!(sink.checksum(), expected);
}

/// P7: while an amplifier's input has a pending element and its output has
/// a free slot, `work()` must make progress on every call rather than
/// stalling.
#[test]
fn amplifier_work_always_progresses_while_input_and_output_have_room() {
    let mut harness = Harness::new("progress", vec![PoolConfig::new("small", 4096, 1024)]);
    let source_id = harness.reserve("source");
    let amp_id = harness.reserve("amp");
    let sink_id = harness.reserve("sink");

    let in_queue = harness.connect(source_id, "out", amp_id, "in", 32);
    let out_queue = harness.connect(amp_id, "out", sink_id, "in", 32);

    let allocator = Arc::clone(harness.runtime.allocator());
    let mut source = NullSource::new(Arc::clone(&allocator), harness.output_port(in_queue.clone(), "out", 0), 20, 16);
    let mut amplifier = Amplifier::new(
        Arc::clone(&allocator),
        harness.input_port(in_queue, "in", 0),
        harness.output_port(out_queue.clone(), "out", 0),
        5,
    );
    let mut sink = NullSink::new(vec![harness.input_port(out_queue, "in", 0)]);

    assert!(source.initialize() && source.start());
    assert!(amplifier.initialize() && amplifier.start());
    assert!(sink.initialize() && sink.start());

    assert_eq!(run_until_done(&mut source, 32).last(), Some(&WorkResult::Done));

    // 20 elements produced, 32-deep queue on both sides: the amplifier must
    // see Ok on every single call, never InsufficientInput/Output.
    for _ in 0..20 {
        assert_eq!(amplifier.work(), WorkResult::Ok);
    }

    let mut consumed = 0;
    while sink.work() == WorkResult::Ok {
        consumed += 1;
    }
    assert_eq!(consumed, 20);
    assert_eq!(sink.checksum(), (0..20u64).map(|i| i * 5).sum());
}

/// Scenario 6 (approximated): two independent handles onto the same named
/// queue segment, standing in for two processes sharing one connection —
/// opening by name rather than sharing an `Arc` is the point here.
#[test]
fn two_independent_handles_on_the_same_named_queue_interoperate() {
    let harness = Harness::new("cross-process", vec![PoolConfig::new("small", 4096, 1024)]);
    let producer_id = harness.reserve("producer");
    let consumer_id = harness.reserve("consumer");
    let queue_name = {
        let name = harness.runtime.allocator().registry().blocks().find(producer_id).unwrap().name;
        harness.runtime.shm_manager().config().queue_segment_name(name.as_str(), "out")
    };

    let producer_queue = Arc::new(PortQueue::create(&queue_name, 8).expect("create queue"));
    let allocator = Arc::clone(harness.runtime.allocator());

    let consumer_allocator = Arc::clone(&allocator);
    let consumer_queue_name = queue_name.clone();
    let (attached_tx, attached_rx) = mpsc::channel::<()>();
    let consumer_thread = thread::spawn(move || {
        let queue = Arc::new(PortQueue::open(&consumer_queue_name, 8).expect("open queue from a second handle"));
        let input = InputPort::attach(FixedName::new("in").unwrap(), 0, queue, consumer_allocator).expect("attach");
        attached_tx.send(()).expect("signal attach complete");
        let mut total = 0u64;
        for _ in 0..5 {
            let handle = input.pop().expect("pop");
            if let (Ok(ptr), Ok(size)) = (handle.data(), handle.size()) {
                if size >= 4 {
                    let mut bytes = [0u8; 4];
                    unsafe { std::ptr::copy_nonoverlapping(ptr, bytes.as_mut_ptr(), 4) };
                    total += u64::from(u32::from_le_bytes(bytes));
                }
            }
        }
        total
    });

    // `register_consumer` (inside `InputPort::attach`) must land before the
    // first push, or the consumer starts at `head := tail` and never sees
    // elements pushed before it registered — mirroring scenario 6's
    // process-A-creates-sink-then-process-B-pushes ordering.
    attached_rx.recv().expect("consumer attached");

    for i in 0..5u32 {
        let handle = BufferHandle::allocate(Arc::clone(&allocator), 16).expect("allocate");
        if let Ok(ptr) = handle.data() {
            unsafe { std::ptr::copy_nonoverlapping(i.to_le_bytes().as_ptr(), ptr, 4) };
        }
        let output = OutputPort::new(FixedName::new("out").unwrap(), 0, Arc::clone(&producer_queue), Arc::clone(&allocator));
        output.push(handle).expect("push");
    }

    let total = consumer_thread.join().expect("consumer thread");
    assert_eq!(total, (0..5u64).sum());

    unlink_segment(&queue_name).ok();
}
