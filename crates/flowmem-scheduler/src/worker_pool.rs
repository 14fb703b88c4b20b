//! A fixed pool of worker threads dispatching `Block::work()` over the
//! registered block set (spec §4.9).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flowmem_block::Block;
use flowmem_types::{BlockId, Error, Result, WorkResult, DEFAULT_IDLE_SLEEP};

use crate::stats::BlockStats;

struct Entry {
    id: BlockId,
    block: Arc<Mutex<Box<dyn Block>>>,
    stats: Arc<Mutex<BlockStats>>,
}

/// Dispatches `work()` across a fixed pool of worker threads. Scheduling is
/// round-robin over the shared registered set under a short lock (spec
/// §4.9); the scheduler does not own blocks — it holds a shared handle a
/// caller (normally `flowmem-runtime`) also keeps, matching the spec's
/// `register_block(&Block)` signature.
pub struct Scheduler {
    blocks: Arc<Mutex<Vec<Entry>>>,
    cursor: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    idle_sleep: Duration,
    worker_count: usize,
}

impl Scheduler {
    /// Builds a scheduler with `worker_count` threads (default: logical CPU
    /// count, spec §4.9) and the default idle-sleep backoff.
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        Self {
            blocks: Arc::new(Mutex::new(Vec::new())),
            cursor: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
            idle_sleep: DEFAULT_IDLE_SLEEP,
            worker_count,
        }
    }

    #[must_use]
    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    #[must_use]
    pub fn default_worker_count() -> usize {
        num_cpus::get()
    }

    pub fn register_block(&self, id: BlockId, block: Arc<Mutex<Box<dyn Block>>>) -> Result<()> {
        let mut blocks = self.blocks.lock().expect("scheduler block list poisoned");
        if blocks.iter().any(|e| e.id == id) {
            return Err(Error::invalid_arg(format!("block {id} already registered")));
        }
        blocks.push(Entry { id, block, stats: Arc::new(Mutex::new(BlockStats::default())) });
        Ok(())
    }

    pub fn unregister_block(&self, id: BlockId) -> Result<()> {
        let mut blocks = self.blocks.lock().expect("scheduler block list poisoned");
        let before = blocks.len();
        blocks.retain(|e| e.id != id);
        if blocks.len() == before {
            return Err(Error::not_found(format!("block {id}")));
        }
        Ok(())
    }

    #[must_use]
    pub fn stats(&self, id: BlockId) -> Option<BlockStats> {
        let blocks = self.blocks.lock().expect("scheduler block list poisoned");
        blocks.iter().find(|e| e.id == id).map(|e| *e.stats.lock().expect("block stats poisoned"))
    }

    /// Spawns `worker_count` threads, each repeatedly picking the next
    /// registered block and calling `work()` (spec §4.9).
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        let mut handles = self.handles.lock().expect("scheduler handle list poisoned");
        for _ in 0..self.worker_count {
            let blocks = Arc::clone(&self.blocks);
            let cursor = Arc::clone(&self.cursor);
            let running = Arc::clone(&self.running);
            let idle_sleep = self.idle_sleep;
            handles.push(thread::spawn(move || worker_loop(&blocks, &cursor, &running, idle_sleep)));
        }
    }

    /// Sets the shared stop flag and joins every worker. Cancellation
    /// granularity is one `work()` call (spec §5) — a worker mid-`work()`
    /// finishes that call before observing the flag.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut handles = self.handles.lock().expect("scheduler handle list poisoned");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    blocks: &Arc<Mutex<Vec<Entry>>>,
    cursor: &Arc<AtomicUsize>,
    running: &Arc<AtomicBool>,
    idle_sleep: Duration,
) {
    while running.load(Ordering::SeqCst) {
        let picked = {
            let guard = blocks.lock().expect("scheduler block list poisoned");
            if guard.is_empty() {
                None
            } else {
                let idx = cursor.fetch_add(1, Ordering::Relaxed) % guard.len();
                Some((guard[idx].id, Arc::clone(&guard[idx].block), Arc::clone(&guard[idx].stats)))
            }
        };

        let Some((id, block, stats)) = picked else {
            thread::sleep(idle_sleep);
            continue;
        };

        let result = {
            let mut guard = block.lock().expect("block instance poisoned");
            guard.work()
        };
        {
            let mut s = stats.lock().expect("block stats poisoned");
            s.work_calls += 1;
            if result == WorkResult::Error {
                s.error_transitions += 1;
            }
        }

        match result {
            WorkResult::Ok => {}
            WorkResult::InsufficientInput | WorkResult::InsufficientOutput => {
                thread::sleep(idle_sleep);
            }
            WorkResult::Done | WorkResult::Error => {
                let mut guard = blocks.lock().expect("scheduler block list poisoned");
                guard.retain(|e| e.id != id);
            }
        }
    }
}
