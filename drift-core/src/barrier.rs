//! Frame barrier between the driving thread and the worker pool.
//!
//! The driver bumps a generation counter to publish a frame; workers block
//! until the generation moves past the last one they rendered. Each worker
//! bumps the completion counter when its band is done, and the driver blocks
//! until that counter reaches the worker count. Both counters live under one
//! mutex, so every band write made before `complete` is visible to the driver
//! once `wait_complete` returns.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::Rasterizer;

struct FrameState {
    generation: u64,
    completed: usize,
    stop: bool,
    failed: Option<usize>,
    job: Option<Arc<Rasterizer>>,
}

/// What a worker woke up to
pub(crate) enum Wake {
    Frame { generation: u64, job: Arc<Rasterizer> },
    Stop,
}

pub(crate) struct FrameBarrier {
    state: Mutex<FrameState>,
    frame_ready: Condvar,
    frame_done: Condvar,
    workers: usize,
}

impl FrameBarrier {
    pub fn new(workers: usize) -> Self {
        Self {
            state: Mutex::new(FrameState {
                generation: 0,
                completed: 0,
                stop: false,
                failed: None,
                job: None,
            }),
            frame_ready: Condvar::new(),
            frame_done: Condvar::new(),
            workers,
        }
    }

    // The state is plain counters; a panicking holder cannot leave it torn.
    fn lock(&self) -> MutexGuard<'_, FrameState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Publish a new frame and wake every worker. Returns the new generation.
    pub fn begin_frame(&self, job: Arc<Rasterizer>) -> u64 {
        let mut state = self.lock();
        state.completed = 0;
        state.generation += 1;
        state.job = Some(job);
        self.frame_ready.notify_all();
        state.generation
    }

    /// Block until a generation newer than `seen` is published, or stop is set.
    ///
    /// Stop is only observed here, at the top of a worker's cycle.
    pub fn wait_for_frame(&self, seen: u64) -> Wake {
        let mut state = self.lock();
        loop {
            if state.stop {
                return Wake::Stop;
            }
            if state.generation != seen {
                if let Some(job) = &state.job {
                    return Wake::Frame {
                        generation: state.generation,
                        job: Arc::clone(job),
                    };
                }
            }
            state = self
                .frame_ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Record one finished band
    pub fn complete(&self) {
        let mut state = self.lock();
        state.completed += 1;
        if state.completed == self.workers {
            self.frame_done.notify_all();
        }
    }

    /// Record a worker that died mid-frame so the driver stops waiting for it
    pub fn fail(&self, worker: usize) {
        let mut state = self.lock();
        state.failed.get_or_insert(worker);
        self.frame_done.notify_all();
    }

    /// Block until every worker has completed the current frame.
    ///
    /// Returns the index of a failed worker instead if one panicked.
    pub fn wait_complete(&self) -> Result<(), usize> {
        let mut state = self.lock();
        loop {
            if let Some(worker) = state.failed {
                return Err(worker);
            }
            if state.completed == self.workers {
                state.job = None;
                return Ok(());
            }
            state = self
                .frame_done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn failed(&self) -> Option<usize> {
        self.lock().failed
    }

    /// Set the stop flag and bump the generation once more so every blocked
    /// worker wakes and exits.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.stop = true;
        state.generation += 1;
        self.frame_ready.notify_all();
    }
}

/// Reports a panicking worker to the barrier on unwind
pub(crate) struct PanicGuard<'a> {
    pub barrier: &'a FrameBarrier,
    pub worker: usize,
}

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.barrier.fail(self.worker);
        }
    }
}
