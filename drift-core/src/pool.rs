//! Long-lived worker pool, each worker statically bound to one row band.

use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::barrier::{FrameBarrier, PanicGuard, Wake};
use crate::{Config, DriftError, FrameBuffer, PartitionMode, Rasterizer, Result, Rgba};

/// Half-open row range `[start, start + count)` owned by one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowBand {
    pub start: u32,
    pub count: u32,
}

impl RowBand {
    pub fn end(&self) -> u32 {
        self.start + self.count
    }

    pub fn rows(&self) -> Range<u32> {
        self.start..self.end()
    }
}

/// Split `[0, height)` into `workers` equal bands of `height / workers` rows.
///
/// When `workers` does not divide `height`, [`PartitionMode::Strict`] rejects
/// the split and [`PartitionMode::Legacy`] leaves the trailing
/// `height % workers` rows to no worker.
pub fn partition_rows(height: u32, workers: usize, mode: PartitionMode) -> Result<Vec<RowBand>> {
    if workers == 0 {
        return Err(DriftError::InvalidConfig("worker count must be at least 1".into()));
    }

    let remainder = height as usize % workers;
    if remainder != 0 {
        match mode {
            PartitionMode::Strict => return Err(DriftError::UnevenPartition { height, workers }),
            PartitionMode::Legacy => log::warn!(
                "{} rows not divisible by {} workers: rows {}..{} will never be rendered",
                height,
                workers,
                height as usize - remainder,
                height
            ),
        }
    }

    // `workers` may exceed `height` in legacy mode, giving empty bands
    let band = (height as usize / workers) as u32;
    Ok((0..workers)
        .map(|i| RowBand {
            start: i as u32 * band,
            count: band,
        })
        .collect())
}

struct Worker {
    band: RowBand,
    pixels: Arc<Mutex<Vec<Rgba>>>,
    handle: Option<JoinHandle<()>>,
}

/// Fixed-size pool rendering one frame at a time behind a [`FrameBarrier`].
///
/// Each worker owns the pixels of its band. The band mutexes are never
/// contended: a worker holds its own while rendering, and the driver reads
/// them only after the barrier reports the frame complete.
pub struct WorkerPool {
    barrier: Arc<FrameBarrier>,
    workers: Vec<Worker>,
    width: u32,
    height: u32,
}

impl WorkerPool {
    /// Spawn `config.workers` threads over `config.height` rows.
    ///
    /// If a spawn fails, the workers already started are stopped and joined.
    pub fn new(config: &Config) -> Result<Self> {
        Self::spawn(config, Duration::ZERO)
    }

    /// Spawn with each worker sleeping `startup_delay` before its first wait
    fn spawn(config: &Config, startup_delay: Duration) -> Result<Self> {
        let bands = partition_rows(config.height, config.workers, config.partition)?;
        let barrier = Arc::new(FrameBarrier::new(bands.len()));
        let mut pool = Self {
            barrier,
            workers: Vec::with_capacity(bands.len()),
            width: config.width,
            height: config.height,
        };
        // Read before any worker runs: a frame may be published before a
        // worker is first scheduled, and it must still count as unseen.
        let start_generation = pool.barrier.generation();

        for (index, band) in bands.into_iter().enumerate() {
            let len = band.count as usize * config.width as usize;
            let mut band_pixels = Vec::new();
            band_pixels
                .try_reserve_exact(len)
                .map_err(|source| DriftError::Allocation { what: "band buffer", source })?;
            band_pixels.resize(len, [0; 4]);

            let pixels = Arc::new(Mutex::new(band_pixels));
            let handle = {
                let pixels = Arc::clone(&pixels);
                let barrier = Arc::clone(&pool.barrier);
                thread::Builder::new()
                    .name(format!("drift-worker-{index}"))
                    .spawn(move || {
                        if !startup_delay.is_zero() {
                            thread::sleep(startup_delay);
                        }
                        worker_loop(index, band, start_generation, &pixels, &barrier)
                    })
                    .map_err(|source| DriftError::WorkerSpawn { index, source })?
            };
            pool.workers.push(Worker {
                band,
                pixels,
                handle: Some(handle),
            });
        }

        log::debug!(
            "spawned {} workers over {} rows ({} rows each)",
            pool.workers.len(),
            pool.height,
            pool.workers.first().map_or(0, |w| w.band.count)
        );
        Ok(pool)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn bands(&self) -> Vec<RowBand> {
        self.workers.iter().map(|w| w.band).collect()
    }

    /// Frames published so far (plus one after shutdown)
    pub fn generation(&self) -> u64 {
        self.barrier.generation()
    }

    /// Render one frame into `frame`.
    ///
    /// Returns once every band is complete; rows outside all bands are left
    /// untouched.
    pub fn render(&mut self, rasterizer: Arc<Rasterizer>, frame: &mut FrameBuffer) -> Result<()> {
        if let Some(worker) = self.barrier.failed() {
            return Err(DriftError::WorkerPanicked(worker));
        }
        let dims = (self.width, self.height);
        if (rasterizer.width(), rasterizer.height()) != dims || (frame.width(), frame.height()) != dims {
            return Err(DriftError::InvalidConfig(format!(
                "pool renders {}x{}, got rasterizer {}x{} and frame {}x{}",
                self.width,
                self.height,
                rasterizer.width(),
                rasterizer.height(),
                frame.width(),
                frame.height()
            )));
        }

        self.barrier.begin_frame(rasterizer);
        self.barrier
            .wait_complete()
            .map_err(DriftError::WorkerPanicked)?;

        for worker in &self.workers {
            let pixels = worker.pixels.lock().unwrap_or_else(PoisonError::into_inner);
            frame
                .rows_mut(worker.band.start, worker.band.count)
                .copy_from_slice(&pixels);
        }
        Ok(())
    }

    /// Stop and join every worker. Returns how many exited cleanly.
    pub fn shutdown(mut self) -> usize {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> usize {
        if self.workers.iter().all(|w| w.handle.is_none()) {
            return 0;
        }
        self.barrier.stop();

        let mut joined = 0;
        for (index, worker) in self.workers.iter_mut().enumerate() {
            if let Some(handle) = worker.handle.take() {
                match handle.join() {
                    Ok(()) => joined += 1,
                    Err(_) => log::error!("worker {} panicked", index),
                }
            }
        }
        log::debug!("joined {} of {} workers", joined, self.workers.len());
        joined
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn worker_loop(
    index: usize,
    band: RowBand,
    mut seen: u64,
    pixels: &Mutex<Vec<Rgba>>,
    barrier: &FrameBarrier,
) {
    let _guard = PanicGuard { barrier, worker: index };

    loop {
        match barrier.wait_for_frame(seen) {
            Wake::Stop => break,
            Wake::Frame { generation, job } => {
                seen = generation;
                {
                    let mut out = pixels.lock().unwrap_or_else(PoisonError::into_inner);
                    job.fill_rows(band.rows(), &mut out);
                }
                drop(job);
                barrier.complete();
            }
        }
    }
    log::trace!("worker {} stopped", index);
}
