//! Frame driver: rasterize, mark sites, emit, advance, repeat.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{
    Config, DriftError, Execution, FrameBuffer, FrameSink, Rasterizer, Result, Site, SiteCollection,
    Timing, WorkerPool,
};

/// Half-width of the square drawn over each site
const MARKER_RADIUS: i64 = 2;

enum Backend {
    Sequential,
    Pool(WorkerPool),
    #[cfg(feature = "parallel")]
    Rayon,
}

/// Outcome of [`Animation::run`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    /// Frames handed to the sink
    pub frames: u64,
    /// Whether the run stopped on the cancellation signal
    pub cancelled: bool,
    pub elapsed: Duration,
}

/// Owns the sites, the frame buffer and the rasterization backend
pub struct Animation {
    config: Config,
    sites: SiteCollection,
    frame: FrameBuffer,
    backend: Backend,
    frames_rendered: u64,
}

impl Animation {
    /// Validate `config`, generate its sites from the seed and start the
    /// backend. Fails before any frame is rendered.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let sites = SiteCollection::random(
            config.resolved_site_count(),
            config.width as f64,
            config.height as f64,
            config.bias_color,
            config.seed,
        )?;
        Self::with_sites(config, sites.sites)
    }

    /// Like [`Animation::new`], with an explicit site set
    pub fn with_sites(config: Config, sites: Vec<Site>) -> Result<Self> {
        config.validate()?;
        if sites.is_empty() {
            return Err(DriftError::NoSites);
        }

        let frame = FrameBuffer::new(config.width, config.height)?;
        let backend = match config.execution {
            Execution::Sequential => Backend::Sequential,
            Execution::Pool => Backend::Pool(WorkerPool::new(&config)?),
            #[cfg(feature = "parallel")]
            Execution::Rayon => Backend::Rayon,
        };

        log::info!(
            "{}x{} animation, {} sites, {:?} execution, {:?} search, seed {}",
            config.width,
            config.height,
            sites.len(),
            config.execution,
            config.search,
            config.seed
        );

        Ok(Self {
            config,
            sites: SiteCollection::from_sites(sites),
            frame,
            backend,
            frames_rendered: 0,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites.sites
    }

    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Fill the frame buffer for the current site positions and draw the
    /// site markers over it.
    pub fn render_frame(&mut self) -> Result<&FrameBuffer> {
        let (width, height) = (self.config.width, self.config.height);
        let rasterizer = Rasterizer::new(&self.sites.sites, self.config.search, width, height)?;

        match &mut self.backend {
            Backend::Sequential => rasterizer.fill_rows(0..height, self.frame.pixels_mut()),
            Backend::Pool(pool) => pool.render(Arc::new(rasterizer), &mut self.frame)?,
            #[cfg(feature = "parallel")]
            Backend::Rayon => {
                use rayon::prelude::*;
                self.frame
                    .pixels_mut()
                    .par_chunks_mut(width as usize)
                    .enumerate()
                    .for_each(|(y, row)| rasterizer.fill_row(y as u32, row));
            }
        }

        if self.config.show_sites {
            draw_markers(&mut self.frame, &self.sites.sites);
        }
        self.frames_rendered += 1;
        Ok(&self.frame)
    }

    /// Advance every site by `dt` seconds
    pub fn advance(&mut self, dt: f64) {
        self.sites
            .advance(dt, self.config.width as f64, self.config.height as f64);
    }

    /// Run the frame loop until the configured timestep count elapses or
    /// `cancelled` returns true.
    ///
    /// `cancelled` is polled once at the top of every tick. A sink failure
    /// stops the loop immediately and is returned as [`DriftError::Emit`].
    pub fn run<S, C>(&mut self, sink: &mut S, mut cancelled: C) -> Result<RunSummary>
    where
        S: FrameSink + ?Sized,
        C: FnMut() -> bool,
    {
        let start = Instant::now();
        let mut frames = 0u64;
        let mut was_cancelled = false;

        while self.config.timesteps.map_or(true, |limit| frames < limit) {
            if cancelled() {
                log::info!("cancelled after {} frames", frames);
                was_cancelled = true;
                break;
            }

            let tick = Instant::now();
            self.render_frame()?;
            sink.emit(self.frame.as_bytes(), self.config.width, self.config.height)
                .map_err(|source| DriftError::Emit { frame: frames, source })?;

            let dt = match self.config.timing {
                Timing::Fixed(dt) => dt,
                Timing::RealTime => tick.elapsed().as_secs_f64(),
            };
            self.advance(dt);
            frames += 1;
            log::trace!("frame {} done, dt {:.4}s", frames, dt);
        }

        Ok(RunSummary {
            frames,
            cancelled: was_cancelled,
            elapsed: start.elapsed(),
        })
    }

    /// Stop the worker pool, if any. Returns how many workers were joined.
    pub fn shutdown(self) -> usize {
        match self.backend {
            Backend::Pool(pool) => pool.shutdown(),
            _ => 0,
        }
    }
}

/// Force the green channel of the 5x5 neighborhood around each site's
/// rounded position, clipped to the image.
pub(crate) fn draw_markers(frame: &mut FrameBuffer, sites: &[Site]) {
    let (w, h) = (frame.width() as i64, frame.height() as i64);
    let pixels = frame.pixels_mut();
    for site in sites {
        let cx = site.pos.x.round() as i64;
        let cy = site.pos.y.round() as i64;
        for dy in -MARKER_RADIUS..=MARKER_RADIUS {
            for dx in -MARKER_RADIUS..=MARKER_RADIUS {
                let (px, py) = (cx + dx, cy + dy);
                if px >= 0 && px < w && py >= 0 && py < h {
                    pixels[(py * w + px) as usize][1] = 0xff;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PartitionMode, Position, SinkError, Velocity};

    fn site(x: f64, y: f64, color: [u8; 4]) -> Site {
        Site::new(Position::new(x, y), Velocity::new(7.0, -3.0), color)
    }

    fn config(execution: Execution) -> Config {
        Config {
            execution,
            workers: 4,
            site_count: Some(40),
            seed: 99,
            show_sites: true,
            timesteps: Some(12),
            ..Config::new(48, 32)
        }
    }

    fn render_frames(execution: Execution, frames: usize) -> Vec<Vec<u8>> {
        let mut animation = Animation::new(config(execution)).unwrap();
        let mut out = Vec::new();
        for _ in 0..frames {
            out.push(animation.render_frame().unwrap().as_bytes().to_vec());
            animation.advance(1.0 / 30.0);
        }
        animation.shutdown();
        out
    }

    #[test]
    fn test_pool_matches_sequential_across_frames() {
        assert_eq!(
            render_frames(Execution::Pool, 20),
            render_frames(Execution::Sequential, 20)
        );
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_rayon_matches_sequential_across_frames() {
        assert_eq!(
            render_frames(Execution::Rayon, 20),
            render_frames(Execution::Sequential, 20)
        );
    }

    #[test]
    fn test_markers_clip_at_corner() {
        let config = Config {
            execution: Execution::Sequential,
            ..Config::new(8, 8)
        };
        let mut animation = Animation::with_sites(config, vec![site(0.0, 0.0, [10, 20, 30, 255])]).unwrap();
        let frame = animation.render_frame().unwrap();

        for y in 0..8 {
            for x in 0..8 {
                let expected = if x <= 2 && y <= 2 { [10, 0xff, 30, 255] } else { [10, 20, 30, 255] };
                assert_eq!(frame.get(x, y), Some(expected), "pixel ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_markers_use_rounded_position() {
        let mut frame = FrameBuffer::new(12, 12).unwrap();
        draw_markers(&mut frame, &[site(4.6, 4.4, [0; 4])]);
        let marked: Vec<_> = (0..12)
            .flat_map(|y| (0..12).map(move |x| (x, y)))
            .filter(|&(x, y)| frame.get(x, y).unwrap()[1] == 0xff)
            .collect();
        assert_eq!(marked.len(), 25);
        assert!(marked.contains(&(3, 2)));
        assert!(marked.contains(&(7, 6)));
        assert!(!marked.contains(&(2, 2)));
    }

    #[test]
    fn test_markers_can_be_disabled() {
        let config = Config {
            execution: Execution::Sequential,
            show_sites: false,
            ..Config::new(6, 6)
        };
        let mut animation = Animation::with_sites(config, vec![site(3.0, 3.0, [1, 2, 3, 255])]).unwrap();
        let frame = animation.render_frame().unwrap();
        assert!(frame.pixels().iter().all(|p| *p == [1, 2, 3, 255]));
    }

    #[test]
    fn test_run_emits_configured_timesteps() {
        let mut animation = Animation::new(config(Execution::Pool)).unwrap();
        let mut emitted = Vec::new();
        let mut sink = |pixels: &[u8], w: u32, h: u32| -> std::result::Result<(), SinkError> {
            emitted.push((pixels.len(), w, h));
            Ok(())
        };
        let summary = animation.run(&mut sink, || false).unwrap();

        assert_eq!(summary.frames, 12);
        assert!(!summary.cancelled);
        assert_eq!(emitted.len(), 12);
        assert!(emitted.iter().all(|&e| e == (48 * 32 * 4, 48, 32)));
        assert_eq!(animation.shutdown(), 4);
    }

    #[test]
    fn test_run_stops_on_cancellation() {
        let mut animation = Animation::new(Config {
            timesteps: None,
            ..config(Execution::Sequential)
        })
        .unwrap();
        let mut polls = 0;
        let mut sink = |_: &[u8], _: u32, _: u32| -> std::result::Result<(), SinkError> { Ok(()) };
        let summary = animation
            .run(&mut sink, || {
                polls += 1;
                polls > 3
            })
            .unwrap();

        assert_eq!(summary.frames, 3);
        assert!(summary.cancelled);
        assert_eq!(animation.frames_rendered(), 3);
    }

    #[test]
    fn test_emit_failure_halts_loop() {
        let mut animation = Animation::new(config(Execution::Pool)).unwrap();
        let mut calls = 0;
        let mut sink = |_: &[u8], _: u32, _: u32| -> std::result::Result<(), SinkError> {
            calls += 1;
            if calls == 3 {
                Err("disk full".into())
            } else {
                Ok(())
            }
        };
        let before = animation.sites().to_vec();
        let err = animation.run(&mut sink, || false).unwrap_err();

        assert!(matches!(err, DriftError::Emit { frame: 2, .. }));
        assert_eq!(animation.frames_rendered(), 3);
        // Sites advanced twice, not after the rejected frame
        let mut expected = SiteCollection::from_sites(before);
        expected.advance(1.0 / 30.0, 48.0, 32.0);
        expected.advance(1.0 / 30.0, 48.0, 32.0);
        assert_eq!(animation.sites(), expected.sites.as_slice());
    }

    #[test]
    fn test_real_time_timing_moves_sites() {
        let mut animation = Animation::with_sites(
            Config {
                execution: Execution::Sequential,
                timing: Timing::RealTime,
                timesteps: Some(3),
                ..Config::new(16, 16)
            },
            vec![site(8.0, 8.0, [1, 1, 1, 255])],
        )
        .unwrap();
        let mut sink = |_: &[u8], _: u32, _: u32| -> std::result::Result<(), SinkError> { Ok(()) };
        animation.run(&mut sink, || false).unwrap();
        let pos = animation.sites()[0].pos;
        assert!(pos.x.is_finite() && pos.y.is_finite());
        assert!(pos.x >= 8.0);
    }

    #[test]
    fn test_startup_errors_before_any_frame() {
        let config = Config {
            workers: 3,
            partition: PartitionMode::Strict,
            ..Config::new(8, 8)
        };
        assert!(matches!(
            Animation::new(config),
            Err(DriftError::UnevenPartition { .. })
        ));
        assert!(matches!(
            Animation::with_sites(Config::new(8, 8), Vec::new()),
            Err(DriftError::NoSites)
        ));
    }
}
