//! Animated Voronoi diagram rendering.
//!
//! A set of moving sites partitions the image into cells; every pixel takes
//! the color of its nearest site. Frames are rasterized either on the calling
//! thread, on a long-lived row-partitioned worker pool, or (with the
//! `parallel` feature) on Rayon.

mod barrier;
mod config;
mod driver;
mod frame;
mod pool;
mod raster;
mod site;

pub use config::{Config, Execution, PartitionMode, Timing, DEFAULT_BIAS_COLOR};
pub use driver::{Animation, RunSummary};
pub use frame::{FrameBuffer, FrameSink, SinkError};
pub use pool::{partition_rows, RowBand, WorkerPool};
pub use raster::{nearest_site, nearest_site_color, NearestSearch, Rasterizer, SiteGrid};
pub use site::{Acceleration, Position, Site, SiteCollection, Velocity, MAX_SPEED};

/// Packed RGBA color
pub type Rgba = [u8; 4];

/// Error type for animation setup and the frame loop
#[derive(Debug, thiserror::Error)]
pub enum DriftError {
    #[error("No sites provided")]
    NoSites,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Height {height} is not divisible by {workers} workers (strict partition mode)")]
    UnevenPartition { height: u32, workers: usize },

    #[error("Failed to allocate {what}: {source}")]
    Allocation {
        what: &'static str,
        #[source]
        source: std::collections::TryReserveError,
    },

    #[error("Failed to spawn worker {index}: {source}")]
    WorkerSpawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker {0} panicked while rendering its band")]
    WorkerPanicked(usize),

    #[error("Sink rejected frame {frame}: {source}")]
    Emit {
        frame: u64,
        #[source]
        source: SinkError,
    },
}

pub type Result<T> = std::result::Result<T, DriftError>;
