//! Immutable animation configuration, validated once at construction.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::pool::partition_rows;
use crate::{DriftError, NearestSearch, Result, Rgba};

/// Opaque red
pub const DEFAULT_BIAS_COLOR: Rgba = [0xff, 0x00, 0x00, 0xff];

/// Where rasterization runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Execution {
    /// Whole image on the driving thread
    Sequential,
    /// Long-lived row-partitioned worker pool
    #[default]
    Pool,
    /// Rayon's global pool, one task per row
    #[cfg(feature = "parallel")]
    Rayon,
}

impl std::str::FromStr for Execution {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sequential" | "seq" => Ok(Self::Sequential),
            "pool" => Ok(Self::Pool),
            #[cfg(feature = "parallel")]
            "rayon" => Ok(Self::Rayon),
            _ => Err(format!("unknown execution '{}' (expected sequential, pool or rayon)", s)),
        }
    }
}

/// How to treat a height that the worker count does not divide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionMode {
    /// Reject the configuration
    #[default]
    Strict,
    /// Leave the trailing rows to no worker; they keep stale content
    Legacy,
}

impl std::str::FromStr for PartitionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "legacy" => Ok(Self::Legacy),
            _ => Err(format!("unknown partition mode '{}' (expected strict or legacy)", s)),
        }
    }
}

/// Timestep used to advance sites after each frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Timing {
    /// Constant dt in seconds; runs are reproducible
    Fixed(f64),
    /// dt is the wall-clock duration of the previous tick
    RealTime,
}

impl Default for Timing {
    fn default() -> Self {
        Timing::Fixed(1.0 / 30.0)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub width: u32,
    pub height: u32,
    /// `None` picks 5..=11 sites from the seed
    pub site_count: Option<usize>,
    pub bias_color: Rgba,
    pub workers: usize,
    pub partition: PartitionMode,
    pub execution: Execution,
    pub search: NearestSearch,
    /// `None` runs until cancelled
    pub timesteps: Option<u64>,
    pub timing: Timing,
    pub seed: u64,
    /// Draw a marker over each site
    pub show_sites: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            site_count: None,
            bias_color: DEFAULT_BIAS_COLOR,
            workers: 8,
            partition: PartitionMode::Strict,
            execution: Execution::Pool,
            search: NearestSearch::BruteForce,
            timesteps: None,
            timing: Timing::default(),
            seed: 0,
            show_sites: true,
        }
    }
}

impl Config {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    /// Configured site count, or a seeded pick in 5..=11
    pub fn resolved_site_count(&self) -> usize {
        self.site_count.unwrap_or_else(|| {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
            rng.gen_range(5..=11)
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(DriftError::InvalidConfig(format!(
                "image size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.site_count == Some(0) {
            return Err(DriftError::NoSites);
        }
        if let Timing::Fixed(dt) = self.timing {
            if !dt.is_finite() || dt < 0.0 {
                return Err(DriftError::InvalidConfig(format!(
                    "timestep must be finite and non-negative, got {}",
                    dt
                )));
            }
        }
        if self.execution == Execution::Pool {
            if self.workers == 0 {
                return Err(DriftError::InvalidConfig("worker count must be at least 1".into()));
            }
            partition_rows(self.height, self.workers, self.partition)?;
        }
        Ok(())
    }
}
