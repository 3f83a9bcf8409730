//! Site state and physics simulation.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{DriftError, Result, Rgba};

/// Per-axis bound of the initial velocity range, in pixels per second.
pub const MAX_SPEED: f64 = 60.0;

/// 2D position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared distance to a pixel coordinate
    #[inline]
    pub fn dist_sq(&self, x: f64, y: f64) -> f64 {
        let dx = x - self.x;
        let dy = y - self.y;
        dx * dx + dy * dy
    }
}

/// 2D velocity in pixels per second
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Velocity {
    pub x: f64,
    pub y: f64,
}

impl Velocity {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Reflect off a vertical boundary
    pub fn reflect_x(&mut self) {
        self.x = -self.x;
    }

    /// Reflect off a horizontal boundary
    pub fn reflect_y(&mut self) {
        self.y = -self.y;
    }
}

/// Acceleration shares the two-component shape (and reflection) of velocity.
pub type Acceleration = Velocity;

/// A Voronoi site: physical state plus the color of its cell
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub pos: Position,
    pub vel: Velocity,
    pub accel: Acceleration,
    pub color: Rgba,
}

impl Site {
    /// Create a site with zero acceleration
    pub fn new(pos: Position, vel: Velocity, color: Rgba) -> Self {
        Self {
            pos,
            vel,
            accel: Acceleration::default(),
            color,
        }
    }

    /// Reflect at the bounds, then integrate with explicit Euler.
    ///
    /// Reflection is boundary-inclusive: a site sitting exactly on `0` or on
    /// the bound flips on every call until it moves strictly inside. Positions
    /// are never clamped, so a large `dt` can leave a site oscillating just
    /// outside the image.
    pub fn advance(&mut self, dt: f64, width: f64, height: f64) {
        if self.pos.y <= 0.0 || self.pos.y >= height {
            self.accel.reflect_y();
            self.vel.reflect_y();
        }
        if self.pos.x <= 0.0 || self.pos.x >= width {
            self.accel.reflect_x();
            self.vel.reflect_x();
        }

        self.vel.x += dt * self.accel.x;
        self.vel.y += dt * self.accel.y;

        self.pos.x += dt * self.vel.x;
        self.pos.y += dt * self.vel.y;
    }
}

/// Average a random RGB triple with `bias`, alpha forced opaque
fn biased_color<R: Rng>(rng: &mut R, bias: Rgba) -> Rgba {
    let mix = |c: u8, b: u8| ((c as u16 + b as u16) / 2) as u8;
    [
        mix(rng.gen(), bias[0]),
        mix(rng.gen(), bias[1]),
        mix(rng.gen(), bias[2]),
        0xff,
    ]
}

/// Collection of sites with physics simulation
#[derive(Debug, Clone)]
pub struct SiteCollection {
    pub sites: Vec<Site>,
}

impl SiteCollection {
    /// Wrap an explicit set of sites
    pub fn from_sites(sites: Vec<Site>) -> Self {
        Self { sites }
    }

    /// Create sites at random positions, velocities and colors.
    ///
    /// The same `seed` always yields the same collection.
    pub fn random(count: usize, width: f64, height: f64, bias: Rgba, seed: u64) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mut sites = Vec::new();
        sites
            .try_reserve_exact(count)
            .map_err(|source| DriftError::Allocation { what: "site array", source })?;

        for _ in 0..count {
            let pos = Position::new(rng.gen_range(0.0..width), rng.gen_range(0.0..height));
            let vel = Velocity::new(
                rng.gen_range(-MAX_SPEED..MAX_SPEED),
                rng.gen_range(-MAX_SPEED..MAX_SPEED),
            );
            let color = biased_color(&mut rng, bias);
            sites.push(Site::new(pos, vel, color));
        }

        Ok(Self { sites })
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Step all sites forward
    pub fn advance(&mut self, dt: f64, width: f64, height: f64) {
        for site in &mut self.sites {
            site.advance(dt, width, height);
        }
    }

    /// Get positions (for marker drawing and diagnostics)
    pub fn positions(&self) -> Vec<Position> {
        self.sites.iter().map(|s| s.pos).collect()
    }
}
