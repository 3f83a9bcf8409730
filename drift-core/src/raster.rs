//! Nearest-site rasterization.
//!
//! The reference search is a brute-force scan over every site. [`SiteGrid`]
//! is an optional uniform-grid index that returns exactly the same site,
//! including on ties, so the two strategies are interchangeable.

use std::ops::Range;

use crate::{DriftError, Result, Rgba, Site};

/// Index of the site nearest to pixel `(x, y)`.
///
/// Compares squared distances with a strict `<`, so on exact ties the
/// lowest index wins.
///
/// # Panics
///
/// Panics if `sites` is empty.
#[inline]
pub fn nearest_site(x: f64, y: f64, sites: &[Site]) -> usize {
    assert!(!sites.is_empty(), "nearest_site called with no sites");

    let mut min_dist = f64::INFINITY;
    let mut nearest = 0;
    for (i, site) in sites.iter().enumerate() {
        let dist = site.pos.dist_sq(x, y);
        if dist < min_dist {
            min_dist = dist;
            nearest = i;
        }
    }
    nearest
}

/// Color of the site nearest to pixel `(x, y)`.
///
/// # Panics
///
/// Panics if `sites` is empty.
#[inline]
pub fn nearest_site_color(x: f64, y: f64, sites: &[Site]) -> Rgba {
    sites[nearest_site(x, y, sites)].color
}

/// Nearest-site search strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NearestSearch {
    /// O(sites) scan per pixel
    #[default]
    BruteForce,
    /// Uniform grid with expanding ring search
    Grid,
}

impl std::str::FromStr for NearestSearch {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "brute" | "brute-force" => Ok(Self::BruteForce),
            "grid" => Ok(Self::Grid),
            _ => Err(format!("unknown search '{}' (expected brute or grid)", s)),
        }
    }
}

/// Uniform grid over the image for O(1)-amortized nearest-site lookup.
///
/// Sites outside the image (they can overshoot the bounds between ticks)
/// are filed into the nearest edge cell.
#[derive(Debug, Clone)]
pub struct SiteGrid {
    cells: Vec<Vec<u32>>,
    cols: usize,
    rows: usize,
    cell_w: f64,
    cell_h: f64,
}

impl SiteGrid {
    pub fn build(sites: &[Site], width: u32, height: u32) -> Self {
        let side = ((sites.len() as f64).sqrt().ceil() as usize).max(1);
        let cols = side;
        let rows = side;
        let cell_w = width as f64 / cols as f64;
        let cell_h = height as f64 / rows as f64;

        let mut cells: Vec<Vec<u32>> = vec![Vec::new(); cols * rows];
        for (i, site) in sites.iter().enumerate() {
            let gc = ((site.pos.x / cell_w) as usize).min(cols - 1);
            let gr = ((site.pos.y / cell_h) as usize).min(rows - 1);
            cells[gr * cols + gc].push(i as u32);
        }

        Self { cells, cols, rows, cell_w, cell_h }
    }

    /// Nearest site to `(x, y)`; lowest index on ties, like [`nearest_site`].
    ///
    /// # Panics
    ///
    /// Panics if `sites` is empty.
    pub fn nearest(&self, x: f64, y: f64, sites: &[Site]) -> usize {
        assert!(!sites.is_empty(), "SiteGrid::nearest called with no sites");

        let gc = ((x / self.cell_w) as usize).min(self.cols - 1);
        let gr = ((y / self.cell_h) as usize).min(self.rows - 1);
        let ox = x - gc as f64 * self.cell_w;
        let oy = y - gr as f64 * self.cell_h;

        let mut min_dist = f64::INFINITY;
        let mut nearest = usize::MAX;

        for r in 0usize.. {
            let r_start = gr.saturating_sub(r);
            let r_end = (gr + r + 1).min(self.rows);
            let c_start = gc.saturating_sub(r);
            let c_end = (gc + r + 1).min(self.cols);

            for ri in r_start..r_end {
                for ci in c_start..c_end {
                    // Interior cells were scanned at a smaller radius
                    if r > 0 && ri > r_start && ri < r_end - 1 && ci > c_start && ci < c_end - 1 {
                        continue;
                    }
                    for &idx in &self.cells[ri * self.cols + ci] {
                        let idx = idx as usize;
                        let dist = sites[idx].pos.dist_sq(x, y);
                        if dist < min_dist || (dist == min_dist && idx < nearest) {
                            min_dist = dist;
                            nearest = idx;
                        }
                    }
                }
            }

            // Strict comparison: an unscanned site at exactly the bound could
            // still tie with a lower index.
            let rf = r as f64;
            let min_unchecked = (ox + rf * self.cell_w)
                .min(self.cell_w * (rf + 1.0) - ox)
                .min(oy + rf * self.cell_h)
                .min(self.cell_h * (rf + 1.0) - oy);
            if min_dist < min_unchecked * min_unchecked {
                break;
            }
            if r_start == 0 && c_start == 0 && r_end == self.rows && c_end == self.cols {
                break;
            }
        }

        nearest
    }
}

/// Immutable per-frame snapshot of the sites, shared read-only with workers.
#[derive(Debug, Clone)]
pub struct Rasterizer {
    sites: Vec<Site>,
    grid: Option<SiteGrid>,
    width: u32,
    height: u32,
}

impl Rasterizer {
    pub fn new(sites: &[Site], search: NearestSearch, width: u32, height: u32) -> Result<Self> {
        if sites.is_empty() {
            return Err(DriftError::NoSites);
        }
        let grid = match search {
            NearestSearch::BruteForce => None,
            NearestSearch::Grid => Some(SiteGrid::build(sites, width, height)),
        };
        Ok(Self {
            sites: sites.to_vec(),
            grid,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    /// Index of the site nearest to pixel `(x, y)`
    #[inline]
    pub fn nearest(&self, x: u32, y: u32) -> usize {
        let (x, y) = (x as f64, y as f64);
        match &self.grid {
            Some(grid) => grid.nearest(x, y, &self.sites),
            None => nearest_site(x, y, &self.sites),
        }
    }

    #[inline]
    pub fn color_at(&self, x: u32, y: u32) -> Rgba {
        self.sites[self.nearest(x, y)].color
    }

    /// Rasterize a single row into `out` (length = width)
    pub fn fill_row(&self, y: u32, out: &mut [Rgba]) {
        for (x, pixel) in out.iter_mut().enumerate() {
            *pixel = self.color_at(x as u32, y);
        }
    }

    /// Rasterize the row range `rows` into `out`, row-major.
    ///
    /// # Panics
    ///
    /// Panics if `out` does not hold exactly `rows.len() * width` pixels.
    pub fn fill_rows(&self, rows: Range<u32>, out: &mut [Rgba]) {
        let width = self.width as usize;
        assert_eq!(
            out.len(),
            rows.len() * width,
            "band buffer does not match row range"
        );
        if width == 0 {
            return;
        }
        for (row, y) in out.chunks_exact_mut(width).zip(rows) {
            self.fill_row(y, row);
        }
    }
}
