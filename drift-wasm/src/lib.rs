//! WASM bindings for drift-core.
//!
//! Exposes a stateful `DriftEngine` that owns the sites and frame buffer and
//! returns RGBA frames ready for a canvas `ImageData`. Browsers get no
//! threads here, so frames are rasterized on the calling thread.

use drift_core::{Animation, Config, Execution, NearestSearch};
use wasm_bindgen::prelude::*;

#[wasm_bindgen(start)]
pub fn init_panic_hook() {
    console_error_panic_hook::set_once();
}

/// Stateful animation engine.
#[wasm_bindgen]
pub struct DriftEngine {
    animation: Animation,
}

#[wasm_bindgen]
impl DriftEngine {
    /// Create an engine. `sites = undefined` picks 5..=11 sites from the seed;
    /// `grid` switches to the grid-indexed nearest-site search.
    #[wasm_bindgen(constructor)]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        width: u32,
        height: u32,
        sites: Option<usize>,
        seed: u64,
        bias_r: u8,
        bias_g: u8,
        bias_b: u8,
        show_sites: bool,
        grid: bool,
    ) -> Result<DriftEngine, JsError> {
        let config = Config {
            site_count: sites,
            seed,
            bias_color: [bias_r, bias_g, bias_b, 0xff],
            show_sites,
            execution: Execution::Sequential,
            search: if grid { NearestSearch::Grid } else { NearestSearch::BruteForce },
            ..Config::new(width, height)
        };
        Ok(Self {
            animation: Animation::new(config)?,
        })
    }

    #[wasm_bindgen(getter)]
    pub fn width(&self) -> u32 {
        self.animation.config().width
    }

    #[wasm_bindgen(getter)]
    pub fn height(&self) -> u32 {
        self.animation.config().height
    }

    #[wasm_bindgen(getter)]
    pub fn site_count(&self) -> usize {
        self.animation.sites().len()
    }

    /// Flat [x0,y0, x1,y1, ...] site positions
    pub fn site_positions(&self) -> Vec<f64> {
        self.animation
            .sites()
            .iter()
            .flat_map(|s| [s.pos.x, s.pos.y])
            .collect()
    }

    /// Render the current frame (row-major RGBA, length = width*height*4)
    pub fn render(&mut self) -> Result<js_sys::Uint8ClampedArray, JsError> {
        let frame = self.animation.render_frame()?;
        Ok(js_sys::Uint8ClampedArray::from(frame.as_bytes()))
    }

    /// Advance all sites by `dt` seconds
    pub fn advance(&mut self, dt: f64) {
        self.animation.advance(dt);
    }

    /// Render the current frame, then advance by `dt`; one animation tick
    pub fn tick(&mut self, dt: f64) -> Result<js_sys::Uint8ClampedArray, JsError> {
        let pixels = self.render()?;
        self.advance(dt);
        Ok(pixels)
    }
}
