//! Animated Voronoi CLI
//!
//! Renders a drifting Voronoi diagram: moving sites, each pixel colored by
//! its nearest site, one frame per timestep.
//!
//! ## YAML config file
//!
//! ```yaml
//! width: 1920
//! height: 1080
//! sites: 9
//! bias_color: "ff0000"
//! workers: 8
//! partition: strict
//! execution: pool
//! search: brute
//! timesteps: 600
//! fps: 30
//! seed: 0
//! show_sites: true
//! ```
//!
//! Run with: `drift --config drift.yaml -o frames.gif -f gif`
//!
//! Flags override values from the file.
//!
//! ## Graceful interruption
//!
//! Without a timestep count the animation runs until Ctrl+C. Each frame is
//! handed to the output as soon as it is complete, so an interrupted run
//! still leaves a valid file behind.

use std::borrow::Cow;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;

use drift_core::{
    Animation, Config, Execution, FrameSink, NearestSearch, PartitionMode, Rgba, SinkError, Timing,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Overwrite a single PNG with the latest frame
    Png,
    Gif,
    Mp4,
    /// Discard frames (benchmarking)
    Null,
}

/// YAML config file format
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AnimSpec {
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    sites: Option<usize>,
    #[serde(default)]
    bias_color: Option<String>,
    #[serde(default)]
    workers: Option<usize>,
    #[serde(default)]
    partition: Option<String>,
    #[serde(default)]
    execution: Option<String>,
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    timesteps: Option<u64>,
    #[serde(default)]
    fps: Option<f64>,
    #[serde(default)]
    realtime: Option<bool>,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    show_sites: Option<bool>,
}

fn load_spec(path: &Path) -> anyhow::Result<AnimSpec> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {:?}", path))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {:?}", path))
}

/// Parse "rrggbb" or "#rrggbb" into an opaque color
fn parse_color(spec: &str) -> anyhow::Result<Rgba> {
    let hex = spec.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        anyhow::bail!("invalid color '{}' (expected rrggbb)", spec);
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);
    Ok([channel(0)?, channel(2)?, channel(4)?, 0xff])
}

fn parse_named<T: std::str::FromStr<Err = String>>(value: &str) -> anyhow::Result<T> {
    value.parse().map_err(|e: String| anyhow::anyhow!(e))
}

#[derive(Parser, Debug)]
#[command(name = "drift")]
#[command(about = "Render animated Voronoi diagrams", long_about = None)]
struct Args {
    /// Output file path (not needed with --format null)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "png")]
    format: OutputFormat,

    /// YAML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Image width [default: 1920]
    #[arg(long)]
    width: Option<u32>,

    /// Image height [default: 1080]
    #[arg(long)]
    height: Option<u32>,

    /// Number of sites [default: random 5..=11]
    #[arg(long)]
    sites: Option<usize>,

    /// Color every site is mixed with, as rrggbb [default: ff0000]
    #[arg(long)]
    bias_color: Option<String>,

    /// Worker threads for the pool backend [default: 8]
    #[arg(long)]
    workers: Option<usize>,

    /// Uneven row split handling: strict | legacy [default: strict]
    #[arg(long)]
    partition: Option<String>,

    /// Rasterization backend: pool | sequential | rayon [default: pool]
    #[arg(long)]
    execution: Option<String>,

    /// Nearest-site search: brute | grid [default: brute]
    #[arg(long)]
    search: Option<String>,

    /// Number of frames to render [default: until Ctrl+C]
    #[arg(short = 'n', long)]
    timesteps: Option<u64>,

    /// Simulation frames per second; each frame advances sites by 1/fps [default: 30]
    #[arg(long)]
    fps: Option<f64>,

    /// Advance sites by the measured frame time instead of 1/fps
    #[arg(long)]
    realtime: bool,

    /// Random seed for reproducibility [default: current time]
    #[arg(long)]
    seed: Option<u64>,

    /// Do not draw site markers
    #[arg(long)]
    hide_sites: bool,
}

/// Merge defaults, the YAML file and CLI flags (flags win)
fn build_config(args: &Args, spec: &AnimSpec) -> anyhow::Result<Config> {
    let mut config = Config::default();

    if let Some(width) = args.width.or(spec.width) {
        config.width = width;
    }
    if let Some(height) = args.height.or(spec.height) {
        config.height = height;
    }
    config.site_count = args.sites.or(spec.sites);
    if let Some(color) = args.bias_color.as_deref().or(spec.bias_color.as_deref()) {
        config.bias_color = parse_color(color)?;
    }
    if let Some(workers) = args.workers.or(spec.workers) {
        config.workers = workers;
    }
    if let Some(partition) = args.partition.as_deref().or(spec.partition.as_deref()) {
        config.partition = parse_named::<PartitionMode>(partition)?;
    }
    if let Some(execution) = args.execution.as_deref().or(spec.execution.as_deref()) {
        config.execution = parse_named::<Execution>(execution)?;
    }
    if let Some(search) = args.search.as_deref().or(spec.search.as_deref()) {
        config.search = parse_named::<NearestSearch>(search)?;
    }
    config.timesteps = args.timesteps.or(spec.timesteps);

    let realtime = args.realtime || spec.realtime.unwrap_or(false);
    let fps = args.fps.or(spec.fps).unwrap_or(30.0);
    if !(fps.is_finite() && fps > 0.0) {
        anyhow::bail!("fps must be positive, got {}", fps);
    }
    config.timing = if realtime {
        Timing::RealTime
    } else {
        Timing::Fixed(1.0 / fps)
    };

    config.seed = args.seed.or(spec.seed).unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64)
    });
    config.show_sites = !args.hide_sites && spec.show_sites.unwrap_or(true);

    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    // Set up SIGINT handler
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })
        .context("failed to set Ctrl-C handler")?;
    }

    let spec = match &args.config {
        Some(path) => load_spec(path)?,
        None => AnimSpec::default(),
    };
    let config = build_config(&args, &spec)?;

    let output = match args.format {
        OutputFormat::Null => None,
        _ => Some(
            args.output
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Output path required (use -o/--output)"))?,
        ),
    };

    println!("Image size: {}x{}", config.width, config.height);
    println!("Using seed: {}", config.seed);
    match config.execution {
        Execution::Pool => println!(
            "Using worker pool ({} workers, {:?} partition)",
            config.workers, config.partition
        ),
        other => println!("Using {:?} backend", other),
    }

    let (width, height) = (config.width, config.height);
    let timesteps = config.timesteps;
    let mut animation = Animation::new(config)?;
    println!("Animating {} sites", animation.sites().len());

    let progress = match timesteps {
        Some(total) => {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
                    .progress_chars("#>-"),
            );
            bar
        }
        None => {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {pos} frames ({per_sec}) - Ctrl+C to stop")?,
            );
            spinner
        }
    };

    let playback_fps = args.fps.or(spec.fps).unwrap_or(30.0).round().max(1.0) as u32;
    let site_colors: Vec<Rgba> = animation.sites().iter().map(|s| s.color).collect();
    let mut encoder = spawn_encoder(
        output.map(PathBuf::as_path),
        &args.format,
        width,
        height,
        playback_fps,
        &site_colors,
    )?;
    let result = {
        let mut sink = |pixels: &[u8], w: u32, h: u32| -> Result<(), SinkError> {
            encoder.emit(pixels, w, h)?;
            progress.inc(1);
            Ok(())
        };
        animation.run(&mut sink, || interrupted.load(Ordering::Relaxed))
    };
    let joined = animation.shutdown();
    log::debug!("{} workers joined", joined);

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            progress.abandon_with_message("Failed");
            // Flush what was written so far before reporting
            if let Err(finish_err) = encoder.finish() {
                log::error!("failed to finalize output: {:#}", finish_err);
            }
            return Err(e).context("frame loop halted");
        }
    };

    if summary.cancelled {
        progress.abandon_with_message("Interrupted");
        eprintln!("Interrupted after {} frames, finalizing output...", summary.frames);
    } else {
        progress.finish_with_message("Rendering complete");
    }

    encoder.finish()?;

    if summary.frames == 0 {
        eprintln!("No frames rendered.");
        return Ok(());
    }

    let secs = summary.elapsed.as_secs_f64();
    if let Some(path) = output {
        let partial = if summary.cancelled { "partial" } else { "complete" };
        println!("Output saved to: {:?} ({} frames, {})", path, summary.frames, partial);
    }
    println!(
        "Render time: {:.1}s wall, {:.2} fps avg",
        secs,
        summary.frames as f64 / secs.max(f64::EPSILON),
    );
    Ok(())
}

/// Streaming frame encoder. Frames go straight to disk or to ffmpeg; nothing
/// is accumulated in memory.
enum FrameEncoder {
    Png {
        path: PathBuf,
        staging: PathBuf,
    },
    Mp4 {
        child: std::process::Child,
    },
    Gif {
        encoder: gif::Encoder<std::fs::File>,
        palette: SitePalette,
        frame_delay: u16,
    },
    Null,
}

impl FrameEncoder {
    /// Write one frame's raw RGBA pixel data
    fn write_frame(&mut self, rgba: &[u8], width: u32, height: u32) -> anyhow::Result<()> {
        match self {
            FrameEncoder::Png { path, staging } => {
                // Write beside the target and rename, so readers never see a
                // half-written file
                image::save_buffer_with_format(
                    &*staging,
                    rgba,
                    width,
                    height,
                    image::ExtendedColorType::Rgba8,
                    image::ImageFormat::Png,
                )
                .with_context(|| format!("failed to write {:?}", staging))?;
                std::fs::rename(&*staging, &*path)
                    .with_context(|| format!("failed to replace {:?}", path))?;
            }
            FrameEncoder::Mp4 { child } => {
                use std::io::Write;
                let stdin = child
                    .stdin
                    .as_mut()
                    .ok_or_else(|| anyhow::anyhow!("ffmpeg stdin closed"))?;
                stdin
                    .write_all(rgba)
                    .context("failed to write frame to ffmpeg")?;
            }
            FrameEncoder::Gif { encoder, palette, frame_delay } => {
                // Indices refer to the global palette written with the header
                let frame = gif::Frame {
                    width: width as u16,
                    height: height as u16,
                    delay: *frame_delay,
                    buffer: Cow::Owned(palette.indices(rgba)),
                    ..gif::Frame::default()
                };
                encoder.write_frame(&frame)?;
            }
            FrameEncoder::Null => {}
        }
        Ok(())
    }

    /// Close the encoder and wait for it to finish
    fn finish(self) -> anyhow::Result<()> {
        match self {
            FrameEncoder::Mp4 { mut child } => {
                // Drop stdin to signal EOF
                drop(child.stdin.take());
                let status = child.wait()?;
                if !status.success() {
                    anyhow::bail!("ffmpeg exited with {}", status);
                }
                Ok(())
            }
            // GIF encoder flushes on drop
            FrameEncoder::Png { .. } | FrameEncoder::Gif { .. } | FrameEncoder::Null => Ok(()),
        }
    }
}

impl FrameSink for FrameEncoder {
    fn emit(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<(), SinkError> {
        self.write_frame(pixels, width, height).map_err(Into::into)
    }
}

/// Global GIF palette for one run.
///
/// A frame only holds site colors, their green-forced marker variants, and
/// black in rows no worker renders, so the palette is fixed when the sites
/// are. Past 256 entries a color maps to its nearest entry, cached on first
/// lookup.
struct SitePalette {
    colors: Vec<[u8; 3]>,
    index: HashMap<[u8; 3], u8>,
}

impl SitePalette {
    const SLOTS: usize = 256;

    fn new(site_colors: &[Rgba]) -> Self {
        let rgb: Vec<[u8; 3]> = site_colors.iter().map(|&[r, g, b, _]| [r, g, b]).collect();
        let markers = rgb.iter().map(|&[r, _, b]| [r, 0xff, b]);

        let mut palette = Self {
            colors: Vec::with_capacity(Self::SLOTS),
            index: HashMap::new(),
        };
        let candidates = std::iter::once([0, 0, 0])
            .chain(rgb.iter().copied())
            .chain(markers)
            .chain(std::iter::once([0, 0xff, 0]));
        for color in candidates {
            if palette.colors.len() == Self::SLOTS {
                log::warn!("more than {} frame colors, GIF output will be approximate", Self::SLOTS);
                break;
            }
            if let Entry::Vacant(slot) = palette.index.entry(color) {
                slot.insert(palette.colors.len() as u8);
                palette.colors.push(color);
            }
        }
        palette
    }

    fn lookup(&mut self, color: [u8; 3]) -> u8 {
        if let Some(&i) = self.index.get(&color) {
            return i;
        }
        let nearest = self
            .colors
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| {
                c.iter()
                    .zip(color)
                    .map(|(&a, b)| (a as i32 - b as i32).pow(2))
                    .sum::<i32>()
            })
            .map_or(0, |(i, _)| i as u8);
        self.index.insert(color, nearest);
        nearest
    }

    /// Palette index of every pixel in packed RGBA `rgba`
    fn indices(&mut self, rgba: &[u8]) -> Vec<u8> {
        rgba.chunks_exact(4)
            .map(|p| self.lookup([p[0], p[1], p[2]]))
            .collect()
    }

    /// Flat RGB bytes, padded to 256 entries
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.colors.as_flattened().to_vec();
        bytes.resize(Self::SLOTS * 3, 0);
        bytes
    }
}

/// Open the output for streaming
fn spawn_encoder(
    output: Option<&Path>,
    format: &OutputFormat,
    width: u32,
    height: u32,
    fps: u32,
    site_colors: &[Rgba],
) -> anyhow::Result<FrameEncoder> {
    let Some(output) = output else {
        return Ok(FrameEncoder::Null);
    };
    match format {
        OutputFormat::Null => Ok(FrameEncoder::Null),
        OutputFormat::Png => {
            let mut staging = output.as_os_str().to_owned();
            staging.push(".tmp");
            Ok(FrameEncoder::Png {
                path: output.to_path_buf(),
                staging: PathBuf::from(staging),
            })
        }
        OutputFormat::Mp4 => {
            use std::process::{Command, Stdio};
            let child = Command::new("ffmpeg")
                .args([
                    "-y",
                    "-f", "rawvideo",
                    "-pix_fmt", "rgba",
                    "-s", &format!("{}x{}", width, height),
                    "-r", &fps.to_string(),
                    "-i", "-", // read from stdin
                    "-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2",
                    "-c:v", "libx264",
                    "-pix_fmt", "yuv420p",
                    "-crf", "18",
                ])
                .arg(output)
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .context("failed to spawn ffmpeg")?;
            Ok(FrameEncoder::Mp4 { child })
        }
        OutputFormat::Gif => {
            use gif::{Encoder, Repeat};
            if width > u16::MAX as u32 || height > u16::MAX as u32 {
                anyhow::bail!("GIF frames are limited to 65535x65535, got {}x{}", width, height);
            }
            let file = std::fs::File::create(output)
                .with_context(|| format!("failed to create {:?}", output))?;
            let palette = SitePalette::new(site_colors);
            let mut encoder = Encoder::new(file, width as u16, height as u16, &palette.to_bytes())?;
            encoder.set_repeat(Repeat::Infinite)?;
            let frame_delay = (100 / fps).max(1) as u16;
            Ok(FrameEncoder::Gif { encoder, palette, frame_delay })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["drift"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("ff0000").unwrap(), [0xff, 0, 0, 0xff]);
        assert_eq!(parse_color("#12aBcd").unwrap(), [0x12, 0xab, 0xcd, 0xff]);
        assert!(parse_color("fff").is_err());
        assert!(parse_color("gg0000").is_err());
    }

    #[test]
    fn test_flags_override_yaml() {
        let spec: AnimSpec = serde_yaml::from_str(
            "width: 64\nheight: 32\nworkers: 4\nseed: 5\nexecution: sequential\nshow_sites: false\n",
        )
        .unwrap();
        let config = build_config(&args(&["--workers", "8", "--execution", "pool"]), &spec).unwrap();

        assert_eq!((config.width, config.height), (64, 32));
        assert_eq!(config.workers, 8);
        assert_eq!(config.execution, Execution::Pool);
        assert_eq!(config.seed, 5);
        assert!(!config.show_sites);
    }

    #[test]
    fn test_defaults_without_yaml() {
        let config = build_config(&args(&["--seed", "1"]), &AnimSpec::default()).unwrap();
        assert_eq!((config.width, config.height), (1920, 1080));
        assert_eq!(config.site_count, None);
        assert_eq!(config.timesteps, None);
        assert_eq!(config.timing, Timing::Fixed(1.0 / 30.0));
        assert!(config.show_sites);
    }

    #[test]
    fn test_uneven_workers_rejected_unless_legacy() {
        let spec = AnimSpec::default();
        assert!(build_config(&args(&["--height", "100", "--workers", "7"]), &spec).is_err());
        let config = build_config(
            &args(&["--height", "100", "--workers", "7", "--partition", "legacy"]),
            &spec,
        )
        .unwrap();
        assert_eq!(config.partition, PartitionMode::Legacy);
    }

    #[test]
    fn test_unknown_yaml_key_rejected() {
        assert!(serde_yaml::from_str::<AnimSpec>("colour: red\n").is_err());
    }

    #[test]
    fn test_realtime_and_fps() {
        let config = build_config(&args(&["--realtime"]), &AnimSpec::default()).unwrap();
        assert_eq!(config.timing, Timing::RealTime);
        let config = build_config(&args(&["--fps", "60"]), &AnimSpec::default()).unwrap();
        assert_eq!(config.timing, Timing::Fixed(1.0 / 60.0));
        assert!(build_config(&args(&["--fps", "0"]), &AnimSpec::default()).is_err());
    }

    #[test]
    fn test_site_palette_covers_frame_colors() {
        let mut palette = SitePalette::new(&[[1, 2, 3, 255], [4, 5, 6, 255], [1, 2, 3, 255]]);
        assert_eq!(
            palette.colors,
            vec![[0, 0, 0], [1, 2, 3], [4, 5, 6], [1, 255, 3], [4, 255, 6], [0, 255, 0]]
        );

        let rgba = [1, 2, 3, 255, 4, 255, 6, 255, 0, 0, 0, 0, 1, 2, 3, 255];
        assert_eq!(palette.indices(&rgba), vec![1, 4, 0, 1]);

        let bytes = palette.to_bytes();
        assert_eq!(bytes.len(), 256 * 3);
        assert_eq!(&bytes[..9], &[0, 0, 0, 1, 2, 3, 4, 5, 6]);
        assert!(bytes[18..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_site_palette_overflow_maps_to_nearest() {
        let sites: Vec<Rgba> = (0..200u8).map(|i| [i, 0, 0, 255]).collect();
        let mut palette = SitePalette::new(&sites);
        assert_eq!(palette.colors.len(), 256);

        // Site 0 is black, so 200 site entries leave room for 56 markers;
        // the marker of site 199 did not fit
        let missing = [199, 255, 0];
        assert!(!palette.colors.contains(&missing));
        let i = palette.indices(&[199, 255, 0, 255])[0];
        assert_eq!(palette.colors[i as usize], [55, 255, 0]);
        assert_eq!(palette.index.get(&missing), Some(&i));
    }
}
