//! normal_v2 capture toolkit CLI.
//!
//! Decodes APX EVB Gen2 normal_v2 captures to event archives, segments
//! archives into per-window event frames, merges frame directories, and
//! inspects archives and frame images.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use nv2_core::segment::FRAME_DIR_SUFFIX;
use nv2_core::{
    merge, read_archive, render, write_archive, CaptureDecoder, DecodeError, Geometry,
    PayloadLayout, PolarityMap, RenderOptions, SplitOptions,
};
use std::path::PathBuf;
use std::time::Instant;

/// normal_v2 event stream toolkit.
///
/// Decodes APX EVB Gen2 2-bit packed captures and works with the resulting
/// event archives.
#[derive(Parser, Debug)]
#[command(name = "nv2")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Suppress progress and info output
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a capture file into one event archive
    Decode {
        /// Input capture .bin file
        input: PathBuf,

        /// Record index table (default: <stem>_info.txt next to the input)
        #[arg(short, long)]
        index: Option<PathBuf>,

        /// Output archive path (default: events_<stamp>.evs next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Sensor width in pixels (default: parsed from the input filename)
        #[arg(long)]
        width: Option<u32>,

        /// Sensor height in pixels (default: parsed from the input filename)
        #[arg(long)]
        height: Option<u32>,

        /// Payload placement within each record block
        #[arg(long, value_enum, default_value_t = LayoutArg::Header)]
        layout: LayoutArg,
    },

    /// Segment an event archive into per-window frame archives
    Frames {
        /// Input event archive
        input: PathBuf,

        /// Target frame rate in frames per second
        #[arg(short, long)]
        fps: f64,

        /// Window length in seconds; values above 1/fps give sliding windows
        #[arg(short, long)]
        delta: Option<f64>,

        /// Skip windows that contain no events
        #[arg(long)]
        skip_empty: bool,

        /// Also render one accumulation PNG per window
        #[arg(long)]
        png: bool,

        /// Grey value added per ON event (with --off, enables the polarity map)
        #[arg(long)]
        on: Option<f32>,

        /// Grey value added per OFF event
        #[arg(long)]
        off: Option<f32>,

        /// Rescale image intensities to the full 8-bit range
        #[arg(long)]
        normalize: bool,

        /// Sensor width for rendering
        #[arg(long, default_value_t = 816)]
        width: u32,

        /// Sensor height for rendering
        #[arg(long, default_value_t = 612)]
        height: u32,

        /// Output directory (default: <stem>_event_frame next to the input)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Merge a directory of event archives into one archive
    Merge {
        /// Directory containing .evs archives
        dir: PathBuf,

        /// Output archive (default: all.evs inside the directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Sort the merged stream by timestamp
        #[arg(short, long)]
        sort: bool,
    },

    /// Print summary information about an event archive
    Info {
        /// Event archive to inspect
        input: PathBuf,

        /// Number of leading events to print
        #[arg(short = 'n', long, default_value_t = 5)]
        head: usize,
    },

    /// Compare two grayscale frame images
    Diff {
        /// First image
        a: PathBuf,

        /// Second image
        b: PathBuf,

        /// Write the absolute difference image here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LayoutArg {
    /// Payload is the trailing bytes of each record block
    Trailing,
    /// Payload follows a fixed 128-byte block header
    Header,
}

impl From<LayoutArg> for PayloadLayout {
    fn from(value: LayoutArg) -> Self {
        match value {
            LayoutArg::Trailing => PayloadLayout::Trailing,
            LayoutArg::Header => PayloadLayout::HeaderPrefixed,
        }
    }
}

/// Geometry and timestamp parsed from the capture filename convention
/// `normal_v2_<width>_<height>_<stamp>`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CaptureName {
    width: u32,
    height: u32,
    stamp: String,
}

impl CaptureName {
    fn parse(stem: &str) -> Option<Self> {
        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() < 3 {
            return None;
        }
        let width = parts[parts.len() - 3].parse().ok()?;
        let height = parts[parts.len() - 2].parse().ok()?;
        Some(Self {
            width,
            height,
            stamp: parts[parts.len() - 1].to_string(),
        })
    }
}

fn spinner(progress: &MultiProgress, quiet: bool, message: String) -> ProgressBar {
    let bar = if quiet {
        ProgressBar::hidden()
    } else {
        let bar = progress.add(ProgressBar::new_spinner());
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );
        bar
    };
    bar.set_message(message);
    bar
}

fn file_stem(path: &std::path::Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

#[allow(clippy::too_many_arguments)]
fn run_decode(
    input: PathBuf,
    index: Option<PathBuf>,
    output: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    layout: LayoutArg,
    progress: &MultiProgress,
    quiet: bool,
) -> Result<()> {
    let stem = file_stem(&input);
    let name = CaptureName::parse(&stem);

    let geometry = match (width, height, &name) {
        (Some(w), Some(h), _) => Geometry::new(w, h)?,
        (None, None, Some(name)) => Geometry::new(name.width, name.height)?,
        (None, None, None) => bail!(
            "cannot infer sensor geometry from {:?}; pass --width and --height",
            input
        ),
        _ => bail!("--width and --height must be given together"),
    };

    let index_path = index.unwrap_or_else(|| input.with_file_name(format!("{stem}_info.txt")));
    let output_path = output.unwrap_or_else(|| {
        let file = match &name {
            Some(name) => format!("events_{}.evs", name.stamp),
            None => format!("{stem}.evs"),
        };
        input.with_file_name(file)
    });

    let bar = spinner(progress, quiet, format!("Decoding {stem}..."));
    let start = Instant::now();

    let decoder = CaptureDecoder::new(geometry, layout.into());
    let stream = match decoder.decode_capture(&input, &index_path) {
        Ok(stream) => stream,
        Err(DecodeError::NoEvents) => {
            bar.finish_and_clear();
            log::warn!(
                "no events decoded from {:?}; {:?} was not written",
                input,
                output_path
            );
            return Ok(());
        }
        Err(e) => return Err(e).context("failed to decode capture"),
    };

    write_archive(&output_path, &stream).context("failed to write event archive")?;

    let duration = start.elapsed();
    bar.finish_and_clear();
    log::info!(
        "decoded {} events ({}x{}) in {:.2}s -> {:?}",
        stream.len(),
        geometry.width(),
        geometry.height(),
        duration.as_secs_f64(),
        output_path
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_frames(
    input: PathBuf,
    fps: f64,
    delta: Option<f64>,
    skip_empty: bool,
    png: bool,
    on: Option<f32>,
    off: Option<f32>,
    normalize: bool,
    width: u32,
    height: u32,
    out: Option<PathBuf>,
    progress: &MultiProgress,
    quiet: bool,
) -> Result<()> {
    let stream = read_archive(&input).context("failed to read event archive")?;
    let stem = file_stem(&input);
    let out_root = out.unwrap_or_else(|| input.with_file_name(format!("{stem}{FRAME_DIR_SUFFIX}")));

    let opts = SplitOptions {
        fps,
        delta,
        save_empty: !skip_empty,
    };
    let polarity_map = match (on, off) {
        (None, None) => None,
        (on, off) => Some(PolarityMap {
            on: on.unwrap_or(200.0),
            off: off.unwrap_or(100.0),
        }),
    };
    let render_opts = RenderOptions {
        polarity_map,
        normalize,
    };
    let geometry = Geometry::new(width, height)?;

    let bar = spinner(
        progress,
        quiet,
        format!("Segmenting {} events at {fps} fps...", stream.len()),
    );
    let summary = nv2_core::write_event_frames(
        &stream,
        geometry,
        &out_root,
        &opts,
        png.then_some(&render_opts),
    )
    .context("failed to write event frames")?;
    bar.finish_and_clear();

    log::info!(
        "wrote {} of {} windows ({} skipped, {} images) covering {} events -> {:?}",
        summary.written,
        summary.planned,
        summary.skipped,
        summary.images,
        summary.events,
        out_root
    );
    Ok(())
}

fn run_merge(
    dir: PathBuf,
    output: Option<PathBuf>,
    sort: bool,
    progress: &MultiProgress,
    quiet: bool,
) -> Result<()> {
    let out_path = output.unwrap_or_else(|| dir.join("all.evs"));

    let bar = spinner(progress, quiet, format!("Merging archives in {dir:?}..."));
    let count = merge::merge_to_archive(&dir, &out_path, sort).context("merge failed")?;
    bar.finish_and_clear();

    log::info!("merged {count} events -> {out_path:?}");
    Ok(())
}

fn run_info(input: PathBuf, head: usize) -> Result<()> {
    let stream = read_archive(&input).context("failed to read event archive")?;

    println!("archive:   {}", input.display());
    println!("events:    {}", stream.len());

    if let Some((t_min, t_max)) = stream.time_bounds() {
        println!("t range:   {t_min:.6}s -> {t_max:.6}s");
        println!("distinct:  {} timestamps", stream.distinct_timestamp_count());

        let x_max = stream.x().iter().max().copied().unwrap_or(0);
        let y_max = stream.y().iter().max().copied().unwrap_or(0);
        println!("x max:     {x_max}");
        println!("y max:     {y_max}");

        for i in 0..head.min(stream.len()) {
            println!(
                "  {:.6}s  (x={}, y={}, p={:+})",
                stream.t()[i],
                stream.x()[i],
                stream.y()[i],
                stream.p()[i]
            );
        }
    }
    Ok(())
}

fn run_diff(a: PathBuf, b: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let image_a = image::open(&a)
        .with_context(|| format!("failed to open {a:?}"))?
        .to_luma8();
    let image_b = image::open(&b)
        .with_context(|| format!("failed to open {b:?}"))?
        .to_luma8();

    let diff = render::diff_frames(&image_a, &image_b)?;

    match render::diff_stats(&diff) {
        Some(stats) => log::info!(
            "{} pixels differ (mean {:.2}, max {})",
            stats.changed,
            stats.mean,
            stats.max
        ),
        None => log::info!("images are identical"),
    }

    if let Some(out_path) = output {
        diff.save(&out_path)
            .with_context(|| format!("failed to write {out_path:?}"))?;
        log::info!("difference image -> {out_path:?}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let logger = simplelog::TermLogger::new(
        if cli.quiet {
            simplelog::LevelFilter::Warn
        } else {
            simplelog::LevelFilter::Info
        },
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger)
        .try_init()
        .context("could not initialize logging")?;

    match cli.command {
        Command::Decode {
            input,
            index,
            output,
            width,
            height,
            layout,
        } => run_decode(
            input, index, output, width, height, layout, &progress, cli.quiet,
        ),
        Command::Frames {
            input,
            fps,
            delta,
            skip_empty,
            png,
            on,
            off,
            normalize,
            width,
            height,
            out,
        } => run_frames(
            input, fps, delta, skip_empty, png, on, off, normalize, width, height, out, &progress,
            cli.quiet,
        ),
        Command::Merge { dir, output, sort } => {
            run_merge(dir, output, sort, &progress, cli.quiet)
        }
        Command::Info { input, head } => run_info(input, head),
        Command::Diff { a, b, output } => run_diff(a, b, output),
    }
}
