//! Temporal segmentation of event streams into frame windows.
//!
//! A stream is cut into successive windows derived from a target frame rate:
//! window `i` ends at `t0 + (i+1)*dt` with `dt = 1/fps` seconds and spans
//! `max(dt, delta)` backwards, so a `delta` above the frame period yields
//! overlapping sliding windows. Windows are half-open except the final one,
//! which is closed so the maximum timestamp is never dropped.

use crate::archive::{self, ArchiveError, ARCHIVE_EXT};
use crate::render::{accumulate_frame, RenderError, RenderOptions};
use crate::types::{EventStream, Geometry};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Suffix of the per-capture output directory holding frame archives.
pub const FRAME_DIR_SUFFIX: &str = "_event_frame";

/// Subdirectory for per-window event archives.
pub const ARCHIVE_SUBDIR: &str = "evs";

/// Subdirectory for per-window accumulation images.
pub const IMAGE_SUBDIR: &str = "png";

/// Errors that can occur during segmentation.
#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame rate must be positive, got {0}")]
    NonPositiveRate(f64),

    #[error(
        "requested {fps} frames/s but the stream holds only {distinct} distinct timestamps"
    )]
    InsufficientRate { fps: f64, distinct: usize },

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("failed to write frame image: {0}")]
    Image(#[from] image::ImageError),
}

/// Options controlling how a stream is cut into windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitOptions {
    /// Target frame rate in frames per second.
    pub fps: f64,
    /// Optional window length in seconds; values below the frame period are
    /// clamped up to it.
    pub delta: Option<f64>,
    /// Write archives for windows that contain no events, preserving the
    /// positional numbering of window indices.
    pub save_empty: bool,
}

impl SplitOptions {
    /// Options for a plain partition at `fps` frames per second.
    pub fn new(fps: f64) -> Self {
        Self {
            fps,
            delta: None,
            save_empty: true,
        }
    }
}

/// One planned frame window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameWindow {
    /// 0-based window index
    pub index: usize,
    /// Inclusive window start, seconds
    pub t_start: f64,
    /// Window end, seconds; exclusive unless `closed`
    pub t_end: f64,
    /// The final window is closed so the stream maximum is included
    pub closed: bool,
}

/// Computes the window sequence covering a stream at the requested rate.
///
/// Fails before any window is computed when the rate is not positive or
/// exceeds the number of distinct timestamps in the stream.
pub fn plan_windows(
    stream: &EventStream,
    opts: &SplitOptions,
) -> Result<Vec<FrameWindow>, SegmentError> {
    if !(opts.fps > 0.0) {
        return Err(SegmentError::NonPositiveRate(opts.fps));
    }

    let distinct = stream.distinct_timestamp_count();
    if opts.fps > distinct as f64 {
        return Err(SegmentError::InsufficientRate {
            fps: opts.fps,
            distinct,
        });
    }

    // distinct >= 1 past the precondition, so bounds exist
    let (t0, tn) = match stream.time_bounds() {
        Some(bounds) => bounds,
        None => {
            return Err(SegmentError::InsufficientRate {
                fps: opts.fps,
                distinct: 0,
            })
        }
    };

    let dt = 1.0 / opts.fps;
    let window_len = match opts.delta {
        Some(delta) => delta.max(dt),
        None => dt,
    };

    let count = ((tn - t0) / dt).ceil() as usize;
    let mut windows = Vec::with_capacity(count);
    for index in 0..count {
        let t_end = t0 + (index + 1) as f64 * dt;
        windows.push(FrameWindow {
            index,
            t_start: t_end - window_len,
            t_end,
            closed: t_end == tn,
        });
    }
    Ok(windows)
}

/// Splits a stream into per-window sub-streams in memory.
///
/// Empty windows are dropped unless `save_empty` is set; the window index
/// always reflects the window's position in the full plan.
pub fn split_stream(
    stream: &EventStream,
    opts: &SplitOptions,
) -> Result<Vec<(FrameWindow, EventStream)>, SegmentError> {
    let windows = plan_windows(stream, opts)?;
    let mut frames = Vec::new();
    for window in windows {
        let sub = stream.window(window.t_start, window.t_end, window.closed);
        if sub.is_empty() && !opts.save_empty {
            continue;
        }
        frames.push((window, sub));
    }
    Ok(frames)
}

/// Counts reported by [`write_event_frames`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSummary {
    /// Windows in the plan
    pub planned: usize,
    /// Archives written
    pub written: usize,
    /// Empty windows skipped
    pub skipped: usize,
    /// Images written
    pub images: usize,
    /// Events covered by written archives
    pub events: usize,
}

/// Writes a stream as per-window archives (and optionally images) under
/// `out_root`.
///
/// Archives land in `out_root/evs/NNNN.evs` and images in
/// `out_root/png/NNNN.png`, both named by the zero-padded window index.
pub fn write_event_frames(
    stream: &EventStream,
    geometry: Geometry,
    out_root: &Path,
    opts: &SplitOptions,
    render: Option<&RenderOptions>,
) -> Result<FrameSummary, SegmentError> {
    let windows = plan_windows(stream, opts)?;

    let archive_dir = out_root.join(ARCHIVE_SUBDIR);
    fs::create_dir_all(&archive_dir)?;
    let image_dir = out_root.join(IMAGE_SUBDIR);
    if render.is_some() {
        fs::create_dir_all(&image_dir)?;
    }

    let mut summary = FrameSummary {
        planned: windows.len(),
        ..Default::default()
    };

    for window in &windows {
        let sub = stream.window(window.t_start, window.t_end, window.closed);
        if sub.is_empty() && !opts.save_empty {
            summary.skipped += 1;
            continue;
        }

        let stem = format!("{:04}", window.index);
        archive::write_archive(archive_dir.join(format!("{stem}.{ARCHIVE_EXT}")), &sub)?;
        summary.written += 1;
        summary.events += sub.len();

        if let Some(render_opts) = render {
            let image = accumulate_frame(&sub, geometry, render_opts)?;
            image.save(image_dir.join(format!("{stem}.png")))?;
            summary.images += 1;
        }
    }

    log::debug!(
        "segmented {} events into {} of {} windows ({} skipped)",
        summary.events,
        summary.written,
        summary.planned,
        summary.skipped
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(ts: &[f64]) -> EventStream {
        let mut stream = EventStream::new();
        for (i, &t) in ts.iter().enumerate() {
            stream.push(t, i as u16, i as u16, if i % 2 == 0 { 1 } else { -1 });
        }
        stream
    }

    #[test]
    fn test_plan_covers_span() {
        let stream = stream_of(&[0.0, 1.0, 2.0, 3.0]);
        let windows = plan_windows(&stream, &SplitOptions::new(1.0)).unwrap();

        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].t_start, 0.0);
        assert_eq!(windows[0].t_end, 1.0);
        assert!(!windows[0].closed);
        assert_eq!(windows[2].t_end, 3.0);
        assert!(windows[2].closed);
    }

    #[test]
    fn test_final_window_includes_maximum() {
        let stream = stream_of(&[0.0, 1.0, 2.0, 3.0]);
        let frames = split_stream(&stream, &SplitOptions::new(1.0)).unwrap();

        let (last_window, last) = frames.last().unwrap();
        assert!(last_window.closed);
        // The boundary-equal maximum lands in the closed final window
        assert_eq!(last.t(), &[2.0, 3.0]);
    }

    #[test]
    fn test_partition_round_trip() {
        let stream = stream_of(&[0.0, 0.4, 1.0, 1.6, 2.0, 2.9, 3.0]);
        let frames = split_stream(&stream, &SplitOptions::new(1.0)).unwrap();

        let mut merged = EventStream::new();
        for (_, sub) in &frames {
            merged.concat(sub);
        }
        assert_eq!(merged, stream);
    }

    #[test]
    fn test_single_window_is_unchanged() {
        // Re-segmenting one window at its own rate returns it as-is
        let stream = stream_of(&[10.0, 10.25, 10.5, 11.0]);
        let frames = split_stream(&stream, &SplitOptions::new(1.0)).unwrap();

        assert_eq!(frames.len(), 1);
        assert!(frames[0].0.closed);
        assert_eq!(frames[0].1, stream);
    }

    #[test]
    fn test_insufficient_rate_rejected() {
        let stream = stream_of(&[0.0, 1.0, 2.0]);
        let result = plan_windows(&stream, &SplitOptions::new(10.0));
        assert!(matches!(
            result,
            Err(SegmentError::InsufficientRate {
                distinct: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_non_positive_rate_rejected() {
        let stream = stream_of(&[0.0, 1.0]);
        assert!(matches!(
            plan_windows(&stream, &SplitOptions::new(0.0)),
            Err(SegmentError::NonPositiveRate(_))
        ));
        assert!(matches!(
            plan_windows(&stream, &SplitOptions::new(-5.0)),
            Err(SegmentError::NonPositiveRate(_))
        ));
    }

    #[test]
    fn test_empty_stream_has_no_resolution() {
        let result = plan_windows(&EventStream::new(), &SplitOptions::new(1.0));
        assert!(matches!(
            result,
            Err(SegmentError::InsufficientRate { distinct: 0, .. })
        ));
    }

    #[test]
    fn test_delta_extends_windows_backwards() {
        let stream = stream_of(&[0.0, 0.5, 1.0, 1.5, 2.0]);
        let opts = SplitOptions {
            fps: 1.0,
            delta: Some(2.0),
            save_empty: true,
        };
        let windows = plan_windows(&stream, &opts).unwrap();

        assert_eq!(windows[0].t_end - windows[0].t_start, 2.0);
        // Overlapping windows: an event can appear in more than one
        let frames = split_stream(&stream, &opts).unwrap();
        assert_eq!(frames[0].1.t(), &[0.0, 0.5]);
        assert_eq!(frames[1].1.t(), &[0.0, 0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn test_delta_below_period_is_clamped() {
        let stream = stream_of(&[0.0, 1.0, 2.0]);
        let opts = SplitOptions {
            fps: 1.0,
            delta: Some(0.25),
            save_empty: true,
        };
        let windows = plan_windows(&stream, &opts).unwrap();
        assert_eq!(windows[0].t_end - windows[0].t_start, 1.0);
    }

    #[test]
    fn test_zero_span_stream_plans_no_windows() {
        let stream = stream_of(&[5.0, 5.0, 5.0]);
        let windows = plan_windows(&stream, &SplitOptions::new(1.0)).unwrap();
        assert!(windows.is_empty());
    }

    #[test]
    fn test_empty_windows_skipped_or_kept() {
        let stream = stream_of(&[0.0, 2.5]);

        let kept = split_stream(&stream, &SplitOptions::new(1.0)).unwrap();
        assert_eq!(kept.len(), 3);
        assert!(kept[1].1.is_empty());
        assert_eq!(kept[1].0.index, 1);

        let skipped = split_stream(
            &stream,
            &SplitOptions {
                fps: 1.0,
                delta: None,
                save_empty: false,
            },
        )
        .unwrap();
        assert_eq!(skipped.len(), 2);
        // Positional numbering survives the skip
        assert_eq!(skipped[0].0.index, 0);
        assert_eq!(skipped[1].0.index, 2);
    }

    #[test]
    fn test_write_event_frames_layout() {
        let dir = tempfile::tempdir().unwrap();
        let stream = stream_of(&[0.0, 1.0, 2.0]);
        let geometry = Geometry::new(4, 4).unwrap();
        let out_root = dir.path().join("capture_event_frame");

        let summary = write_event_frames(
            &stream,
            geometry,
            &out_root,
            &SplitOptions::new(1.0),
            Some(&RenderOptions::default()),
        )
        .unwrap();

        assert_eq!(summary.planned, 2);
        assert_eq!(summary.written, 2);
        assert_eq!(summary.images, 2);
        assert_eq!(summary.events, 3);

        assert!(out_root.join("evs/0000.evs").is_file());
        assert!(out_root.join("evs/0001.evs").is_file());
        assert!(out_root.join("png/0000.png").is_file());
        assert!(out_root.join("png/0001.png").is_file());

        let first = archive::read_archive(out_root.join("evs/0000.evs")).unwrap();
        assert_eq!(first.t(), &[0.0]);
    }
}
