//! Core types for normal_v2 event data.
//!
//! This module defines the sensor geometry, record index entries, payload
//! layout conventions, and the columnar event stream shared by the decoder,
//! segmenter, and merger.

use std::ops::Range;
use thiserror::Error;

/// Errors produced when validating sensor geometry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("sensor dimensions {0}x{1} must both be non-zero")]
    ZeroDimension(u32, u32),

    #[error("sensor dimension {0} exceeds the 16-bit coordinate range")]
    DimensionTooLarge(u32),
}

/// Sensor geometry in pixels.
///
/// Dimensions are validated on construction: event coordinates are stored as
/// `u16`, so a width or height above 65535 is rejected rather than wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    width: u32,
    height: u32,
}

impl Geometry {
    /// Creates a validated geometry.
    pub fn new(width: u32, height: u32) -> Result<Self, GeometryError> {
        if width == 0 || height == 0 {
            return Err(GeometryError::ZeroDimension(width, height));
        }
        if width > u16::MAX as u32 {
            return Err(GeometryError::DimensionTooLarge(width));
        }
        if height > u16::MAX as u32 {
            return Err(GeometryError::DimensionTooLarge(height));
        }
        Ok(Self { width, height })
    }

    /// Sensor width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Sensor height in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Total number of pixels.
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Packed payload size in bytes: four pixels per byte, 2 bits each.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.pixel_count() / 4
    }
}

impl Default for Geometry {
    fn default() -> Self {
        // EVB Gen2 sensor geometry (816x612)
        Self {
            width: 816,
            height: 612,
        }
    }
}

/// Placement of the packed payload within an indexed record block.
///
/// Two conventions exist in the wild and the capture file does not say which
/// one it uses; the caller selects the variant per capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadLayout {
    /// Payload is the trailing `payload_len` bytes of the block (older
    /// captures).
    Trailing,
    /// Payload starts after a fixed 128-byte block header (newer captures).
    #[default]
    HeaderPrefixed,
}

/// Size of the block header preceding the payload in
/// [`PayloadLayout::HeaderPrefixed`] captures.
pub const BLOCK_HEADER_LEN: usize = 128;

impl PayloadLayout {
    /// Byte range of the payload within a `block_len`-byte record block, or
    /// `None` if the block is too small to contain one.
    pub fn payload_range(&self, block_len: usize, payload_len: usize) -> Option<Range<usize>> {
        match self {
            Self::Trailing => block_len.checked_sub(payload_len).map(|start| start..block_len),
            Self::HeaderPrefixed => {
                let end = BLOCK_HEADER_LEN + payload_len;
                (end <= block_len).then_some(BLOCK_HEADER_LEN..end)
            }
        }
    }
}

/// One row of the capture's record index table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordEntry {
    /// Record timestamp in microseconds
    pub timestamp_us: u64,
    /// Byte offset of the record block within the capture file
    pub offset: u64,
    /// Length of the record block in bytes
    pub length: u64,
}

impl RecordEntry {
    /// Record timestamp converted to seconds.
    #[inline]
    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp_us as f64 * 1e-6
    }
}

/// Columns of an [`EventStream`] disagree in length.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("event columns have mismatched lengths (t={t}, x={x}, y={y}, p={p})")]
pub struct ColumnLengthMismatch {
    pub t: usize,
    pub x: usize,
    pub y: usize,
    pub p: usize,
}

/// A decoded event stream in column layout.
///
/// Events are stored as four parallel same-length columns rather than an
/// array of structs; every reader and writer of the on-disk archive format
/// preserves this layout. The columns are private so the equal-length
/// invariant cannot be broken from outside.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventStream {
    t: Vec<f64>,
    x: Vec<u16>,
    y: Vec<u16>,
    p: Vec<i8>,
}

impl EventStream {
    /// Creates an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty stream with room for `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            t: Vec::with_capacity(capacity),
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            p: Vec::with_capacity(capacity),
        }
    }

    /// Assembles a stream from four pre-built columns.
    pub fn from_columns(
        t: Vec<f64>,
        x: Vec<u16>,
        y: Vec<u16>,
        p: Vec<i8>,
    ) -> Result<Self, ColumnLengthMismatch> {
        if t.len() != x.len() || t.len() != y.len() || t.len() != p.len() {
            return Err(ColumnLengthMismatch {
                t: t.len(),
                x: x.len(),
                y: y.len(),
                p: p.len(),
            });
        }
        Ok(Self { t, x, y, p })
    }

    /// Number of events in the stream.
    #[inline]
    pub fn len(&self) -> usize {
        self.t.len()
    }

    /// True if the stream holds no events.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// Timestamp column, seconds.
    #[inline]
    pub fn t(&self) -> &[f64] {
        &self.t
    }

    /// X coordinate column.
    #[inline]
    pub fn x(&self) -> &[u16] {
        &self.x
    }

    /// Y coordinate column.
    #[inline]
    pub fn y(&self) -> &[u16] {
        &self.y
    }

    /// Polarity column, +1 for ON and -1 for OFF.
    #[inline]
    pub fn p(&self) -> &[i8] {
        &self.p
    }

    /// Appends a single event.
    #[inline]
    pub fn push(&mut self, t: f64, x: u16, y: u16, p: i8) {
        self.t.push(t);
        self.x.push(x);
        self.y.push(y);
        self.p.push(p);
    }

    /// Appends a batch of coordinates sharing one timestamp.
    ///
    /// The three slices must have equal length.
    pub fn extend_stamped(&mut self, t: f64, x: &[u16], y: &[u16], p: &[i8]) {
        debug_assert!(x.len() == y.len() && x.len() == p.len());
        self.t.extend(std::iter::repeat(t).take(x.len()));
        self.x.extend_from_slice(x);
        self.y.extend_from_slice(y);
        self.p.extend_from_slice(p);
    }

    /// Appends all events of `other`, preserving their order.
    pub fn concat(&mut self, other: &EventStream) {
        self.t.extend_from_slice(&other.t);
        self.x.extend_from_slice(&other.x);
        self.y.extend_from_slice(&other.y);
        self.p.extend_from_slice(&other.p);
    }

    /// Minimum and maximum timestamp, or `None` for an empty stream.
    pub fn time_bounds(&self) -> Option<(f64, f64)> {
        let first = *self.t.first()?;
        let mut lo = first;
        let mut hi = first;
        for &v in &self.t[1..] {
            if v < lo {
                lo = v;
            }
            if v > hi {
                hi = v;
            }
        }
        Some((lo, hi))
    }

    /// Number of distinct timestamp values in the stream.
    pub fn distinct_timestamp_count(&self) -> usize {
        let mut ts = self.t.clone();
        ts.sort_by(f64::total_cmp);
        ts.dedup();
        ts.len()
    }

    /// Extracts the events whose timestamp falls in `[t_start, t_end)`, or
    /// `[t_start, t_end]` when `closed` is set.
    pub fn window(&self, t_start: f64, t_end: f64, closed: bool) -> EventStream {
        let mut out = EventStream::new();
        for i in 0..self.len() {
            let t = self.t[i];
            let inside = t >= t_start && if closed { t <= t_end } else { t < t_end };
            if inside {
                out.push(t, self.x[i], self.y[i], self.p[i]);
            }
        }
        out
    }

    /// Sorts all four columns by timestamp with one shared permutation.
    ///
    /// The sort is stable: events with equal timestamps keep their original
    /// relative order.
    pub fn sort_by_time(&mut self) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| self.t[a].total_cmp(&self.t[b]));

        self.t = order.iter().map(|&i| self.t[i]).collect();
        self.x = order.iter().map(|&i| self.x[i]).collect();
        self.y = order.iter().map(|&i| self.y[i]).collect();
        self.p = order.iter().map(|&i| self.p[i]).collect();
    }
}
