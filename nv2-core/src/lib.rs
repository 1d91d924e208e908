//! Decoder and event-frame toolkit for APX EVB Gen2 `normal_v2` captures.
//!
//! This crate decodes the 2-bit-per-pixel packed binary format produced by
//! APX EVB Gen2 event cameras into a columnar event stream (t, x, y, p),
//! segments streams into fixed-rate or sliding-window frame archives, renders
//! per-window accumulation images, and merges archive directories back into
//! one canonical stream.
//!
//! # Example
//!
//! ```no_run
//! use nv2_core::{CaptureDecoder, Geometry, PayloadLayout};
//!
//! let geometry = Geometry::new(816, 612).unwrap();
//! let decoder = CaptureDecoder::new(geometry, PayloadLayout::HeaderPrefixed);
//! let stream = decoder
//!     .decode_capture("capture.bin", "capture_info.txt")
//!     .unwrap();
//!
//! println!("Decoded {} events", stream.len());
//! println!("Sensor: {}x{}", geometry.width(), geometry.height());
//! ```
//!
//! # Features
//!
//! - Record index parsing with and without a header row
//! - Both payload layout conventions (trailing and 128-byte header)
//! - Temporal segmentation with window overlap and empty-window control
//! - Polarity-mapped accumulation images
//! - Stable time-sorted merging of archive directories

pub mod archive;
pub mod decoder;
pub mod index;
pub mod merge;
pub mod render;
pub mod segment;
pub mod types;

// Re-export commonly used types
pub use archive::{read_archive, write_archive, ArchiveError};
pub use decoder::{CaptureDecoder, DecodeError, RecordEvents};
pub use index::{IndexError, IndexReader};
pub use merge::{merge_directory, merge_to_archive, MergeError};
pub use render::{accumulate_frame, diff_frames, PolarityMap, RenderError, RenderOptions};
pub use segment::{
    plan_windows, split_stream, write_event_frames, FrameSummary, SegmentError, SplitOptions,
};
pub use types::{EventStream, Geometry, GeometryError, PayloadLayout, RecordEntry};
