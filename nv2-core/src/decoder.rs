//! normal_v2 capture decoding.
//!
//! This module implements payload extraction for index-addressed record
//! blocks, the 2-bit-per-pixel `normal_2bit` code table, and assembly of a
//! whole capture into one columnar event stream.

use crate::index::{IndexError, IndexReader};
use crate::types::{EventStream, Geometry, PayloadLayout, RecordEntry};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during capture decoding.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("capture truncated: record at offset {offset} declares {length} bytes")]
    TruncatedRecord { offset: u64, length: u64 },

    #[error(
        "record block at offset {offset} is {block_len} bytes, too small for a \
         {payload_len}-byte payload"
    )]
    ShortBlock {
        offset: u64,
        block_len: usize,
        payload_len: usize,
    },

    #[error("no events decoded from capture")]
    NoEvents,
}

// 2-bit pixel codes, least-significant slot first. Code 0b11 is reserved and
// never produces an event.
const CODE_OFF: u8 = 0b01;
const CODE_ON: u8 = 0b10;

/// Events decoded from a single record payload.
///
/// The three columns always have equal length; the record timestamp is
/// stamped on later by the assembler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordEvents {
    pub x: Vec<u16>,
    pub y: Vec<u16>,
    pub p: Vec<i8>,
}

impl RecordEvents {
    /// Number of decoded events.
    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// True if the record decoded to no events.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Clears the columns, keeping their allocations.
    pub fn clear(&mut self) {
        self.x.clear();
        self.y.clear();
        self.p.clear();
    }
}

/// Decoder for normal_v2 capture files.
///
/// Holds the sensor geometry and the payload layout convention of the
/// capture source; both are fixed per source and never inferred from data.
#[derive(Debug, Clone, Copy)]
pub struct CaptureDecoder {
    geometry: Geometry,
    layout: PayloadLayout,
}

impl CaptureDecoder {
    /// Creates a decoder for the given sensor geometry and payload layout.
    pub fn new(geometry: Geometry, layout: PayloadLayout) -> Self {
        Self { geometry, layout }
    }

    /// Sensor geometry this decoder was built for.
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Payload layout convention of the capture source.
    pub fn layout(&self) -> PayloadLayout {
        self.layout
    }

    /// Decodes one packed payload into sparse events.
    ///
    /// Each byte encodes four pixels at 2 bits per pixel: 0 no event, 1 OFF
    /// (polarity -1), 2 ON (polarity +1), 3 reserved (skipped). Output never
    /// exceeds one event per pixel.
    pub fn decode_payload(&self, payload: &[u8], events: &mut RecordEvents) {
        let width = self.geometry.width() as usize;
        let total_pixels = self.geometry.pixel_count();
        let payload = &payload[..payload.len().min(self.geometry.payload_len())];

        for (byte_idx, &byte) in payload.iter().enumerate() {
            if byte == 0 {
                // fast path: no sub-pixel carries a code
                continue;
            }
            let base_pixel = byte_idx * 4;
            for slot in 0..4 {
                let code = (byte >> (2 * slot)) & 0b11;
                let polarity = match code {
                    CODE_OFF => -1i8,
                    CODE_ON => 1i8,
                    _ => continue,
                };
                let pixel = base_pixel + slot;
                if pixel >= total_pixels {
                    // trailing slot past the last pixel of an odd geometry
                    continue;
                }
                events.x.push((pixel % width) as u16);
                events.y.push((pixel / width) as u16);
                events.p.push(polarity);
            }
        }
    }

    /// Seeks to a record block and extracts its packed payload.
    ///
    /// The reader is positioned at `entry.offset` before reading
    /// `entry.length` bytes; the packed payload is then sliced out according
    /// to the decoder's layout convention.
    pub fn read_record<R: Read + Seek>(
        &self,
        reader: &mut R,
        entry: &RecordEntry,
    ) -> Result<Vec<u8>, DecodeError> {
        reader.seek(SeekFrom::Start(entry.offset))?;

        let mut block = vec![0u8; entry.length as usize];
        reader.read_exact(&mut block).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                DecodeError::TruncatedRecord {
                    offset: entry.offset,
                    length: entry.length,
                }
            } else {
                DecodeError::Io(e)
            }
        })?;

        let payload_len = self.geometry.payload_len();
        let range = self
            .layout
            .payload_range(block.len(), payload_len)
            .ok_or(DecodeError::ShortBlock {
                offset: entry.offset,
                block_len: block.len(),
                payload_len,
            })?;

        Ok(block[range].to_vec())
    }

    /// Decodes an entire capture file using its record index.
    ///
    /// Events of each record are stamped with the record timestamp converted
    /// to seconds and concatenated in record order; records that decode to
    /// zero events contribute nothing. Returns [`DecodeError::NoEvents`] when
    /// the whole capture decodes to an empty stream, so callers never write a
    /// meaningless archive.
    pub fn decode_capture<P, Q>(&self, capture: P, index: Q) -> Result<EventStream, DecodeError>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let mut file = File::open(capture.as_ref())?;
        let mut stream = EventStream::new();
        let mut events = RecordEvents::default();

        for entry in IndexReader::open(index)? {
            let entry = entry?;
            let payload = self.read_record(&mut file, &entry)?;

            events.clear();
            self.decode_payload(&payload, &mut events);
            if events.is_empty() {
                continue;
            }

            stream.extend_stamped(entry.timestamp_secs(), &events.x, &events.y, &events.p);
        }

        if stream.is_empty() {
            return Err(DecodeError::NoEvents);
        }
        Ok(stream)
    }
}
