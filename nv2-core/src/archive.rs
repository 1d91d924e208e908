//! On-disk event archive container.
//!
//! An archive is a named-column binary container holding exactly the four
//! event stream columns: `t` (f64 seconds), `x` (u16), `y` (u16), and `p`
//! (i8, values +1/-1). All multi-byte values are little-endian. Readers
//! validate the magic number, format version, column names, dtypes, and
//! equal column lengths before trusting a file, so a truncated archive left
//! behind by a killed run is rejected rather than read as valid data.

use crate::types::{ColumnLengthMismatch, EventStream};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use thiserror::Error;

/// File extension used for event archives.
pub const ARCHIVE_EXT: &str = "evs";

/// Magic number identifying an event archive.
const MAGIC: &[u8; 8] = b"NV2EVS\0\0";

/// Current container format version.
const FORMAT_VERSION: u32 = 1;

// Column dtype tags.
const DTYPE_F64: u8 = 1;
const DTYPE_U16: u8 = 2;
const DTYPE_I8: u8 = 3;

/// Errors that can occur while reading or writing archives.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not an event archive: bad magic number")]
    BadMagic,

    #[error("unsupported archive format version {0}")]
    UnsupportedVersion(u32),

    #[error("archive is truncated")]
    Truncated,

    #[error("archive is missing required column {0:?}")]
    MissingColumn(&'static str),

    #[error("archive contains unexpected column {0:?}")]
    UnexpectedColumn(String),

    #[error("archive contains column {0:?} more than once")]
    DuplicateColumn(String),

    #[error("column {name:?} has dtype tag {found}, expected {expected}")]
    WrongDtype {
        name: String,
        found: u8,
        expected: u8,
    },

    #[error("archive columns disagree in length: {0}")]
    LengthMismatch(#[from] ColumnLengthMismatch),
}

/// Maps an IO error on a read path to [`ArchiveError::Truncated`] when the
/// file simply ran out of bytes.
fn read_err(e: std::io::Error) -> ArchiveError {
    if e.kind() == ErrorKind::UnexpectedEof {
        ArchiveError::Truncated
    } else {
        ArchiveError::Io(e)
    }
}

/// Archive writer over any byte sink.
pub struct ArchiveWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> ArchiveWriter<W> {
    /// Creates a new archive writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Writes a complete event stream as one archive.
    pub fn write_stream(&mut self, stream: &EventStream) -> Result<(), ArchiveError> {
        self.writer.write_all(MAGIC)?;
        self.writer.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        self.writer.write_u32::<LittleEndian>(4)?;

        self.write_column_header("t", DTYPE_F64, stream.len())?;
        for &v in stream.t() {
            self.writer.write_f64::<LittleEndian>(v)?;
        }

        self.write_column_header("x", DTYPE_U16, stream.len())?;
        for &v in stream.x() {
            self.writer.write_u16::<LittleEndian>(v)?;
        }

        self.write_column_header("y", DTYPE_U16, stream.len())?;
        for &v in stream.y() {
            self.writer.write_u16::<LittleEndian>(v)?;
        }

        self.write_column_header("p", DTYPE_I8, stream.len())?;
        for &v in stream.p() {
            self.writer.write_i8(v)?;
        }

        Ok(())
    }

    fn write_column_header(&mut self, name: &str, dtype: u8, len: usize) -> Result<(), ArchiveError> {
        self.writer.write_u8(name.len() as u8)?;
        self.writer.write_all(name.as_bytes())?;
        self.writer.write_u8(dtype)?;
        self.writer.write_u64::<LittleEndian>(len as u64)?;
        Ok(())
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> Result<(), ArchiveError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Reads and validates one archive from a byte source.
pub fn read_stream<R: Read>(mut reader: R) -> Result<EventStream, ArchiveError> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic).map_err(read_err)?;
    if &magic != MAGIC {
        return Err(ArchiveError::BadMagic);
    }

    let version = reader.read_u32::<LittleEndian>().map_err(read_err)?;
    if version != FORMAT_VERSION {
        return Err(ArchiveError::UnsupportedVersion(version));
    }

    let column_count = reader.read_u32::<LittleEndian>().map_err(read_err)?;

    let mut t: Option<Vec<f64>> = None;
    let mut x: Option<Vec<u16>> = None;
    let mut y: Option<Vec<u16>> = None;
    let mut p: Option<Vec<i8>> = None;

    for _ in 0..column_count {
        let name_len = reader.read_u8().map_err(read_err)? as usize;
        let mut name_bytes = vec![0u8; name_len];
        reader.read_exact(&mut name_bytes).map_err(read_err)?;
        let name = String::from_utf8_lossy(&name_bytes).into_owned();

        let dtype = reader.read_u8().map_err(read_err)?;
        let len = reader.read_u64::<LittleEndian>().map_err(read_err)? as usize;

        let expect_dtype = |expected: u8| {
            if dtype == expected {
                Ok(())
            } else {
                Err(ArchiveError::WrongDtype {
                    name: name.clone(),
                    found: dtype,
                    expected,
                })
            }
        };

        match name.as_str() {
            "t" => {
                expect_dtype(DTYPE_F64)?;
                if t.is_some() {
                    return Err(ArchiveError::DuplicateColumn(name));
                }
                let mut col = vec![0f64; len];
                reader
                    .read_f64_into::<LittleEndian>(&mut col)
                    .map_err(read_err)?;
                t = Some(col);
            }
            "x" | "y" => {
                expect_dtype(DTYPE_U16)?;
                let slot = if name == "x" { &mut x } else { &mut y };
                if slot.is_some() {
                    return Err(ArchiveError::DuplicateColumn(name));
                }
                let mut col = vec![0u16; len];
                reader
                    .read_u16_into::<LittleEndian>(&mut col)
                    .map_err(read_err)?;
                *slot = Some(col);
            }
            "p" => {
                expect_dtype(DTYPE_I8)?;
                if p.is_some() {
                    return Err(ArchiveError::DuplicateColumn(name));
                }
                let mut col = vec![0i8; len];
                reader.read_i8_into(&mut col).map_err(read_err)?;
                p = Some(col);
            }
            _ => return Err(ArchiveError::UnexpectedColumn(name)),
        }
    }

    let t = t.ok_or(ArchiveError::MissingColumn("t"))?;
    let x = x.ok_or(ArchiveError::MissingColumn("x"))?;
    let y = y.ok_or(ArchiveError::MissingColumn("y"))?;
    let p = p.ok_or(ArchiveError::MissingColumn("p"))?;

    Ok(EventStream::from_columns(t, x, y, p)?)
}

/// Writes an event stream to an archive file.
pub fn write_archive<P: AsRef<Path>>(path: P, stream: &EventStream) -> Result<(), ArchiveError> {
    let file = File::create(path)?;
    let mut writer = ArchiveWriter::new(file);
    writer.write_stream(stream)?;
    writer.flush()?;
    Ok(())
}

/// Reads and validates an archive file.
pub fn read_archive<P: AsRef<Path>>(path: P) -> Result<EventStream, ArchiveError> {
    let file = File::open(path)?;
    read_stream(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_stream() -> EventStream {
        let mut stream = EventStream::new();
        stream.push(0.001, 0, 0, 1);
        stream.push(0.002, 3, 3, -1);
        stream.push(0.002, 815, 611, 1);
        stream
    }

    fn to_bytes(stream: &EventStream) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = ArchiveWriter::new(&mut buf);
            writer.write_stream(stream).unwrap();
            writer.flush().unwrap();
        }
        buf
    }

    #[test]
    fn test_round_trip() {
        let stream = sample_stream();
        let restored = read_stream(Cursor::new(to_bytes(&stream))).unwrap();
        assert_eq!(restored, stream);
    }

    #[test]
    fn test_empty_stream_round_trip() {
        let restored = read_stream(Cursor::new(to_bytes(&EventStream::new()))).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = to_bytes(&sample_stream());
        bytes[0] = b'X';
        assert!(matches!(
            read_stream(Cursor::new(bytes)),
            Err(ArchiveError::BadMagic)
        ));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut bytes = to_bytes(&sample_stream());
        bytes[8] = 99;
        assert!(matches!(
            read_stream(Cursor::new(bytes)),
            Err(ArchiveError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_truncated_archive_rejected() {
        let bytes = to_bytes(&sample_stream());
        let cut = bytes.len() - 5;
        assert!(matches!(
            read_stream(Cursor::new(bytes[..cut].to_vec())),
            Err(ArchiveError::Truncated)
        ));
    }

    #[test]
    fn test_missing_column_rejected() {
        // Hand-build an archive advertising only three columns
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.write_u32::<LittleEndian>(FORMAT_VERSION).unwrap();
        buf.write_u32::<LittleEndian>(3).unwrap();
        for name in ["t", "x", "y"] {
            buf.write_u8(1).unwrap();
            buf.extend_from_slice(name.as_bytes());
            buf.write_u8(if name == "t" { DTYPE_F64 } else { DTYPE_U16 })
                .unwrap();
            buf.write_u64::<LittleEndian>(0).unwrap();
        }
        assert!(matches!(
            read_stream(Cursor::new(buf)),
            Err(ArchiveError::MissingColumn("p"))
        ));
    }

    #[test]
    fn test_unexpected_column_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.write_u32::<LittleEndian>(FORMAT_VERSION).unwrap();
        buf.write_u32::<LittleEndian>(1).unwrap();
        buf.write_u8(1).unwrap();
        buf.extend_from_slice(b"q");
        buf.write_u8(DTYPE_F64).unwrap();
        buf.write_u64::<LittleEndian>(0).unwrap();
        assert!(matches!(
            read_stream(Cursor::new(buf)),
            Err(ArchiveError::UnexpectedColumn(name)) if name == "q"
        ));
    }

    #[test]
    fn test_wrong_dtype_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.write_u32::<LittleEndian>(FORMAT_VERSION).unwrap();
        buf.write_u32::<LittleEndian>(1).unwrap();
        buf.write_u8(1).unwrap();
        buf.extend_from_slice(b"t");
        buf.write_u8(DTYPE_U16).unwrap();
        buf.write_u64::<LittleEndian>(0).unwrap();
        assert!(matches!(
            read_stream(Cursor::new(buf)),
            Err(ArchiveError::WrongDtype { expected: DTYPE_F64, .. })
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.evs");
        let stream = sample_stream();
        write_archive(&path, &stream).unwrap();
        assert_eq!(read_archive(&path).unwrap(), stream);
    }
}
