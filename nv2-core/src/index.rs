//! Record index table parsing.
//!
//! Every capture ships with a companion `*_info.txt` table mapping record
//! index to (timestamp, offset, length). The table is comma-separated and may
//! or may not start with a header row; when a header is present the column
//! positions are resolved by name, so reordered columns are handled.

use crate::types::RecordEntry;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::num::ParseIntError;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while parsing a record index table.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index header is missing required column {0:?}")]
    MissingColumn(&'static str),

    #[error("invalid integer in index row {line}: {source}")]
    ParseInt { line: usize, source: ParseIntError },
}

/// Minimum number of comma-separated fields a data row must carry.
///
/// Position 0 holds a running record counter that is not otherwise used.
const MIN_FIELDS: usize = 4;

/// Column positions of the three required fields, resolved once before the
/// parse loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnLayout {
    timestamp: usize,
    offset: usize,
    length: usize,
}

impl ColumnLayout {
    /// Fixed positions used when the table has no header row.
    const DEFAULT: Self = Self {
        timestamp: 1,
        offset: 2,
        length: 3,
    };

    /// Resolves column positions from a header row by name.
    fn from_header(fields: &[&str]) -> Result<Self, IndexError> {
        let position = |name: &'static str| {
            fields
                .iter()
                .position(|field| *field == name)
                .ok_or(IndexError::MissingColumn(name))
        };
        Ok(Self {
            timestamp: position("timestamp")?,
            offset: position("offset")?,
            length: position("length")?,
        })
    }

    /// Fields a row must have for every resolved position to be addressable.
    fn min_fields(&self) -> usize {
        MIN_FIELDS
            .max(self.timestamp + 1)
            .max(self.offset + 1)
            .max(self.length + 1)
    }
}

/// Lazy reader over the rows of a record index table.
///
/// Yields `(timestamp_us, offset, length)` entries in file order. Rows with
/// too few fields are logged and skipped; an unparsable integer aborts the
/// parse. Re-opening the file restarts the sequence.
pub struct IndexReader<R: BufRead> {
    reader: R,
    columns: ColumnLayout,
    min_fields: usize,
    /// First line of a headerless table, replayed as data before the reader.
    pending: Option<String>,
    line_no: usize,
}

impl IndexReader<BufReader<File>> {
    /// Opens an index table on disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: BufRead> IndexReader<R> {
    /// Creates a reader over an in-memory or on-disk table.
    ///
    /// The first line is inspected here: if it contains the literal column
    /// name `timestamp` it is treated as a header, otherwise as data with the
    /// fixed default column order.
    pub fn new(mut reader: R) -> Result<Self, IndexError> {
        let mut first = String::new();
        reader.read_line(&mut first)?;

        let (columns, pending) = if first.contains("timestamp") {
            let fields: Vec<&str> = first.trim().split(',').map(str::trim).collect();
            (ColumnLayout::from_header(&fields)?, None)
        } else {
            (ColumnLayout::DEFAULT, Some(first))
        };

        let min_fields = columns.min_fields();
        Ok(Self {
            reader,
            columns,
            min_fields,
            pending,
            line_no: 1,
        })
    }

    /// Parses one data row, returning `None` for blank or skipped rows.
    fn parse_row(&self, line: &str, line_no: usize) -> Result<Option<RecordEntry>, IndexError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < self.min_fields {
            log::warn!(
                "skipping index row {line_no}: {} fields, expected at least {}",
                fields.len(),
                self.min_fields
            );
            return Ok(None);
        }

        let parse = |field: &str| {
            field
                .trim()
                .parse::<u64>()
                .map_err(|source| IndexError::ParseInt {
                    line: line_no,
                    source,
                })
        };

        Ok(Some(RecordEntry {
            timestamp_us: parse(fields[self.columns.timestamp])?,
            offset: parse(fields[self.columns.offset])?,
            length: parse(fields[self.columns.length])?,
        }))
    }
}

impl<R: BufRead> Iterator for IndexReader<R> {
    type Item = Result<RecordEntry, IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (line, line_no) = if let Some(pending) = self.pending.take() {
                (pending, self.line_no)
            } else {
                let mut buf = String::new();
                match self.reader.read_line(&mut buf) {
                    Ok(0) => return None,
                    Ok(_) => {
                        self.line_no += 1;
                        (buf, self.line_no)
                    }
                    Err(e) => return Some(Err(e.into())),
                }
            };

            match self.parse_row(&line, line_no) {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
