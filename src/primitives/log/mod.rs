#![forbid(unsafe_code)]

//! Checksummed, line-oriented log files.
//!
//! Every file starts with a header record `H=<counter>` followed by records
//! of the form `<Type>=<payload>#<checksum>`. A reader tracks its byte offset
//! so recovery can `mark()` the last confirmed position and
//! `truncate_at_mark()` to drop an incomplete tail.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::types::{BitsyError, Result};

/// Line-level record codec.
pub mod record;

pub use record::{decode_line, encode_line, LogRecord, RecordType};

/// How a [`DurableLog`] was opened.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LogMode {
    /// Sequential reading from just after the header.
    Read,
    /// Appending after existing content.
    Append,
    /// Freshly truncated and re-headed; appends follow the header.
    Overwrite,
}

/// Result of reading one line in lenient mode.
#[derive(Debug, PartialEq, Eq)]
pub enum LineRead {
    /// A well-formed record.
    Record(LogRecord),
    /// The final line of the file is unterminated or fails validation.
    Torn {
        /// 1-based line number of the torn line.
        line: usize,
        /// Why the line was rejected.
        reason: &'static str,
    },
    /// No more lines.
    Eof,
}

/// A single checksummed log file.
pub struct DurableLog {
    path: PathBuf,
    mode: LogMode,
    counter: u64,
    reader: Option<BufReader<File>>,
    writer: Option<BufWriter<File>>,
    read_offset: u64,
    line_no: usize,
    mark_offset: u64,
    mark_line: usize,
    bytes_appended: u64,
}

impl DurableLog {
    /// Truncates (or creates) `path` and writes a fresh header with `counter`.
    ///
    /// The header is synced before returning; the log is left open for appends.
    pub fn create(path: impl AsRef<Path>, counter: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(LogRecord::header(counter).encode().as_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        debug!(path = %path.display(), counter, "log.create");
        Ok(Self {
            path,
            mode: LogMode::Overwrite,
            counter,
            reader: None,
            writer: Some(writer),
            read_offset: 0,
            line_no: 1,
            mark_offset: 0,
            mark_line: 1,
            bytes_appended: 0,
        })
    }

    /// Opens `path` for sequential reading, validating the header.
    pub fn open_read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mut log = Self {
            path,
            mode: LogMode::Read,
            counter: 0,
            reader: Some(BufReader::new(file)),
            writer: None,
            read_offset: 0,
            line_no: 0,
            mark_offset: 0,
            mark_line: 0,
            bytes_appended: 0,
        };
        log.counter = log.read_header()?;
        log.mark();
        Ok(log)
    }

    /// Opens `path` for appending after validating its header.
    pub fn open_append(path: impl AsRef<Path>) -> Result<Self> {
        let counter = read_counter(path.as_ref())?;
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self {
            path,
            mode: LogMode::Append,
            counter,
            reader: None,
            writer: Some(BufWriter::new(file)),
            read_offset: 0,
            line_no: 0,
            mark_offset: 0,
            mark_line: 0,
            bytes_appended: 0,
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header counter.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Bytes appended through this handle since it was opened.
    pub fn bytes_appended(&self) -> u64 {
        self.bytes_appended
    }

    /// Number of lines consumed so far by the reader (header included).
    pub fn line_no(&self) -> usize {
        self.line_no
    }

    /// Buffers `record` for writing.
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        self.append_encoded(&record.encode())
    }

    /// Buffers an already-encoded, newline-terminated line (or several).
    pub fn append_encoded(&mut self, lines: &str) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(BitsyError::Invalid("log is not open for writing"))?;
        writer.write_all(lines.as_bytes())?;
        self.bytes_appended += lines.len() as u64;
        Ok(())
    }

    /// Flushes buffered writes and forces them to stable storage.
    pub fn commit(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Reads the next record, treating any bad line as corruption.
    pub fn read_record(&mut self) -> Result<Option<LogRecord>> {
        match self.read_line_lenient()? {
            LineRead::Record(record) => Ok(Some(record)),
            LineRead::Eof => Ok(None),
            LineRead::Torn { line, reason } => Err(BitsyError::CorruptLine {
                file: self.path.clone(),
                line,
                reason,
            }),
        }
    }

    /// Reads the next line, reporting a bad *final* line as [`LineRead::Torn`].
    ///
    /// A bad line followed by more content is never a torn write and is
    /// returned as [`BitsyError::CorruptLine`].
    pub fn read_line_lenient(&mut self) -> Result<LineRead> {
        let reader = self
            .reader
            .as_mut()
            .ok_or(BitsyError::Invalid("log is not open for reading"))?;
        let mut buf = Vec::new();
        let read = reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            return Ok(LineRead::Eof);
        }
        self.line_no += 1;
        let line = self.line_no;
        let terminated = buf.last() == Some(&b'\n');
        if !terminated {
            return Ok(LineRead::Torn {
                line,
                reason: "unterminated line",
            });
        }
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        let decoded = std::str::from_utf8(&buf)
            .map_err(|_| "line is not valid UTF-8")
            .and_then(decode_line);
        match decoded {
            Ok(record) => {
                self.read_offset += read as u64;
                Ok(LineRead::Record(record))
            }
            Err(reason) => {
                let at_end = reader.fill_buf()?.is_empty();
                if at_end {
                    Ok(LineRead::Torn { line, reason })
                } else {
                    Err(BitsyError::CorruptLine {
                        file: self.path.clone(),
                        line,
                        reason,
                    })
                }
            }
        }
    }

    /// Records the current read position as the last confirmed position.
    pub fn mark(&mut self) {
        self.mark_offset = self.read_offset;
        self.mark_line = self.line_no;
    }

    /// Returns `true` if bytes have been read past the mark.
    pub fn has_unmarked_tail(&self) -> bool {
        self.read_offset > self.mark_offset || self.line_no > self.mark_line
    }

    /// Hard-truncates the file at the marked offset, discarding everything
    /// after the last confirmed record. Closes the reader.
    ///
    /// Only logs opened with [`open_read`](Self::open_read) carry a mark.
    pub fn truncate_at_mark(&mut self) -> Result<u64> {
        if self.mode != LogMode::Read {
            return Err(BitsyError::Invalid(
                "truncate_at_mark requires a log opened for reading",
            ));
        }
        self.reader = None;
        let file = OpenOptions::new().write(true).open(&self.path)?;
        let before = file.metadata()?.len();
        file.set_len(self.mark_offset)?;
        file.sync_all()?;
        warn!(
            path = %self.path.display(),
            offset = self.mark_offset,
            dropped_bytes = before.saturating_sub(self.mark_offset),
            "log.truncate_at_mark"
        );
        Ok(self.mark_offset)
    }

    fn read_header(&mut self) -> Result<u64> {
        match self.read_line_lenient()? {
            LineRead::Record(record) if record.kind == RecordType::Header => {
                record.counter().ok_or_else(|| BitsyError::CorruptLine {
                    file: self.path.clone(),
                    line: 1,
                    reason: "header counter is not a number",
                })
            }
            LineRead::Record(_) => Err(BitsyError::CorruptLine {
                file: self.path.clone(),
                line: 1,
                reason: "first record is not a header",
            }),
            LineRead::Torn { reason, .. } => Err(BitsyError::CorruptLine {
                file: self.path.clone(),
                line: 1,
                reason,
            }),
            LineRead::Eof => Err(BitsyError::CorruptLine {
                file: self.path.clone(),
                line: 1,
                reason: "missing header",
            }),
        }
    }
}

/// Reads only the header counter of `path`.
pub fn read_counter(path: &Path) -> Result<u64> {
    Ok(DurableLog::open_read(path)?.counter())
}
