//! Append-only NDJSON event log for one session.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::models::event::SessionEvent;
use crate::{AppError, Result};

/// Writer for a session's event log.
///
/// Appends one JSON object per line and flushes after every event, so the
/// file is always a prefix of the emitted sequence. Lines are never
/// rewritten.
pub struct EventLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl EventLog {
    /// Open `path` for appending, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the file cannot be opened.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::Persistence(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|err| {
                AppError::Persistence(format!("failed to open event log {}: {err}", path.display()))
            })?;
        let mut log = Self {
            path,
            writer: BufWriter::new(file),
        };
        log.terminate_torn_tail()?;
        Ok(log)
    }

    /// A writer killed mid-line leaves a partial last line; close it so the
    /// next append starts on a line of its own.
    fn terminate_torn_tail(&mut self) -> Result<()> {
        let io_err = |err: std::io::Error| {
            AppError::Persistence(format!("failed to inspect {}: {err}", self.path.display()))
        };
        let file = self.writer.get_mut();
        let len = file.metadata().map_err(io_err)?.len();
        if len == 0 {
            return Ok(());
        }

        let mut last = [0_u8; 1];
        file.seek(SeekFrom::Start(len - 1)).map_err(io_err)?;
        file.read_exact(&mut last).map_err(io_err)?;
        if last[0] != b'\n' {
            debug!(path = %self.path.display(), "terminating partial trailing event line");
            file.write_all(b"\n").map_err(io_err)?;
        }
        Ok(())
    }

    /// Location of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a single NDJSON line.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if serialization, write, or flush fails.
    pub fn append(&mut self, event: &SessionEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        writeln!(self.writer, "{line}")
            .and_then(|()| self.writer.flush())
            .map_err(|err| {
                AppError::Persistence(format!(
                    "event log write failed for {}: {err}",
                    self.path.display()
                ))
            })
    }

    /// Read every event with `id >= from_id`.
    ///
    /// A missing file yields an empty list; malformed lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the file exists but cannot be read.
    pub fn read_from(path: &Path, from_id: u64) -> Result<Vec<SessionEvent>> {
        let (events, _) = Self::read_after(path, 0)?;
        Ok(events.into_iter().filter(|e| e.id >= from_id).collect())
    }

    /// Read complete lines starting at byte `offset`.
    ///
    /// Returns the parsed events and the offset just past the last complete
    /// line, suitable for the next call when tailing. A trailing partial line
    /// is left for a later read.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the file exists but cannot be read.
    pub fn read_after(path: &Path, offset: u64) -> Result<(Vec<SessionEvent>, u64)> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok((Vec::new(), offset)),
            Err(err) => {
                return Err(AppError::Persistence(format!(
                    "failed to open event log {}: {err}",
                    path.display()
                )));
            }
        };
        file.seek(SeekFrom::Start(offset)).map_err(|err| {
            AppError::Persistence(format!("failed to seek {}: {err}", path.display()))
        })?;

        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut next_offset = offset;
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line).map_err(|err| {
                AppError::Persistence(format!("failed to read {}: {err}", path.display()))
            })?;
            if read == 0 || !line.ends_with('\n') {
                break;
            }
            next_offset += read as u64;
            match serde_json::from_str::<SessionEvent>(line.trim_end()) {
                Ok(event) => events.push(event),
                Err(err) => debug!(path = %path.display(), %err, "skipping malformed event line"),
            }
        }

        Ok((events, next_offset))
    }

    /// Highest event id recorded in the log, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the file exists but cannot be read.
    pub fn last_event_id(path: &Path) -> Result<Option<u64>> {
        let (events, _) = Self::read_after(path, 0)?;
        Ok(events.iter().map(|e| e.id).max())
    }
}
