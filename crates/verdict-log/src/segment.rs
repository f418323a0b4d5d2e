// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! JSON-lines persistence for one partition, plus small atomic JSON files.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::io_err;
use crate::{LogError, Payload, Record};

/// Append handle on a partition's segment file.
#[derive(Debug)]
pub(crate) struct Segment {
    path: PathBuf,
    file: File,
}

impl Segment {
    /// Open (or create) the segment at `path` and load its records.
    ///
    /// A final line without a trailing newline is a torn write from a crash
    /// and is cut off; any other undecodable line is corruption.
    pub(crate) fn open<V: Payload>(path: &Path) -> Result<(Self, Vec<Record<V>>), LogError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(io_err(path)(e)),
        };
        let mut records = Vec::new();
        let mut consumed = 0usize;
        for (idx, line) in text.split_inclusive('\n').enumerate() {
            if !line.ends_with('\n') {
                warn!(path = %path.display(), line = idx + 1, "dropping torn segment tail");
                break;
            }
            let record = serde_json::from_str(line.trim_end()).map_err(|e| LogError::Corrupt {
                path: path.to_path_buf(),
                line: idx + 1,
                reason: e.to_string(),
            })?;
            records.push(record);
            consumed += line.len();
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err(path))?;
        if consumed < text.len() {
            file.set_len(consumed as u64).map_err(io_err(path))?;
        }
        Ok((
            Self {
                path: path.to_path_buf(),
                file,
            },
            records,
        ))
    }

    /// Append one record as a single line.
    pub(crate) fn append<V: Payload>(&mut self, record: &Record<V>) -> Result<(), LogError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.file.write_all(&line).map_err(io_err(&self.path))?;
        self.file.flush().map_err(io_err(&self.path))
    }

    /// Replace the segment contents with `records`.
    pub(crate) fn rewrite<V: Payload>(&mut self, records: &[Record<V>]) -> Result<(), LogError> {
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }
        write_atomic(&self.path, &buf)?;
        self.file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(io_err(&self.path))?;
        Ok(())
    }
}

/// Write `bytes` to `path` through a sibling temp file and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), LogError> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp).map_err(io_err(&tmp))?;
        file.write_all(bytes).map_err(io_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
    }
    fs::rename(&tmp, path).map_err(io_err(path))
}

/// Serialize `value` as pretty JSON and write it atomically.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), LogError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

/// Read a JSON file, `None` if it does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, LogError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path)(e)),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| LogError::Corrupt {
            path: path.to_path_buf(),
            line: e.line(),
            reason: e.to_string(),
        })
}
