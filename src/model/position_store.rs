//! Persistence of fixed icon positions.
//!
//! One file per desktop surface, in a key-file layout: a group per icon named
//! after its escaped identity, holding integer `x` and `y` keys.
//!
//! ```text
//! [Documents]
//! x=120
//! y=40
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace};

use crate::model::icon::IconId;
use crate::sys::geometry::Point;

/// Saved coordinates are clamped to this magnitude on load.
pub const MAX_COORDINATE: i32 = 1 << 20;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read positions from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write positions to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A saved position of one fixed icon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionRecord {
    pub id: IconId,
    pub origin: Point,
}

impl PositionRecord {
    pub fn new(id: IconId, origin: Point) -> Self { Self { id, origin } }
}

#[derive(Debug, Clone)]
pub struct PositionStore {
    path: PathBuf,
}

impl PositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

    /// The store for the desktop on `screen` / `monitor` under a profile
    /// directory.
    pub fn for_surface(profile_dir: &Path, screen: u32, monitor: u32) -> Self {
        Self::new(profile_dir.join(file_name(screen, monitor)))
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Loads all records. A missing file is an empty store.
    pub fn load(&self) -> Result<Vec<PositionRecord>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "no saved positions");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let records = parse(&text);
        debug!(path = ?self.path, count = records.len(), "loaded positions");
        Ok(records)
    }

    /// Replaces the file contents with `records`.
    pub fn save(&self, records: &[PositionRecord]) -> Result<(), StoreError> {
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, serialize(records)).map_err(write_err)?;
        fs::rename(&tmp, &self.path).map_err(write_err)?;

        debug!(path = ?self.path, count = records.len(), "saved positions");
        Ok(())
    }
}

pub fn file_name(screen: u32, monitor: u32) -> String {
    format!("desktop-items-{screen}-{monitor}.conf")
}

pub fn serialize(records: &[PositionRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push('[');
        out.push_str(&escape_name(record.id.as_str()));
        out.push_str("]\n");
        out.push_str(&format!("x={}\ny={}\n\n", record.origin.x, record.origin.y));
    }
    out
}

/// Parses a position file. Missing or non-integer coordinates read as 0 and
/// the rest are clamped to [`MAX_COORDINATE`].
pub fn parse(text: &str) -> Vec<PositionRecord> {
    let mut records: Vec<PositionRecord> = Vec::new();
    let mut current: Option<usize> = None;

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if let Some(inner) = trimmed.strip_prefix('[').and_then(|l| l.trim_end().strip_suffix(']')) {
            let id = IconId::new(unescape_name(inner));
            current = Some(match records.iter().position(|r| r.id == id) {
                Some(index) => index,
                None => {
                    records.push(PositionRecord::new(id, Point::default()));
                    records.len() - 1
                }
            });
            continue;
        }

        let Some(index) = current else {
            trace!(line, "key outside of a group");
            continue;
        };
        let Some((key, value)) = trimmed.split_once('=') else {
            trace!(line, "ignoring malformed line");
            continue;
        };
        let value = value
            .trim()
            .parse::<i32>()
            .unwrap_or(0)
            .clamp(-MAX_COORDINATE, MAX_COORDINATE);
        match key.trim() {
            "x" => records[index].origin.x = value,
            "y" => records[index].origin.y = value,
            _ => {}
        }
    }

    records
}

/// Escapes carriage returns, newlines and backslashes so a name fits on a
/// group header line.
pub fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out
}

pub fn unescape_name(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
