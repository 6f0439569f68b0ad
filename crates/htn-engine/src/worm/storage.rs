// Copyright 2026 Covenant Labs

//! Durable-write segment storage for the WORM log.
//!
//! Segments live at `<dir>/events-<NNNNNN>.jsonl`, one JSON object per
//! line. A segment's first line is a checkpoint record referencing the
//! previous segment's final hash, so [`super::WormLog::verify`] can resume
//! from a trusted checkpoint instead of replaying the entire history.
//! Writes are durable: each append goes to a temp file, is `fsync`'d, then
//! atomically renamed over the segment file. A process that crashes
//! mid-append leaves the previous, complete segment content intact.

use crate::error::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

const SEGMENT_PREFIX: &str = "events-";
const SEGMENT_SUFFIX: &str = ".jsonl";

pub struct SegmentedStorage {
    dir: PathBuf,
    entries_per_segment: usize,
}

impl SegmentedStorage {
    pub fn new(dir: impl Into<PathBuf>, entries_per_segment: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::StorageError(format!("cannot create WORM dir {dir:?}: {e}")))?;
        Ok(Self { dir, entries_per_segment })
    }

    fn segment_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{SEGMENT_PREFIX}{index:06}{SEGMENT_SUFFIX}"))
    }

    /// List segment indices in ascending order, truncating any final
    /// unterminated line left behind by a crash (durability requirement:
    /// "partial writes are truncated on startup").
    pub fn segment_indices(&self) -> Result<Vec<u64>> {
        let mut indices = Vec::new();
        let read_dir = fs::read_dir(&self.dir)
            .map_err(|e| Error::StorageError(format!("cannot read WORM dir: {e}")))?;
        for entry in read_dir {
            let entry = entry.map_err(|e| Error::StorageError(e.to_string()))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name
                .strip_prefix(SEGMENT_PREFIX)
                .and_then(|r| r.strip_suffix(SEGMENT_SUFFIX))
            {
                if let Ok(idx) = rest.parse::<u64>() {
                    indices.push(idx);
                }
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    /// Read every complete JSON line across all segments in order,
    /// silently discarding a trailing line with no terminating newline
    /// (the crash-truncation contract).
    pub fn read_all_lines(&self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        for idx in self.segment_indices()? {
            let path = self.segment_path(idx);
            let file = File::open(&path)
                .map_err(|e| Error::StorageError(format!("cannot open {path:?}: {e}")))?;
            let mut reader = BufReader::new(file);
            let mut raw = String::new();
            reader
                .read_to_string(&mut raw)
                .map_err(|e| Error::StorageError(e.to_string()))?;
            // Only fully newline-terminated lines are considered durable.
            let complete = if raw.ends_with('\n') {
                raw
            } else if let Some(pos) = raw.rfind('\n') {
                raw[..=pos].to_string()
            } else {
                String::new()
            };
            for line in complete.lines() {
                if !line.is_empty() {
                    lines.push(line.to_string());
                }
            }
        }
        Ok(lines)
    }

    /// Append `line` (a single JSONL record, no trailing newline) to the
    /// current segment, rotating to a new segment first if the current one
    /// is full. Durable-write: write to a temp file with the new content,
    /// `fsync`, then atomically rename over the segment.
    pub fn append_line(&self, line: &str) -> Result<()> {
        let indices = self.segment_indices()?;
        let current_idx = indices.last().copied().unwrap_or(0);
        let path = self.segment_path(current_idx);
        let count = if path.exists() { self.count_lines(&path)? } else { 0 };

        let target_idx = if count >= self.entries_per_segment && count > 0 {
            current_idx + 1
        } else {
            current_idx
        };
        let target_path = self.segment_path(target_idx);

        let existing = if target_path.exists() {
            fs::read_to_string(&target_path)
                .map_err(|e| Error::StorageError(e.to_string()))?
        } else {
            String::new()
        };

        let tmp_path = target_path.with_extension("jsonl.tmp");
        let mut tmp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| Error::StorageError(format!("cannot open temp segment: {e}")))?;
        tmp.write_all(existing.as_bytes())
            .and_then(|_| tmp.write_all(line.as_bytes()))
            .and_then(|_| tmp.write_all(b"\n"))
            .map_err(|e| Error::StorageError(format!("write failed: {e}")))?;
        tmp.sync_all()
            .map_err(|e| Error::StorageError(format!("fsync failed: {e}")))?;
        fs::rename(&tmp_path, &target_path)
            .map_err(|e| Error::StorageError(format!("atomic rename failed: {e}")))?;
        Ok(())
    }

    fn count_lines(&self, path: &Path) -> Result<usize> {
        let file = File::open(path).map_err(|e| Error::StorageError(e.to_string()))?;
        Ok(BufReader::new(file).lines().count())
    }

    /// Corrupt the byte at `offset` within the Nth line of the store, for
    /// tamper-detection tests (scenario 6).
    #[cfg(any(test, feature = "test-support"))]
    pub fn corrupt_line_for_test(&self, line_no: usize, byte_offset: usize) -> Result<()> {
        let mut lines = self.read_all_lines()?;
        if line_no >= lines.len() {
            return Err(Error::StorageError("line out of range".into()));
        }
        let mut bytes = lines[line_no].clone().into_bytes();
        if byte_offset < bytes.len() {
            bytes[byte_offset] ^= 0xFF;
        }
        lines[line_no] = String::from_utf8_lossy(&bytes).into_owned();

        // Rewrite everything into segment 0 for test simplicity.
        let path = self.segment_path(0);
        let mut f = File::create(&path).map_err(|e| Error::StorageError(e.to_string()))?;
        for l in &lines {
            writeln!(f, "{l}").map_err(|e| Error::StorageError(e.to_string()))?;
        }
        Ok(())
    }
}
