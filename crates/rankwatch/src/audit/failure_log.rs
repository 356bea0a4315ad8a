// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! JSONL failure log with size-based rotation.
//!
//! Rotated files are named `.1`, `.2`, ... up to `max_rotations`; the oldest
//! is deleted.

use super::{FailureRecord, FailureSink};
use crate::config::FailureLogConfig;
use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

struct LogFile {
    file: File,
    /// Approximate current size; re-read on open.
    current_size: u64,
}

/// Append-only JSONL failure log.
pub struct JsonlFailureLog {
    path: PathBuf,
    max_bytes: u64,
    max_rotations: u32,
    inner: Mutex<LogFile>,
}

impl JsonlFailureLog {
    pub fn open(path: &Path, max_bytes: u64, max_rotations: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_append(path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            path: path.to_path_buf(),
            max_bytes,
            max_rotations: max_rotations.max(1),
            inner: Mutex::new(LogFile { file, current_size }),
        })
    }

    /// Open the configured log, or `~/.rankwatch/failures.jsonl`.
    pub fn from_config(config: &FailureLogConfig) -> Result<Self> {
        let path = config.path.clone().unwrap_or_else(default_path);
        Self::open(&path, config.max_bytes, config.max_rotations)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rotate: log → log.1, .1 → .2, ...
    ///
    /// A failed step aborts the rotation and the current file stays open, so
    /// the next append tries again.
    fn rotate(&self, log: &mut LogFile) -> Result<()> {
        log.file.flush()?;

        let oldest = rotation_path(&self.path, self.max_rotations);
        if oldest.exists() {
            std::fs::remove_file(&oldest).inspect_err(|e| {
                tracing::warn!("failed to remove {}: {e}", oldest.display());
            })?;
        }
        for i in (1..self.max_rotations).rev() {
            let from = rotation_path(&self.path, i);
            if from.exists() {
                std::fs::rename(&from, rotation_path(&self.path, i + 1)).inspect_err(|e| {
                    tracing::warn!("failed to rotate {}: {e}", from.display());
                })?;
            }
        }
        std::fs::rename(&self.path, rotation_path(&self.path, 1)).inspect_err(|e| {
            tracing::warn!("failed to rotate {}: {e}", self.path.display());
        })?;

        log.file = open_append(&self.path)?;
        log.current_size = 0;
        tracing::debug!("rotated failure log {}", self.path.display());
        Ok(())
    }
}

impl FailureSink for JsonlFailureLog {
    fn append(&self, record: &FailureRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut log = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if log.current_size >= self.max_bytes {
            self.rotate(&mut log)?;
        }
        writeln!(log.file, "{line}")?;
        log.current_size += line.len() as u64 + 1;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn default_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".rankwatch")
        .join("failures.jsonl")
}

/// `failures.jsonl.1`, `failures.jsonl.2`, ...
fn rotation_path(base: &Path, index: u32) -> PathBuf {
    let name = format!(
        "{}.{index}",
        base.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("failures.jsonl")
    );
    base.with_file_name(name)
}

/// In-memory sink, for tests and embedding.
#[derive(Default)]
pub struct MemoryFailureLog {
    records: Mutex<Vec<FailureRecord>>,
}

impl MemoryFailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<FailureRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FailureSink for MemoryFailureLog {
    fn append(&self, record: &FailureRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}
