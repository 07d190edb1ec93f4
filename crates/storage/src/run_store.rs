// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic, crash-safe persistence for [`meow_core::Run`] records.
//!
//! One JSON file per run under a known directory (`<run-id>.json`),
//! written via the temp-file + atomic-rename pattern, and one sibling
//! exclusive lock file per run (`<run-id>.lock`) guarding against two
//! daemon processes operating on the same run concurrently.

use fs2::FileExt;
use meow_core::{AgentId, Run, RunId};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum RunStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("run {0} not found")]
    NotFound(RunId),

    #[error("run {0} already exists")]
    AlreadyExists(RunId),

    #[error("lock for run {0} is already held")]
    LockHeld(RunId),
}

/// Optional filter for [`RunStore::list`].
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub status: Option<meow_core::RunStatus>,
}

impl RunFilter {
    fn matches(&self, run: &Run) -> bool {
        match self.status {
            Some(s) => s == run.status,
            None => true,
        }
    }
}

/// An exclusive, non-blocking lock over one run's storage.
///
/// `AcquireWorkflowLock` fails immediately (rather than blocking) if
/// another process already holds the lock. `release` is idempotent and
/// removes the on-disk sentinel so a subsequent `try_lock_exclusive`
/// from another process succeeds.
pub struct RunLock {
    file: Option<File>,
    path: PathBuf,
}

impl RunLock {
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = fs2::FileExt::unlock(&file);
            drop(file);
            let _ = fs::remove_file(&self.path);
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Contract for atomic Run persistence (see `spec.md` §6).
pub trait RunStore: Send + Sync {
    fn create(&self, run: &Run) -> Result<(), RunStoreError>;
    fn get(&self, id: &RunId) -> Result<Run, RunStoreError>;
    fn save(&self, run: &Run) -> Result<(), RunStoreError>;
    fn delete(&self, id: &RunId) -> Result<(), RunStoreError>;
    fn acquire_workflow_lock(&self, id: &RunId) -> Result<RunLock, RunStoreError>;
    fn list(&self, filter: &RunFilter) -> Result<Vec<Run>, RunStoreError>;
    fn get_by_agent(&self, agent: &AgentId) -> Result<Vec<Run>, RunStoreError>;
}

/// A [`RunStore`] backed by one JSON file per run in a directory.
pub struct FsRunStore {
    dir: PathBuf,
}

impl FsRunStore {
    /// Open (creating if needed) a run store rooted at `dir`. Also
    /// performs the startup orphan-temp-file scan described in
    /// `spec.md` §6: any `<id>.tmp` with a matching final `<id>.json`
    /// is deleted (an interrupted write that never got to rename is
    /// superseded by the already-complete file); any `<id>.tmp` with no
    /// final file is promoted (the rename itself is what didn't
    /// complete, so the write is otherwise whole).
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, RunStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let store = Self { dir };
        store.reconcile_orphan_temp_files()?;
        Ok(store)
    }

    fn reconcile_orphan_temp_files(&self) -> Result<(), RunStoreError> {
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("tmp") {
                continue;
            }
            let final_path = path.with_extension("json");
            if final_path.exists() {
                warn!(path = %path.display(), "removing orphan temp file with completed final file");
                fs::remove_file(&path)?;
            } else {
                warn!(path = %path.display(), "promoting orphan temp file (rename was interrupted)");
                fs::rename(&path, &final_path)?;
            }
        }
        Ok(())
    }

    fn run_path(&self, id: &RunId) -> PathBuf {
        self.dir.join(format!("{}.json", id.as_str()))
    }

    fn lock_path(&self, id: &RunId) -> PathBuf {
        self.dir.join(format!("{}.lock", id.as_str()))
    }

    fn write_atomic(&self, id: &RunId, run: &Run) -> Result<(), RunStoreError> {
        let final_path = self.run_path(id);
        let tmp_path = final_path.with_extension("tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, run)?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    fn read(&self, path: &Path, id: &RunId) -> Result<Run, RunStoreError> {
        if !path.exists() {
            return Err(RunStoreError::NotFound(id.clone()));
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    fn all_run_files(&self) -> Result<Vec<PathBuf>, RunStoreError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                out.push(path);
            }
        }
        Ok(out)
    }
}

impl RunStore for FsRunStore {
    fn create(&self, run: &Run) -> Result<(), RunStoreError> {
        let path = self.run_path(&run.id);
        if path.exists() {
            return Err(RunStoreError::AlreadyExists(run.id.clone()));
        }
        self.write_atomic(&run.id, run)
    }

    fn get(&self, id: &RunId) -> Result<Run, RunStoreError> {
        self.read(&self.run_path(id), id)
    }

    fn save(&self, run: &Run) -> Result<(), RunStoreError> {
        self.write_atomic(&run.id, run)
    }

    fn delete(&self, id: &RunId) -> Result<(), RunStoreError> {
        let path = self.run_path(id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        let lock = self.lock_path(id);
        if lock.exists() {
            let _ = fs::remove_file(lock);
        }
        Ok(())
    }

    fn acquire_workflow_lock(&self, id: &RunId) -> Result<RunLock, RunStoreError> {
        let path = self.lock_path(id);
        let file = File::create(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| RunStoreError::LockHeld(id.clone()))?;
        Ok(RunLock {
            file: Some(file),
            path,
        })
    }

    fn list(&self, filter: &RunFilter) -> Result<Vec<Run>, RunStoreError> {
        let mut out = Vec::new();
        for path in self.all_run_files()? {
            let file = File::open(&path)?;
            let reader = BufReader::new(file);
            match serde_json::from_reader::<_, Run>(reader) {
                Ok(run) if filter.matches(&run) => out.push(run),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping corrupt run file"),
            }
        }
        Ok(out)
    }

    fn get_by_agent(&self, agent: &AgentId) -> Result<Vec<Run>, RunStoreError> {
        Ok(self
            .list(&RunFilter::default())?
            .into_iter()
            .filter(|r| r.agents.contains_key(agent))
            .collect())
    }
}

#[cfg(test)]
#[path = "run_store_tests.rs"]
mod tests;
