//! Persistence port for the task queue.
//!
//! The queue only ever calls load/save/flush; what backs them is opaque.
//! `JsonFileStore` keeps one JSON file per scope, `MemoryStore` backs
//! tests, and `DebouncedStore` coalesces the save-per-mutation stream
//! into periodic writes with an explicit checkpoint.

use crate::error::Result;
use crate::flog_debug;
use crate::queue::task::Task;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Storage port: per-scope task snapshots.
pub trait TaskStore: Send + Sync {
    /// Load every persisted task for a scope. An unknown scope is empty,
    /// not an error.
    fn load(&self, scope: &str) -> Result<Vec<Task>>;

    /// Persist the full task set for a scope.
    fn save(&self, scope: &str, tasks: &[Task]) -> Result<()>;
}

/// One JSON file per scope under a state directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, scope: &str) -> PathBuf {
        // Scope names come from callers; keep the filename tame.
        let safe: String = scope
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

impl TaskStore for JsonFileStore {
    fn load(&self, scope: &str) -> Result<Vec<Task>> {
        let path = self.path(scope);
        flog_debug!("JsonFileStore::load scope={} path={}", scope, path.display());
        if !path.exists() {
            return Ok(Vec::new());
        }
        let tasks: Vec<Task> = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        Ok(tasks)
    }

    fn save(&self, scope: &str, tasks: &[Task]) -> Result<()> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir)?;
        }
        let path = self.path(scope);
        flog_debug!(
            "JsonFileStore::save scope={} tasks={} path={}",
            scope,
            tasks.len(),
            path.display()
        );
        std::fs::write(&path, serde_json::to_string_pretty(tasks)?)?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral scopes.
#[derive(Default)]
pub struct MemoryStore {
    scopes: Mutex<HashMap<String, Vec<Task>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryStore {
    fn load(&self, scope: &str) -> Result<Vec<Task>> {
        Ok(self
            .scopes
            .lock()
            .expect("store lock poisoned")
            .get(scope)
            .cloned()
            .unwrap_or_default())
    }

    fn save(&self, scope: &str, tasks: &[Task]) -> Result<()> {
        self.scopes
            .lock()
            .expect("store lock poisoned")
            .insert(scope.to_string(), tasks.to_vec());
        Ok(())
    }
}

/// Coalescing wrapper around a `TaskStore`.
///
/// `schedule` marks the scope dirty and writes only when the minimum
/// interval since the last write has elapsed; `flush` always writes when
/// dirty. A scope is never cleared from memory while dirty.
pub struct DebouncedStore {
    inner: Box<dyn TaskStore>,
    interval: Duration,
    last_save: Option<Instant>,
    dirty: bool,
}

impl DebouncedStore {
    pub fn new(inner: Box<dyn TaskStore>, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last_save: None,
            dirty: false,
        }
    }

    pub fn load(&self, scope: &str) -> Result<Vec<Task>> {
        self.inner.load(scope)
    }

    /// Record that the task set changed; write through if a save is due.
    pub fn schedule(&mut self, scope: &str, tasks: &[Task]) -> Result<()> {
        self.dirty = true;
        let due = self
            .last_save
            .map(|t| t.elapsed() >= self.interval)
            .unwrap_or(true);
        if due {
            self.write(scope, tasks)?;
        }
        Ok(())
    }

    /// Checkpoint: write the current set if anything is pending.
    pub fn flush(&mut self, scope: &str, tasks: &[Task]) -> Result<()> {
        if self.dirty {
            self.write(scope, tasks)?;
        }
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn write(&mut self, scope: &str, tasks: &[Task]) -> Result<()> {
        self.inner.save(scope, tasks)?;
        self.last_save = Some(Instant::now());
        self.dirty = false;
        Ok(())
    }
}
