//! Durable bookkeeping of the processes pets has started
//!
//! Records live in `<pets_home>/pets/proc.jsonl`, one JSON object per line.
//! Every operation takes the in-process mutex and the advisory file lock
//! and holds both for its whole read-transform-write cycle, so concurrent
//! invocations never lose each other's updates.

mod error;
mod liveness;
mod lock;
mod record;

pub use error::RegistryError;
pub use liveness::{Liveness, is_pid_alive, probe_process};
pub use record::ProcessRecord;

use lock::RegistryLock;

use crate::config::{ConfigOverrides, resolve_config};
use crate::home::get_pets_home;
use crate::service::ServiceKey;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

const PROC_FILE: &str = "proc.jsonl";
const LOCK_FILE: &str = "proc.lock";
const GLOBAL: &str = "global";

/// Handle to the process registry. Clones share one lock.
#[derive(Debug, Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    dir: PathBuf,
    proc_path: PathBuf,
    lock_path: PathBuf,
    lock_retries: u32,
    mu: Mutex<()>,
}

impl Registry {
    /// Open the registry under `pets_home` and reap records of dead processes.
    pub fn open(pets_home: impl AsRef<Path>) -> Result<Self, RegistryError> {
        Self::open_with_retries(pets_home, 5)
    }

    /// Like [`Registry::open`] with an explicit file-lock retry count.
    pub fn open_with_retries(
        pets_home: impl AsRef<Path>,
        lock_retries: u32,
    ) -> Result<Self, RegistryError> {
        let dir = pets_home.as_ref().join("pets");
        fs::create_dir_all(&dir).map_err(|e| RegistryError::io(&dir, e))?;

        let registry = Self {
            inner: Arc::new(Inner {
                proc_path: dir.join(PROC_FILE),
                lock_path: dir.join(LOCK_FILE),
                dir,
                lock_retries,
                mu: Mutex::new(()),
            }),
        };
        registry.reap_dead()?;
        Ok(registry)
    }

    /// Open the registry in the configured pets home.
    pub fn open_default() -> anyhow::Result<Self> {
        let home = get_pets_home()?;
        let cwd = std::env::current_dir()?;
        let config = resolve_config(&ConfigOverrides::default(), &cwd, &home)?;
        Ok(Self::open_with_retries(&home, config.registry.lock_retries)?)
    }

    /// Directory holding the registry file and service logs.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Add a record. Fails if a record with the same pid already exists.
    pub fn add(&self, record: ProcessRecord) -> Result<(), RegistryError> {
        debug!(pid = record.pid, name = %record.display_name, "registry add");
        self.update(|records| {
            if records.iter().any(|r| r.pid == record.pid) {
                return Err(RegistryError::DuplicateProcess { pid: record.pid });
            }
            records.push(record);
            Ok(true)
        })
    }

    /// Remove the record with the same pid. A missing record is not an error.
    pub fn remove(&self, record: &ProcessRecord) -> Result<(), RegistryError> {
        debug!(pid = record.pid, "registry remove");
        let pid = record.pid;
        self.update(|records| {
            let before = records.len();
            records.retain(|r| r.pid != pid);
            Ok(records.len() != before)
        })
    }

    /// Replace the record with the same pid by `record`. Fields are not
    /// merged: callers pass the complete new record. No-op if absent.
    pub fn modify(&self, record: ProcessRecord) -> Result<(), RegistryError> {
        debug!(pid = record.pid, key = %record.service_key(), "registry modify");
        self.update(|records| match records.iter_mut().find(|r| r.pid == record.pid) {
            Some(existing) => {
                *existing = record;
                Ok(true)
            }
            None => Ok(false),
        })
    }

    /// Remove every record whose process is no longer running.
    pub fn reap_dead(&self) -> Result<(), RegistryError> {
        self.update(|records| {
            let before = records.len();
            records.retain(|r| {
                let alive = is_pid_alive(r.pid);
                if !alive {
                    info!(pid = r.pid, name = %r.display_name, "reaping dead process record");
                }
                alive
            });
            Ok(records.len() != before)
        })
    }

    pub fn remove_all(&self) -> Result<(), RegistryError> {
        debug!("registry remove all");
        self.update(|records| {
            let changed = !records.is_empty();
            records.clear();
            Ok(changed)
        })
    }

    /// Snapshot of every record.
    pub fn list(&self) -> Result<Vec<ProcessRecord>, RegistryError> {
        let _guard = self.inner.mu.lock().unwrap_or_else(PoisonError::into_inner);
        let _lock = RegistryLock::acquire(&self.inner.lock_path, self.inner.lock_retries)?;
        self.read_records()
    }

    pub fn get(&self, pid: u32) -> Result<Option<ProcessRecord>, RegistryError> {
        Ok(self.list()?.into_iter().find(|r| r.pid == pid))
    }

    /// Records that can satisfy a dependency right now: a live pid, a
    /// service key and an exposed endpoint.
    pub fn healthy_services(&self) -> Result<HashMap<ServiceKey, ProcessRecord>, RegistryError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.is_service() && is_pid_alive(r.pid))
            .map(|r| (r.service_key(), r))
            .collect())
    }

    /// Path of the log file for a service key.
    pub fn log_path(&self, key: &ServiceKey) -> PathBuf {
        let tier = if key.tier.is_empty() {
            GLOBAL
        } else {
            key.tier.as_str()
        };
        let name = if key.name.is_empty() {
            GLOBAL
        } else {
            key.name.as_str()
        };
        self.inner.dir.join(tier).join(format!("{name}.log"))
    }

    /// Create (or truncate) the log file for `key`.
    pub fn open_fresh_log(&self, key: &ServiceKey) -> Result<File, RegistryError> {
        let path = self.log_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RegistryError::io(parent, e))?;
        }
        File::create(&path).map_err(|e| RegistryError::io(&path, e))
    }

    /// Contents of the log file for `key`, empty if it does not exist.
    pub fn read_log(&self, key: &ServiceKey) -> Result<String, RegistryError> {
        let path = self.log_path(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(RegistryError::io(&path, e)),
        }
    }

    /// Run one locked read-transform-write cycle. The closure returns
    /// whether it changed anything; unchanged state is not rewritten.
    fn update<F>(&self, transform: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut Vec<ProcessRecord>) -> Result<bool, RegistryError>,
    {
        let _guard = self.inner.mu.lock().unwrap_or_else(PoisonError::into_inner);
        let _lock = RegistryLock::acquire(&self.inner.lock_path, self.inner.lock_retries)?;

        let mut records = self.read_records()?;
        if transform(&mut records)? {
            self.write_records(&records)?;
        }
        Ok(())
    }

    fn read_records(&self) -> Result<Vec<ProcessRecord>, RegistryError> {
        let path = &self.inner.proc_path;
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RegistryError::io(path, e)),
        };

        let mut records = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record =
                serde_json::from_str::<ProcessRecord>(line).map_err(|e| RegistryError::Json {
                    path: path.clone(),
                    line: idx + 1,
                    source: e,
                })?;
            records.push(record);
        }
        Ok(records)
    }

    fn write_records(&self, records: &[ProcessRecord]) -> Result<(), RegistryError> {
        let path = &self.inner.proc_path;
        let tmp_path = path.with_extension("jsonl.tmp");

        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record).map_err(|e| RegistryError::Json {
                path: tmp_path.clone(),
                line: 0,
                source: e,
            })?;
            buf.push(b'\n');
        }

        {
            let mut tmp_file = File::create(&tmp_path).map_err(|e| RegistryError::io(&tmp_path, e))?;
            tmp_file
                .write_all(&buf)
                .map_err(|e| RegistryError::io(&tmp_path, e))?;
            tmp_file
                .sync_all()
                .map_err(|e| RegistryError::io(&tmp_path, e))?;
        }

        fs::rename(&tmp_path, path).map_err(|e| RegistryError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::process::Command;
    use tempfile::TempDir;

    fn live_record(display_name: &str) -> ProcessRecord {
        ProcessRecord {
            display_name: display_name.to_string(),
            pid: std::process::id(),
            start_time: Utc::now(),
            ..Default::default()
        }
    }

    fn dead_pid() -> u32 {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    fn open(temp_dir: &TempDir) -> Registry {
        Registry::open(temp_dir.path()).unwrap()
    }

    #[test]
    fn test_missing_file_is_empty_registry() {
        let temp_dir = TempDir::new().unwrap();
        let registry = open(&temp_dir);
        assert!(registry.list().unwrap().is_empty());
        assert!(registry.dir().ends_with("pets"));
    }

    #[test]
    fn test_add_then_list_contains_record_once() {
        let temp_dir = TempDir::new().unwrap();
        let registry = open(&temp_dir);
        let record = live_record("sleep 10");

        registry.add(record.clone()).unwrap();
        let records = registry.list().unwrap();
        assert_eq!(records, vec![record]);
    }

    #[test]
    fn test_duplicate_add_fails_and_leaves_registry_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let registry = open(&temp_dir);
        let record = live_record("first");
        registry.add(record.clone()).unwrap();

        let err = registry.add(live_record("second")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateProcess { pid } if pid == record.pid));
        assert_eq!(registry.list().unwrap(), vec![record]);
    }

    #[test]
    fn test_remove_absent_is_not_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let registry = open(&temp_dir);
        registry.remove(&live_record("nothing")).unwrap();

        let record = live_record("x");
        registry.add(record.clone()).unwrap();
        registry.remove(&record).unwrap();
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn test_modify_replaces_whole_record() {
        let temp_dir = TempDir::new().unwrap();
        let registry = open(&temp_dir);
        let record = live_record("server").with_exposed_host("localhost", 8080);
        registry.add(record.clone()).unwrap();

        // No field merging: the hostname and port are gone afterwards.
        let replacement = ProcessRecord {
            pid: record.pid,
            display_name: "renamed".to_string(),
            ..Default::default()
        };
        registry.modify(replacement.clone()).unwrap();
        assert_eq!(registry.list().unwrap(), vec![replacement]);
    }

    #[test]
    fn test_modify_absent_pid_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let registry = open(&temp_dir);
        let record = live_record("server");
        registry.add(record.clone()).unwrap();

        registry
            .modify(ProcessRecord {
                pid: record.pid + 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(registry.list().unwrap(), vec![record]);
    }

    #[test]
    fn test_reap_dead_removes_only_dead_records() {
        let temp_dir = TempDir::new().unwrap();
        let registry = open(&temp_dir);
        let alive = live_record("alive");
        let dead = ProcessRecord {
            display_name: "dead".to_string(),
            pid: dead_pid(),
            ..Default::default()
        };
        registry.add(alive.clone()).unwrap();
        registry.add(dead).unwrap();
        assert_eq!(registry.list().unwrap().len(), 2);

        registry.reap_dead().unwrap();
        assert_eq!(registry.list().unwrap(), vec![alive]);
    }

    #[test]
    fn test_open_reaps_dead_records() {
        let temp_dir = TempDir::new().unwrap();
        let proc_dir = temp_dir.path().join("pets");
        fs::create_dir_all(&proc_dir).unwrap();
        fs::write(
            proc_dir.join(PROC_FILE),
            format!("{{\"pid\":{}}}\n\n", dead_pid()),
        )
        .unwrap();

        let registry = open(&temp_dir);
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn test_remove_all() {
        let temp_dir = TempDir::new().unwrap();
        let registry = open(&temp_dir);
        registry.add(live_record("x")).unwrap();
        registry.remove_all().unwrap();
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let temp_dir = TempDir::new().unwrap();
        let registry = open(&temp_dir);
        fs::write(
            registry.dir().join(PROC_FILE),
            format!("{{\"pid\":{}}}\nnot json\n", std::process::id()),
        )
        .unwrap();

        let err = registry.list().unwrap_err();
        assert!(matches!(err, RegistryError::Json { line: 2, .. }));
    }

    #[test]
    fn test_clones_share_state() {
        let temp_dir = TempDir::new().unwrap();
        let registry = open(&temp_dir);
        let clone = registry.clone();
        clone.add(live_record("x")).unwrap();
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn test_healthy_services_requires_key_and_endpoint() {
        let temp_dir = TempDir::new().unwrap();
        let registry = open(&temp_dir);
        let key = ServiceKey::new("db", "local").unwrap();

        let untagged = live_record("untagged").with_exposed_host("localhost", 5432);
        registry.add(untagged.clone()).unwrap();
        assert!(registry.healthy_services().unwrap().is_empty());

        let tagged = untagged.with_service_key(&key);
        registry.modify(tagged.clone()).unwrap();
        let healthy = registry.healthy_services().unwrap();
        assert_eq!(healthy.get(&key), Some(&tagged));
    }

    #[test]
    fn test_log_paths_and_fresh_log() {
        let temp_dir = TempDir::new().unwrap();
        let registry = open(&temp_dir);
        let key = ServiceKey::new("frontend", "local").unwrap();

        assert_eq!(
            registry.log_path(&key),
            registry.dir().join("local").join("frontend.log")
        );
        assert_eq!(
            registry.log_path(&ServiceKey::global()),
            registry.dir().join("global").join("global.log")
        );

        assert_eq!(registry.read_log(&key).unwrap(), "");
        {
            let mut file = registry.open_fresh_log(&key).unwrap();
            file.write_all(b"first run\n").unwrap();
        }
        assert_eq!(registry.read_log(&key).unwrap(), "first run\n");

        // Reopening truncates.
        drop(registry.open_fresh_log(&key).unwrap());
        assert_eq!(registry.read_log(&key).unwrap(), "");
    }
}
