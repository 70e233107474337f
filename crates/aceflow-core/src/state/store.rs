//! Project State Store
//!
//! One JSON file per project under the state directory. Mutations for a
//! project are serialized by a per-project mutex and re-read the committed
//! state under that lock, so two callers can never both succeed from the
//! same precondition. Readers get an `Arc` of the last committed state and
//! never wait on a writer's file IO.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

use super::types::{ProjectState, STATE_SCHEMA_VERSION};
use crate::retry::RetryPolicy;
use crate::utils::validate_project_id;
use crate::{AceflowError, AceflowResult};

/// Result of a locked mutation: an optional new state plus the caller's output
pub struct Mutation<T> {
    pub commit: Option<ProjectState>,
    pub output: T,
}

impl<T> Mutation<T> {
    /// Commit `state` and return `output`
    pub fn commit(state: ProjectState, output: T) -> Self {
        Self {
            commit: Some(state),
            output,
        }
    }

    /// Leave the state untouched
    pub fn unchanged(output: T) -> Self {
        Self {
            commit: None,
            output,
        }
    }
}

/// File-backed state store
pub struct StateStore {
    state_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    committed: RwLock<HashMap<String, Arc<ProjectState>>>,
    retry: RetryPolicy,
}

impl StateStore {
    /// Open a store rooted at `state_dir`, creating it if needed
    pub fn open(state_dir: impl Into<PathBuf>, retry: RetryPolicy) -> AceflowResult<Self> {
        let state_dir = state_dir.into();
        std::fs::create_dir_all(&state_dir)?;
        debug!("Opened state store at {:?}", state_dir);

        Ok(Self {
            state_dir,
            locks: Mutex::new(HashMap::new()),
            committed: RwLock::new(HashMap::new()),
            retry,
        })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Path of a project's state file
    pub fn state_path(&self, project_id: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", project_id))
    }

    /// Last committed state of a project
    pub fn get(&self, project_id: &str) -> AceflowResult<Arc<ProjectState>> {
        validate_project_id(project_id)?;
        self.load(project_id)?
            .ok_or_else(|| AceflowError::not_found("Project", project_id))
    }

    /// Whether a project has state
    pub fn exists(&self, project_id: &str) -> AceflowResult<bool> {
        validate_project_id(project_id)?;
        Ok(self.load(project_id)?.is_some())
    }

    /// Run `f` under the project's write lock
    ///
    /// `f` sees the latest committed state (or `None`) and decides whether
    /// to commit a new one. The new state is validated and written before it
    /// becomes visible to readers; if the write fails after retries the
    /// previous state stays committed.
    pub fn mutate<T, F>(&self, project_id: &str, f: F) -> AceflowResult<T>
    where
        F: FnOnce(Option<Arc<ProjectState>>) -> AceflowResult<Mutation<T>>,
    {
        validate_project_id(project_id)?;
        let lock = self.project_lock(project_id)?;
        let _guard = lock.lock().map_err(|_| AceflowError::LockPoisoned)?;

        let current = self.load(project_id)?;
        let Mutation { commit, output } = f(current)?;

        if let Some(state) = commit {
            if state.project_id != project_id {
                return Err(AceflowError::validation(format!(
                    "state for '{}' cannot be stored under '{}'",
                    state.project_id, project_id
                )));
            }
            state.validate()?;

            let json = serde_json::to_string_pretty(&state)?;
            let path = self.state_path(project_id);
            self.retry
                .run("save_state", || self.atomic_write(&path, json.as_bytes()))?;

            self.committed
                .write()
                .map_err(|_| AceflowError::LockPoisoned)?
                .insert(project_id.to_string(), Arc::new(state));
            debug!(project_id, "Committed project state");
        }

        Ok(output)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Private helpers
    // ─────────────────────────────────────────────────────────────────────────────

    fn project_lock(&self, project_id: &str) -> AceflowResult<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| AceflowError::LockPoisoned)?;
        Ok(locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Cached state, falling back to the state file
    fn load(&self, project_id: &str) -> AceflowResult<Option<Arc<ProjectState>>> {
        if let Some(state) = self
            .committed
            .read()
            .map_err(|_| AceflowError::LockPoisoned)?
            .get(project_id)
        {
            return Ok(Some(state.clone()));
        }

        let path = self.state_path(project_id);
        if !path.exists() {
            return Ok(None);
        }

        let raw = self.retry.run("load_state", || Ok(std::fs::read_to_string(&path)?))?;
        let state = Arc::new(parse_state_file(project_id, &raw)?);
        info!(project_id, stage = %state.current_stage, "Loaded project state from disk");

        let mut committed = self.committed.write().map_err(|_| AceflowError::LockPoisoned)?;
        Ok(Some(
            committed
                .entry(project_id.to_string())
                .or_insert(state)
                .clone(),
        ))
    }

    /// Write via a temp file in the same directory, then rename over the target
    fn atomic_write(&self, path: &Path, data: &[u8]) -> AceflowResult<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.state_dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| AceflowError::Io(e.error))?;
        Ok(())
    }
}

/// Parse and validate a state file, rejecting other schema versions
fn parse_state_file(project_id: &str, raw: &str) -> AceflowResult<ProjectState> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
        AceflowError::persistence(format!("state file for '{}' is not valid JSON: {}", project_id, e))
    })?;

    match value.get("schema_version").and_then(|v| v.as_u64()) {
        Some(v) if v == u64::from(STATE_SCHEMA_VERSION) => {}
        Some(v) => {
            return Err(AceflowError::persistence(format!(
                "state file for '{}' has unsupported schema version {}",
                project_id, v
            )));
        }
        None => {
            return Err(AceflowError::persistence(format!(
                "state file for '{}' has no schema version",
                project_id
            )));
        }
    }

    let state: ProjectState = serde_json::from_value(value).map_err(|e| {
        AceflowError::persistence(format!("state file for '{}' is malformed: {}", project_id, e))
    })?;
    state.validate().map_err(|e| {
        AceflowError::persistence(format!("state file for '{}' is corrupt: {}", project_id, e))
    })?;
    if state.project_id != project_id {
        return Err(AceflowError::persistence(format!(
            "state file for '{}' belongs to '{}'",
            project_id, state.project_id
        )));
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WorkflowMode;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn store(dir: &Path) -> StateStore {
        StateStore::open(dir.join("state"), RetryPolicy::no_retry()).unwrap()
    }

    fn init(store: &StateStore, id: &str) {
        store
            .mutate(id, |current| {
                assert!(current.is_none());
                let state = ProjectState::new(id, WorkflowMode::Standard, BTreeMap::new(), Utc::now());
                Ok(Mutation::commit(state, ()))
            })
            .unwrap();
    }

    #[test]
    fn test_commit_and_reload_from_disk() {
        let temp = tempdir().unwrap();
        let first = store(temp.path());
        init(&first, "demo");
        assert!(first.state_path("demo").exists());

        // A fresh store has an empty cache and reads the file
        let second = store(temp.path());
        let state = second.get("demo").unwrap();
        assert_eq!(state.current_stage, "P1");
        assert_eq!(*state, *first.get("demo").unwrap());
    }

    #[test]
    fn test_get_unknown_project() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        assert!(store.get("missing").unwrap_err().is_not_found());
        assert!(!store.exists("missing").unwrap());
        assert!(store.get("../escape").is_err());
    }

    #[test]
    fn test_unchanged_mutation_does_not_write() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        let out = store.mutate("demo", |_| Ok(Mutation::unchanged(7))).unwrap();
        assert_eq!(out, 7);
        assert!(!store.state_path("demo").exists());
    }

    #[test]
    fn test_invalid_state_is_not_committed() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        init(&store, "demo");

        let result = store.mutate("demo", |current| {
            let mut state = (*current.unwrap()).clone();
            state.completed_stages.push("D2".into());
            Ok(Mutation::commit(state, ()))
        });
        assert!(result.is_err());
        assert!(store.get("demo").unwrap().completed_stages.is_empty());
    }

    #[test]
    fn test_failed_write_keeps_committed_state() {
        let temp = tempdir().unwrap();
        let state_dir = temp.path().join("state");
        let retry = RetryPolicy {
            max_retries: 2,
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(2),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        let store = StateStore::open(&state_dir, retry).unwrap();
        init(&store, "demo");
        let original = std::fs::read(store.state_path("demo")).unwrap();

        // Swap the directory for a plain file so no temp file can be created
        let moved = temp.path().join("moved");
        std::fs::rename(&state_dir, &moved).unwrap();
        std::fs::write(&state_dir, b"not a directory").unwrap();

        let err = store
            .mutate("demo", |current| {
                let mut state = (*current.unwrap()).clone();
                state.advance(Utc::now())?;
                Ok(Mutation::commit(state, ()))
            })
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::PersistenceError);
        assert_eq!(store.get("demo").unwrap().current_stage, "P1");
        assert_eq!(std::fs::read(moved.join("demo.json")).unwrap(), original);

        std::fs::remove_file(&state_dir).unwrap();
        std::fs::rename(&moved, &state_dir).unwrap();
        let reopened = StateStore::open(&state_dir, RetryPolicy::no_retry()).unwrap();
        assert_eq!(reopened.get("demo").unwrap().current_stage, "P1");
        assert!(reopened.get("demo").unwrap().completed_stages.is_empty());
    }

    #[test]
    fn test_readers_keep_old_snapshot() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        init(&store, "demo");

        let before = store.get("demo").unwrap();
        store
            .mutate("demo", |current| {
                let mut state = (*current.unwrap()).clone();
                state.advance(Utc::now())?;
                Ok(Mutation::commit(state, ()))
            })
            .unwrap();

        assert_eq!(before.current_stage, "P1");
        assert_eq!(store.get("demo").unwrap().current_stage, "P2");
    }

    #[test]
    fn test_rejects_future_schema_version() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());
        init(&store, "demo");

        let raw = std::fs::read_to_string(store.state_path("demo")).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        value["schema_version"] = serde_json::json!(2);
        std::fs::write(store.state_path("demo"), value.to_string()).unwrap();

        let reopened = StateStore::open(store.state_dir(), RetryPolicy::no_retry()).unwrap();
        let err = reopened.get("demo").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::PersistenceError);
    }

    #[test]
    fn test_concurrent_advances_serialize() {
        let temp = tempdir().unwrap();
        let store = Arc::new(store(temp.path()));
        init(&store, "demo");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .mutate("demo", |current| {
                            let state = current.unwrap();
                            // Only the first writer sees P1
                            if state.current_stage != "P1" {
                                return Ok(Mutation::unchanged(false));
                            }
                            let mut next = (*state).clone();
                            next.advance(Utc::now())?;
                            Ok(Mutation::commit(next, true))
                        })
                        .unwrap()
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(store.get("demo").unwrap().completed_stages, vec!["P1".to_string()]);
    }
}
