use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{RuntimeError, WorkerInstance, WorkerRuntime, WorkerSpec, WorkerState};

struct Entry {
    spec: WorkerSpec,
    state: WorkerState,
    logs: Vec<String>,
}

/// Process-local runtime for tests. Names are unique like Docker's, and
/// every `create` call is counted so tests can assert on duplicates.
#[derive(Default)]
pub struct MemoryRuntime {
    workers: Mutex<BTreeMap<String, Entry>>,
    volumes: Mutex<HashSet<String>>,
    foreign: Mutex<Vec<WorkerInstance>>,
    next_id: AtomicUsize,
    pub creates: AtomicUsize,
    /// Makes every `start` fail with a backend error.
    pub fail_start: AtomicBool,
}

impl MemoryRuntime {
    pub fn ids_by_name(&self, name: &str) -> Vec<String> {
        self.workers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.spec.name == name)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.state == WorkerState::Running)
            .count()
    }

    /// Simulates a worker that exited past its restart budget.
    pub fn crash(&self, name: &str) {
        for entry in self.workers.lock().unwrap().values_mut() {
            if entry.spec.name == name {
                entry.state = WorkerState::Stopped;
            }
        }
    }

    pub fn push_log(&self, name: &str, line: &str) {
        for entry in self.workers.lock().unwrap().values_mut() {
            if entry.spec.name == name {
                entry.logs.push(line.to_string());
            }
        }
    }

    pub fn spec(&self, name: &str) -> Option<WorkerSpec> {
        self.workers
            .lock()
            .unwrap()
            .values()
            .find(|e| e.spec.name == name)
            .map(|e| e.spec.clone())
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.volumes.lock().unwrap().contains(name)
    }

    /// Adds a container this system did not create.
    pub fn add_foreign(&self, name: &str, labels: HashMap<String, String>) {
        self.foreign.lock().unwrap().push(WorkerInstance {
            id: format!("foreign-{}", name),
            name: name.to_string(),
            labels,
        });
    }
}

#[async_trait]
impl WorkerRuntime for MemoryRuntime {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, spec: &WorkerSpec) -> Result<String, RuntimeError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        // Let concurrent callers interleave between the check and the insert.
        tokio::task::yield_now().await;
        let mut workers = self.workers.lock().unwrap();
        if workers.values().any(|e| e.spec.name == spec.name) {
            return Err(RuntimeError::Conflict(spec.name.clone()));
        }
        let id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        if let Some(volume) = &spec.volume {
            self.volumes.lock().unwrap().insert(volume.name.clone());
        }
        workers.insert(
            id.clone(),
            Entry {
                spec: spec.clone(),
                state: WorkerState::Stopped,
                logs: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(RuntimeError::Backend("image has no entrypoint".to_string()));
        }
        let mut workers = self.workers.lock().unwrap();
        let entry = workers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        entry.state = WorkerState::Running;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WorkerInstance>, RuntimeError> {
        let mut out: Vec<WorkerInstance> = self
            .workers
            .lock()
            .unwrap()
            .iter()
            .map(|(id, e)| WorkerInstance {
                id: id.clone(),
                name: e.spec.name.clone(),
                labels: e.spec.labels.clone(),
            })
            .collect();
        out.extend(self.foreign.lock().unwrap().iter().cloned());
        Ok(out)
    }

    async fn state(&self, id: &str) -> Result<WorkerState, RuntimeError> {
        if self.foreign.lock().unwrap().iter().any(|w| w.id == id) {
            return Ok(WorkerState::Running);
        }
        self.workers
            .lock()
            .unwrap()
            .get(id)
            .map(|e| e.state)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        self.workers
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn logs(&self, id: &str, tail: u32) -> Result<String, RuntimeError> {
        let workers = self.workers.lock().unwrap();
        let entry = workers
            .get(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        let skip = entry.logs.len().saturating_sub(tail as usize);
        Ok(entry.logs[skip..]
            .iter()
            .map(|l| format!("{}\n", l))
            .collect())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        if self.volumes.lock().unwrap().remove(name) {
            Ok(())
        } else {
            Err(RuntimeError::NotFound(name.to_string()))
        }
    }
}
