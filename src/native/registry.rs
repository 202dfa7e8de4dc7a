use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::native::process::{kill_process_group, stop_reaper};

#[derive(Clone, Debug)]
pub struct LiveProcess {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Interpreter processes that have been spawned and not yet reaped.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: DashMap<Uuid, LiveProcess>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a live process. The entry is removed when the returned guard
    /// is dropped, which the runner does only after the child is reaped.
    pub fn register(self: &Arc<Self>, id: Uuid, pid: u32) -> Registration {
        self.processes.insert(
            id,
            LiveProcess {
                pid,
                started_at: Utc::now(),
            },
        );
        tracing::debug!(execution_id = %id, pid, "process registered");

        Registration {
            registry: self.clone(),
            id,
        }
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, id: &Uuid) -> Option<LiveProcess> {
        self.processes.get(id).map(|entry| entry.value().clone())
    }

    /// Asks every registered reaper to kill its interpreter and all of its
    /// descendants. Returns how many were signalled.
    pub fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for entry in self.processes.iter() {
            let process = entry.value();
            tracing::warn!(
                execution_id = %entry.key(),
                pid = process.pid,
                running_since = %process.started_at,
                "stopping live execution"
            );
            stop_reaper(process.pid);
            stopped += 1;
        }
        stopped
    }

    /// Sends SIGKILL to the process group of every registered process.
    pub fn kill_all(&self) {
        for entry in self.processes.iter() {
            tracing::warn!(execution_id = %entry.key(), pid = entry.pid, "killing process group");
            kill_process_group(entry.pid);
        }
    }
}

#[derive(Debug)]
pub struct Registration {
    registry: Arc<ProcessRegistry>,
    id: Uuid,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.processes.remove(&self.id);
        tracing::debug!(execution_id = %self.id, "process unregistered");
    }
}
