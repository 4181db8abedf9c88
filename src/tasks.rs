//! In-memory registry of batch download tasks.
//!
//! Each worker owns the writes for its task id; the HTTP status endpoint only
//! reads. Entries live for the whole process and are never removed, so a
//! client can still poll a task long after it finished. A status read may see
//! a record mid-update (e.g. `completed` bumped before the matching result is
//! appended) but never a torn value.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Downloading,
    Completed,
}

/// Outcome of a single URL inside a batch. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DownloadResult {
    Success {
        success: bool,
        title: String,
        filename: String,
        url: String,
    },
    Failure {
        success: bool,
        error: String,
        url: String,
    },
}

impl DownloadResult {
    pub fn success(title: String, filename: String, url: String) -> Self {
        Self::Success {
            success: true,
            title,
            filename,
            url,
        }
    }

    pub fn failure(error: String, url: String) -> Self {
        Self::Failure {
            success: false,
            error,
            url,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn filename(&self) -> Option<&str> {
        match self {
            Self::Success { filename, .. } => Some(filename),
            Self::Failure { .. } => None,
        }
    }
}

/// Live progress snapshot for one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub status: TaskStatus,
    pub total: usize,
    pub completed: usize,
    pub current_title: String,
    pub current_progress: String,
    pub current_speed: String,
    pub results: Vec<DownloadResult>,
    pub zip_file: Option<String>,
}

impl TaskState {
    pub fn pending(total: usize) -> Self {
        Self {
            status: TaskStatus::Pending,
            total,
            completed: 0,
            current_title: String::new(),
            current_progress: String::new(),
            current_speed: String::new(),
            results: Vec::new(),
            zip_file: None,
        }
    }
}

/// Owned store mapping task ids to their live state. Replaces ad-hoc shared
/// dictionary access with an explicit get/put surface.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskState>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, task_id: &str, state: TaskState) {
        self.tasks.write().insert(task_id.to_owned(), state);
    }

    pub fn get(&self, task_id: &str) -> Option<TaskState> {
        self.tasks.read().get(task_id).cloned()
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.tasks.read().keys().cloned().collect()
    }

    /// Applies a closure to the stored state under the write lock. Missing
    /// ids are ignored rather than created, so workers must `put` first.
    pub fn update(&self, task_id: &str, apply: impl FnOnce(&mut TaskState)) {
        if let Some(state) = self.tasks.write().get_mut(task_id) {
            apply(state);
        }
    }
}
