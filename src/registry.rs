//! Task registry (spec §4.6): associates each in-flight `call_id` with its
//! cancellation handle.
//!
//! The registry is owned by exactly one [`crate::session::Session`] and
//! mutated only from that session's task; no internal locking is needed.

use std::collections::HashMap;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::call::ReturnType;

/// A single in-flight call's bookkeeping (spec §3 "Task entry").
#[derive(Debug)]
pub struct TaskEntry {
    /// The call identifier this entry tracks.
    pub call_id: String,
    /// Cooperative cancellation handle for the spawned handler task.
    pub token: CancellationToken,
    /// Declared response shape, needed to build the eventual response.
    pub return_type: ReturnType,
    /// When dispatch began, for diagnostics/logging.
    pub started: Instant,
}

impl TaskEntry {
    /// Build a new entry with a fresh cancellation token.
    #[must_use]
    pub fn new(call_id: String, return_type: ReturnType) -> Self {
        Self {
            call_id,
            token: CancellationToken::new(),
            return_type,
            started: Instant::now(),
        }
    }
}

/// Maps `call_id -> TaskEntry` for one session's in-flight calls.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, TaskEntry>,
}

impl TaskRegistry {
    /// Build an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    /// Insert a new entry. Returns `false` if `call_id` was already present
    /// (a programmer error: the verifier is expected to reject duplicate
    /// `call_id`s before dispatch ever reaches the registry).
    pub fn insert(&mut self, entry: TaskEntry) -> bool {
        if self.tasks.contains_key(&entry.call_id) {
            return false;
        }
        self.tasks.insert(entry.call_id.clone(), entry);
        true
    }

    /// Cancel the task for `call_id`, if present. Returns whether a task was
    /// found. Does not remove the entry — the completion callback removes it
    /// once cancellation has been observed (spec §5 ordering guarantee).
    pub fn cancel(&self, call_id: &str) -> bool {
        match self.tasks.get(call_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight task (spec §4.4 `quit` handling).
    pub fn cancel_all(&self) {
        for entry in self.tasks.values() {
            entry.token.cancel();
        }
    }

    /// Remove and return the entry for `call_id`, if present.
    pub fn remove(&mut self, call_id: &str) -> Option<TaskEntry> { self.tasks.remove(call_id) }

    /// Whether `call_id` currently has an in-flight entry.
    #[must_use]
    pub fn contains(&self, call_id: &str) -> bool { self.tasks.contains_key(call_id) }

    /// Number of in-flight tasks.
    #[must_use]
    pub fn len(&self) -> usize { self.tasks.len() }

    /// Whether there are no in-flight tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.tasks.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_rejects_duplicate_call_id() {
        let mut registry = TaskRegistry::new();
        assert!(registry.insert(TaskEntry::new("c1".to_owned(), ReturnType::Object)));
        assert!(!registry.insert(TaskEntry::new("c1".to_owned(), ReturnType::Object)));
    }

    #[test]
    fn cancel_missing_id_is_noop() {
        let registry = TaskRegistry::new();
        assert!(!registry.cancel("missing"));
    }

    #[test]
    fn cancel_marks_token_cancelled() {
        let mut registry = TaskRegistry::new();
        let entry = TaskEntry::new("c1".to_owned(), ReturnType::Nothing);
        let token = entry.token.clone();
        registry.insert(entry);
        assert!(registry.cancel("c1"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_all_cancels_every_token() {
        let mut registry = TaskRegistry::new();
        let e1 = TaskEntry::new("c1".to_owned(), ReturnType::Object);
        let e2 = TaskEntry::new("c2".to_owned(), ReturnType::Object);
        let (t1, t2) = (e1.token.clone(), e2.token.clone());
        registry.insert(e1);
        registry.insert(e2);
        registry.cancel_all();
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[test]
    fn remove_drops_entry() {
        let mut registry = TaskRegistry::new();
        registry.insert(TaskEntry::new("c1".to_owned(), ReturnType::Object));
        assert!(registry.remove("c1").is_some());
        assert!(!registry.contains("c1"));
    }
}
