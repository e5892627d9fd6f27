use crate::TaskHandle;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

/// Interest in one unit's state changes.
///
/// The live D-Bus stream is opened per wait and dropped when that wait ends; this value only
/// pins down which unit the task's waits follow.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Subscription {
    unit: String,
}

impl Subscription {
    pub(crate) fn new(unit: impl Into<String>) -> Self {
        Self { unit: unit.into() }
    }

    pub(crate) fn unit(&self) -> &str {
        &self.unit
    }
}

/// Registry value: the orchestrator handle plus the unit subscription.
///
/// `retired` fires once the entry leaves the registry (deleted or replaced); waits running
/// against the entry end with it.
#[derive(Debug)]
pub(crate) struct TaskEntry {
    pub(crate) handle: TaskHandle,
    pub(crate) subscription: Subscription,
    retired: CancellationToken,
}

impl TaskEntry {
    pub(crate) fn new(handle: TaskHandle, unit: impl Into<String>) -> Self {
        Self {
            handle,
            subscription: Subscription::new(unit),
            retired: CancellationToken::new(),
        }
    }

    pub(crate) fn retired(&self) -> &CancellationToken {
        &self.retired
    }
}

/// Concurrent `task id -> TaskEntry` map.
///
/// Only single-step operations are exposed; no caller holds the lock across calls.
#[derive(Debug, Default)]
pub(crate) struct TaskRegistry {
    tasks: RwLock<HashMap<String, Arc<TaskEntry>>>,
}

impl TaskRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store `entry`, returning the entry it replaced. The replaced entry is retired.
    pub(crate) fn set(&self, id: impl Into<String>, entry: TaskEntry) -> Option<Arc<TaskEntry>> {
        let replaced = self
            .tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), Arc::new(entry));
        if let Some(old) = &replaced {
            old.retired.cancel();
        }
        replaced
    }

    pub(crate) fn get(&self, id: &str) -> Option<Arc<TaskEntry>> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Remove and retire the entry; removing an absent id is a no-op.
    pub(crate) fn delete(&self, id: &str) -> Option<Arc<TaskEntry>> {
        let removed = self
            .tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(old) = &removed {
            old.retired.cancel();
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::TaskSpec;

    fn entry(id: &str, unit: &str) -> TaskEntry {
        let spec = TaskSpec {
            id: id.to_string(),
            ..Default::default()
        };
        TaskEntry::new(TaskHandle::new(spec), unit)
    }

    #[test]
    fn set_get_delete_round_trip() {
        let reg = TaskRegistry::new();
        assert!(reg.get("t1").is_none());

        assert!(reg.set("t1", entry("t1", "a.service")).is_none());
        let got = reg.get("t1").expect("present");
        assert_eq!(got.handle.task_id(), "t1");
        assert_eq!(got.subscription.unit(), "a.service");

        assert!(!got.retired().is_cancelled());
        assert!(reg.delete("t1").is_some());
        assert!(got.retired().is_cancelled());
        assert!(reg.get("t1").is_none());
        assert!(reg.delete("t1").is_none());
    }

    #[test]
    fn at_most_one_entry_per_id() {
        let reg = TaskRegistry::new();
        reg.set("t1", entry("t1", "a.service"));
        let replaced = reg.set("t1", entry("t1", "b.service")).expect("replaced");

        assert_eq!(replaced.subscription.unit(), "a.service");
        assert!(replaced.retired().is_cancelled());
        assert_eq!(reg.len(), 1);
        let current = reg.get("t1").expect("present");
        assert_eq!(current.subscription.unit(), "b.service");
        assert!(!current.retired().is_cancelled());
    }

    #[test]
    fn concurrent_access_is_consistent() {
        let reg = Arc::new(TaskRegistry::new());
        let workers = (0..8)
            .map(|w| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let id = format!("w{w}-{i}");
                        reg.set(id.clone(), entry(&id, "x.service"));
                        assert!(reg.get(&id).is_some());
                        if i % 2 == 0 {
                            reg.delete(&id);
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for w in workers {
            w.join().expect("worker");
        }

        assert_eq!(reg.len(), 8 * 50);
    }
}
