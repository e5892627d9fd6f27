use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

/// Task specification handed over by the orchestrator at `StartTask`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct TaskSpec {
    /// Task identifier; the registry key.
    pub id: String,
    pub job_name: String,
    pub task_group_name: String,
    /// Task name within the allocation.
    pub name: String,
    pub alloc_id: String,
    /// Environment rendered into a single `Environment=` directive (sorted by key).
    pub env: BTreeMap<String, String>,
    pub resources: Resources,
    pub devices: Vec<DeviceConfig>,
    pub mounts: Vec<MountConfig>,
    /// `User=` of the unit. Empty means systemd's default.
    pub user: String,
    pub stdout_path: String,
    pub stderr_path: String,
    pub task_dirs: TaskDirs,
    /// msgpack-encoded `TaskConfig`.
    pub driver_config: Vec<u8>,
}

impl TaskSpec {
    /// Decode the driver-specific part of the spec.
    pub fn decode_driver_config(&self) -> Result<TaskConfig> {
        let cfg: TaskConfig =
            rmp_serde::from_slice(&self.driver_config).map_err(|e| Error::ConfigDecode {
                context: format!("failed to decode driver config: {e}"),
            })?;
        if cfg.unit.trim().is_empty() {
            return Err(Error::ConfigDecode {
                context: "missing required attribute `unit`".to_string(),
            });
        }
        Ok(cfg)
    }

    /// Encode `cfg` into `driver_config`.
    pub fn set_driver_config(&mut self, cfg: &TaskConfig) -> Result<()> {
        self.driver_config = rmp_serde::to_vec_named(cfg).map_err(|e| Error::ConfigDecode {
            context: format!("failed to encode driver config: {e}"),
        })?;
        Ok(())
    }
}

/// Linux resource limits; zero values are rendered as-is.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct Resources {
    pub cpu_shares: u64,
    pub memory_limit_bytes: u64,
}

impl Resources {
    pub fn new(cpu_shares: u64, memory_limit_bytes: u64) -> Self {
        Self {
            cpu_shares,
            memory_limit_bytes,
        }
    }
}

/// A host device exposed to the task.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct DeviceConfig {
    pub host_path: String,
    pub task_path: String,
    /// cgroup device permissions, e.g. `rwm`.
    pub permissions: String,
}

impl DeviceConfig {
    pub fn new(
        host_path: impl Into<String>,
        task_path: impl Into<String>,
        permissions: impl Into<String>,
    ) -> Self {
        Self {
            host_path: host_path.into(),
            task_path: task_path.into(),
            permissions: permissions.into(),
        }
    }
}

/// A bind mount into the task's view of the filesystem.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct MountConfig {
    pub host_path: String,
    pub task_path: String,
    pub readonly: bool,
}

impl MountConfig {
    pub fn new(host_path: impl Into<String>, task_path: impl Into<String>, readonly: bool) -> Self {
        Self {
            host_path: host_path.into(),
            task_path: task_path.into(),
            readonly,
        }
    }
}

/// Host directories of the allocation that every task sees.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct TaskDirs {
    /// Mounted at `/alloc`.
    pub shared_alloc_dir: String,
    /// Mounted at `/local`.
    pub local_dir: String,
    /// Mounted at `/secrets`.
    pub secrets_dir: String,
}

impl TaskDirs {
    /// Directory layout of a task inside an allocation directory.
    pub fn for_alloc(alloc_dir: impl AsRef<Path>, task_name: &str) -> Self {
        let alloc_dir = alloc_dir.as_ref();
        let task_dir = alloc_dir.join(task_name);
        Self {
            shared_alloc_dir: alloc_dir.join("alloc").to_string_lossy().into_owned(),
            local_dir: task_dir.join("local").to_string_lossy().into_owned(),
            secrets_dir: task_dir.join("secrets").to_string_lossy().into_owned(),
        }
    }
}

/// Driver-specific task configuration (`config { unit = "..." }` in a job file).
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TaskConfig {
    /// Unit to start, e.g. `webserver@1.service`.
    pub unit: String,
}

impl TaskConfig {
    pub fn new(unit: impl Into<String>) -> Self {
        Self { unit: unit.into() }
    }
}

/// Opaque handle returned to the orchestrator by `StartTask`.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct TaskHandle {
    pub version: u32,
    pub config: Arc<TaskSpec>,
    pub state: TaskState,
}

impl TaskHandle {
    /// Build a handle for `config`.
    ///
    /// Hosts use this to rebuild handles from persisted task specs before `recover_task`.
    pub fn new(config: impl Into<Arc<TaskSpec>>) -> Self {
        Self {
            version: 0,
            config: config.into(),
            state: TaskState::Running,
        }
    }

    /// Task identifier this handle refers to.
    pub fn task_id(&self) -> &str {
        &self.config.id
    }
}

/// Orchestrator task state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum TaskState {
    #[default]
    Unknown,
    Running,
    Exited,
}

/// Result of `InspectTask`.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct TaskStatus {
    pub id: String,
    /// Unit name as reported by systemd.
    pub name: String,
    pub state: TaskState,
    /// Not tracked yet.
    pub started_at: Option<SystemTime>,
    /// Not tracked yet.
    pub completed_at: Option<SystemTime>,
}

/// Classification of an `ExitResult`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ExitKind {
    Success,
    Failure,
    Error,
}

/// Terminal outcome of a `WaitTask` call, produced exactly once per call.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct ExitResult {
    pub exit_code: i32,
    pub signal: i32,
    /// Set when the wait itself failed or was canceled; the unit may still be running.
    pub err: Option<Error>,
}

impl ExitResult {
    pub(crate) fn success(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Default::default()
        }
    }

    pub(crate) fn failure(exit_code: i32, signal: i32) -> Self {
        Self {
            exit_code,
            signal,
            err: None,
        }
    }

    pub(crate) fn error(err: Error) -> Self {
        Self {
            err: Some(err),
            ..Default::default()
        }
    }

    pub fn kind(&self) -> ExitKind {
        if self.err.is_some() {
            ExitKind::Error
        } else if self.exit_code == 0 && self.signal == 0 {
            ExitKind::Success
        } else {
            ExitKind::Failure
        }
    }

    pub fn successful(&self) -> bool {
        self.kind() == ExitKind::Success
    }
}

/// Event published on the `TaskEvents` stream.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct TaskEvent {
    pub task_id: String,
    pub alloc_id: String,
    pub task_name: String,
    pub timestamp: SystemTime,
    pub message: String,
    pub annotations: BTreeMap<String, String>,
}

impl TaskEvent {
    pub(crate) fn for_task(spec: &TaskSpec, message: impl Into<String>) -> Self {
        Self {
            task_id: spec.id.clone(),
            alloc_id: spec.alloc_id.clone(),
            task_name: spec.name.clone(),
            timestamp: SystemTime::now(),
            message: message.into(),
            annotations: BTreeMap::new(),
        }
    }

    pub(crate) fn annotate(mut self, key: &str, value: impl Into<String>) -> Self {
        self.annotations.insert(key.to_string(), value.into());
        self
    }
}
