//! nomad-driver-systemd runs orchestrator tasks as systemd service units.
//!
//! For each task the driver renders the task specification into unit directives, persists them
//! as a drop-in (`/run/systemd/system/<unit>.d/nomad.conf` by default), starts the unit through
//! the system D-Bus and follows the unit's `ActiveState` until it becomes `inactive` or
//! `failed`.
//!
//! Runtime is Linux-only (systemd + system bus required).
//!
//! ## Quick start
//! ```no_run
//! use nomad_driver_systemd::{Driver, DriverOptions, TaskConfig, TaskSpec};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn run_webserver() -> Result<(), nomad_driver_systemd::Error> {
//!     let driver = Driver::new(DriverOptions::default());
//!     driver.set_config(&[])?;
//!
//!     let mut spec = TaskSpec::default();
//!     spec.id = "alloc-1/web".to_string();
//!     spec.set_driver_config(&TaskConfig::new("webserver@1.service"))?;
//!
//!     let handle = driver.start_task(spec).await?;
//!     let waiter = driver.wait_task(handle.task_id(), CancellationToken::new())?;
//!     let exit = waiter.recv().await;
//!     println!("{exit:?}");
//!     driver.destroy_task(handle.task_id(), false)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Unit directives
//! - `Environment=` carries all variables space-joined (`K=V K2=V2`); values containing
//!   whitespace are split by systemd.
//! - Mounts with `readonly = true` become `BindReadOnlyPaths=`, others `BindPaths=`.
//! - The allocation's `/alloc`, `/local` and `/secrets` directories are always bound.
//!
//! ## Known gaps
//! - StopTask ignores the caller's timeout and signal; systemd's `TimeoutStopSec` and
//!   `KillSignal` apply.
//! - RecoverTask does not rebuild state after a driver restart.
//! - TaskStats, SignalTask and ExecTask return `Error::Unsupported`.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::dbg_macro)]

#[cfg(all(feature = "rt-async-io", feature = "rt-tokio"))]
compile_error!("features `rt-async-io` and `rt-tokio` are mutually exclusive; enable exactly one.");

#[cfg(not(any(feature = "rt-async-io", feature = "rt-tokio")))]
compile_error!(
    "missing runtime feature: enable one of `rt-async-io` or `rt-tokio` (default enables `rt-async-io`)."
);

#[cfg(feature = "blocking")]
mod blocking_api;
mod bus;
mod error;
mod eventer;
mod fingerprint;
mod fsutil;
mod lifecycle;
mod options;
mod registry;
mod runtime;
mod types;
mod unit_options;
mod util;
mod wait;

pub use crate::types::config::{
    Capabilities, DriverConfig, Fingerprint, FsIsolation, HealthState, PluginInfo, SchemaAttr,
};
pub use crate::types::task::{
    DeviceConfig, ExitKind, ExitResult, MountConfig, Resources, TaskConfig, TaskDirs, TaskEvent,
    TaskHandle, TaskSpec, TaskState, TaskStatus,
};
pub use crate::types::unit::{ActiveState, LoadState, UnitStatus};

pub use crate::error::{Error, Result};
pub use crate::eventer::TaskEvents;
pub use crate::fingerprint::Fingerprints;
pub use crate::lifecycle::WaitHandle;
pub use crate::options::DriverOptions;
pub use crate::unit_options::{UnitOption, task_unit_options};

#[cfg(feature = "blocking")]
pub use crate::blocking_api::{BlockingDriver, BlockingWaitHandle};

use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

pub(crate) const PLUGIN_NAME: &str = "systemd";

/// Task driver bridging the orchestrator's task lifecycle to systemd units.
///
/// Cheap to clone; clones share the D-Bus connection, the task registry and the shutdown
/// signal.
#[derive(Clone, Debug)]
pub struct Driver {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    opts: DriverOptions,
    gateway: bus::Gateway,
    tasks: registry::TaskRegistry,
    config: RwLock<Option<DriverConfig>>,
    eventer: eventer::Eventer,
    shutdown: CancellationToken,
}

impl Inner {
    fn config(&self) -> Option<DriverConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Driver {
    /// Create a driver. No connection is made until the first operation needs one.
    pub fn new(opts: DriverOptions) -> Self {
        let gateway = bus::Gateway::new(opts.dbus_call_timeout, opts.signal_buffer);
        let eventer = eventer::Eventer::new(opts.signal_buffer);
        Self {
            inner: Arc::new(Inner {
                opts,
                gateway,
                tasks: registry::TaskRegistry::new(),
                config: RwLock::new(None),
                eventer,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Static plugin metadata.
    pub fn plugin_info(&self) -> PluginInfo {
        PluginInfo {
            plugin_type: "driver",
            plugin_api_versions: vec!["0.1.0"],
            plugin_version: env!("CARGO_PKG_VERSION"),
            name: PLUGIN_NAME,
        }
    }

    /// Schema of the plugin configuration accepted by `set_config`.
    pub fn config_schema(&self) -> Vec<SchemaAttr> {
        vec![SchemaAttr {
            name: "enabled",
            ty: "bool",
            required: false,
            default: Some("true"),
        }]
    }

    /// Apply msgpack-encoded plugin configuration. An empty payload selects the defaults.
    pub fn set_config(&self, plugin_config: &[u8]) -> Result<()> {
        let config = if plugin_config.is_empty() {
            DriverConfig::default()
        } else {
            rmp_serde::from_slice(plugin_config).map_err(|e| Error::ConfigDecode {
                context: format!("failed to decode plugin config: {e}"),
            })?
        };

        #[cfg(feature = "tracing")]
        tracing::info!(enabled = config.enabled, "set_config");

        *self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(config);
        Ok(())
    }

    /// Currently applied plugin configuration, if any.
    pub fn config(&self) -> Option<DriverConfig> {
        self.inner.config()
    }

    /// Schema of the per-task driver configuration.
    pub fn task_config_schema(&self) -> Vec<SchemaAttr> {
        vec![SchemaAttr {
            name: "unit",
            ty: "string",
            required: true,
            default: None,
        }]
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            send_signals: true,
            exec: false,
            fs_isolation: FsIsolation::Chroot,
        }
    }

    /// Start the fingerprint stream. It ends when `cancel` or the driver shutdown fires.
    pub fn fingerprint(&self, cancel: CancellationToken) -> Fingerprints {
        Fingerprints::new(self.inner.clone(), cancel)
    }

    /// Subscribe to task events. The stream ends when `cancel` or the driver shutdown fires.
    pub fn task_events(&self, cancel: CancellationToken) -> TaskEvents {
        self.inner
            .eventer
            .subscribe(cancel, self.inner.shutdown.clone())
    }

    /// Number of tasks currently registered.
    pub fn task_count(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Signal shutdown: pending waits resolve with a cancellation error and the fingerprint
    /// and event streams end. Units are left running.
    pub fn shutdown(&self) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            tasks = self.inner.tasks.len(),
            connected = self.inner.gateway.is_connected(),
            "driver shutdown"
        );
        self.inner.shutdown.cancel();
    }
}
