use crate::registry::TaskEntry;
use crate::wait::{WaitOutcome, consume_states};
use crate::{
    ActiveState, Driver, Error, ExitResult, Result, TaskEvent, TaskHandle, TaskSpec, TaskStatus,
    fsutil, runtime, unit_options, util,
};

use futures_util::FutureExt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};

/// `si_code` values reported in `ExecMainCode`.
const CLD_EXITED: i32 = 1;
const CLD_KILLED: i32 = 2;
const CLD_DUMPED: i32 = 3;

/// Pending result of a `wait_task` call.
///
/// Dropping the handle cancels the wait and releases its subscription; the unit keeps running.
#[derive(Debug)]
pub struct WaitHandle {
    task: runtime::JoinHandle<ExitResult>,
    _guard: DropGuard,
}

impl WaitHandle {
    /// Resolve to the wait's single `ExitResult`.
    pub async fn recv(self) -> ExitResult {
        match self.task.join().await {
            Some(result) => result,
            None => ExitResult::error(Error::IoError {
                context: "wait task aborted".to_string(),
            }),
        }
    }
}

impl Driver {
    /// Render the drop-in, start the unit and register the task.
    ///
    /// Every failure up to and including `StartUnit` leaves no registry entry and removes a
    /// drop-in this call wrote, so the call can be retried.
    pub async fn start_task(&self, spec: TaskSpec) -> Result<TaskHandle> {
        let task_cfg = spec.decode_driver_config()?;
        let unit = util::canonicalize_unit_name(&task_cfg.unit)?;
        let dropin_name = self.inner.opts.dropin_name.clone();
        util::validate_dropin_name(&dropin_name)?;

        #[cfg(feature = "tracing")]
        tracing::info!(task_id = %spec.id, %unit, "start_task");

        let contents = fsutil::serialize(&unit_options::task_unit_options(&spec))?;
        let units_root = PathBuf::from(&self.inner.opts.units_root);
        let unit2 = unit.clone();
        let report = blocking::unblock(move || {
            fsutil::write_dropin(&units_root, &unit2, &dropin_name, &contents)
        })
        .await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            %unit,
            path = %report.path.display(),
            changed = report.changed,
            "drop-in written"
        );

        if let Err(e) = self.reload_and_start(&unit, report.changed).await {
            // A drop-in left behind would read as unchanged on retry and skip the reload.
            if report.changed {
                discard_dropin(report.path).await;
            }
            return Err(e);
        }

        let spec = Arc::new(spec);
        let handle = TaskHandle::new(spec.clone());
        let entry = TaskEntry::new(handle.clone(), unit.clone());
        if let Some(_previous) = self.inner.tasks.set(spec.id.clone(), entry) {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                task_id = %spec.id,
                previous_unit = %_previous.subscription.unit(),
                "task was already registered; handle replaced"
            );
        }

        self.inner.eventer.emit(
            TaskEvent::for_task(&spec, "Started systemd unit").annotate("unit", unit.as_str()),
        );

        #[cfg(feature = "tracing")]
        tracing::info!(task_id = %spec.id, %unit, "start_task done");

        Ok(handle)
    }

    async fn reload_and_start(&self, unit: &str, dropin_changed: bool) -> Result<()> {
        if dropin_changed && self.inner.opts.daemon_reload {
            self.inner.gateway.daemon_reload().await?;
        }
        self.inner.gateway.start_unit(unit).await
    }

    /// Wait for the task's unit to become `inactive` or `failed` with no job queued.
    ///
    /// Fails immediately with `Error::TaskNotFound` for an unknown task. Otherwise the state
    /// stream is consumed on a background task. Canceling `cancel`, shutting the driver down or
    /// destroying the task resolves the wait with `Error::Canceled` without stopping the unit.
    /// Under `rt-tokio` the call must be made inside a tokio runtime.
    pub fn wait_task(&self, task_id: &str, cancel: CancellationToken) -> Result<WaitHandle> {
        let entry = self
            .inner
            .tasks
            .get(task_id)
            .ok_or_else(|| Error::task_not_found(task_id))?;

        let cancel = cancel.child_token();
        let guard = cancel.clone().drop_guard();
        let inner = self.inner.clone();

        #[cfg(feature = "tracing")]
        tracing::debug!(%task_id, unit = %entry.subscription.unit(), "wait_task");

        let task = runtime::spawn(async move { wait_for_exit(&inner, &entry, &cancel).await })?;

        Ok(WaitHandle {
            task,
            _guard: guard,
        })
    }

    /// Request a stop of the task's unit.
    ///
    /// `timeout` and `signal` are not applied; the unit's own `TimeoutStopSec`/`KillSignal`
    /// govern. A failing `StopUnit` call is logged and not returned. The call does not wait for
    /// the unit to stop.
    pub async fn stop_task(&self, task_id: &str, _timeout: Duration, _signal: &str) -> Result<()> {
        let entry = self
            .inner
            .tasks
            .get(task_id)
            .ok_or_else(|| Error::task_not_found(task_id))?;
        let unit = entry.subscription.unit();

        #[cfg(feature = "tracing")]
        tracing::info!(%task_id, %unit, timeout = ?_timeout, signal = %_signal, "stop_task");

        self.inner.gateway.bus().await?;
        if let Err(_e) = self.inner.gateway.stop_unit(unit).await {
            #[cfg(feature = "tracing")]
            tracing::warn!(%task_id, %unit, error = %_e, "StopUnit failed");
        }

        self.inner.eventer.emit(
            TaskEvent::for_task(&entry.handle.config, "Stop requested").annotate("unit", unit),
        );
        Ok(())
    }

    /// Forget the task. Does not stop the unit; `force` has no effect. Idempotent.
    pub fn destroy_task(&self, task_id: &str, _force: bool) -> Result<()> {
        let _removed = self.inner.tasks.delete(task_id);

        #[cfg(feature = "tracing")]
        tracing::info!(%task_id, force = _force, removed = _removed.is_some(), "destroy_task");

        Ok(())
    }

    /// Query the unit's live state.
    pub async fn inspect_task(&self, task_id: &str) -> Result<TaskStatus> {
        let entry = self
            .inner
            .tasks
            .get(task_id)
            .ok_or_else(|| Error::task_not_found(task_id))?;
        let unit = entry.subscription.unit();

        let status = self
            .inner
            .gateway
            .list_unit_status(&[unit])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::UnitNotFound {
                unit: unit.to_string(),
            })?;

        Ok(TaskStatus {
            id: task_id.to_string(),
            name: status.name,
            state: status.active_state.task_state(),
            started_at: None,
            completed_at: None,
        })
    }

    /// Accept a handle after a driver restart.
    ///
    /// Only registry presence is checked; a task that is not registered stays unknown until the
    /// orchestrator starts it again.
    pub fn recover_task(&self, handle: &TaskHandle) -> Result<()> {
        let _known = self.inner.tasks.get(handle.task_id()).is_some();

        #[cfg(feature = "tracing")]
        tracing::debug!(task_id = %handle.task_id(), known = _known, "recover_task");

        Ok(())
    }

    /// Always `Error::Unsupported`.
    pub fn task_stats(&self, _task_id: &str, _interval: Duration) -> Result<()> {
        Err(Error::Unsupported {
            operation: "TaskStats",
        })
    }

    /// Always `Error::Unsupported`.
    pub fn signal_task(&self, _task_id: &str, _signal: &str) -> Result<()> {
        Err(Error::Unsupported {
            operation: "SignalTask",
        })
    }

    /// Always `Error::Unsupported`.
    pub fn exec_task(&self, _task_id: &str, _cmd: &[String], _timeout: Duration) -> Result<()> {
        Err(Error::Unsupported {
            operation: "ExecTask",
        })
    }
}

async fn wait_for_exit(
    inner: &crate::Inner,
    entry: &TaskEntry,
    cancel: &CancellationToken,
) -> ExitResult {
    until_retired(
        entry.retired(),
        wait_for_terminal(inner, entry.subscription.unit(), cancel),
    )
    .await
}

/// Run `wait` until it resolves or the task leaves the registry; the latter drops `wait`
/// together with its unit subscription.
async fn until_retired(
    retired: &CancellationToken,
    wait: impl Future<Output = ExitResult>,
) -> ExitResult {
    futures_util::select_biased! {
        _ = retired.cancelled().fuse() => canceled("task destroyed"),
        result = wait.fuse() => result,
    }
}

async fn wait_for_terminal(
    inner: &crate::Inner,
    unit: &str,
    cancel: &CancellationToken,
) -> ExitResult {
    let shutdown = &inner.shutdown;

    let states = futures_util::select_biased! {
        _ = cancel.cancelled().fuse() => return canceled("wait canceled"),
        _ = shutdown.cancelled().fuse() => return canceled("driver shutting down"),
        res = inner.gateway.subscribe(unit).fuse() => match res {
            Ok(states) => states,
            Err(e) => return ExitResult::error(e),
        },
    };

    match consume_states(unit, states, cancel, shutdown).await {
        WaitOutcome::Exited(state) => {
            let exec = match state {
                ActiveState::Failed => Some(inner.gateway.exec_main_status(unit).await),
                _ => None,
            };
            let result = exit_result_for(&state, exec);

            #[cfg(feature = "tracing")]
            tracing::info!(
                %unit,
                active_state = ?state,
                exit_code = result.exit_code,
                signal = result.signal,
                "unit reached terminal state"
            );

            result
        }
        WaitOutcome::Canceled => canceled("wait canceled"),
        WaitOutcome::Shutdown => canceled("driver shutting down"),
        WaitOutcome::StreamError(e) => ExitResult::error(e),
        WaitOutcome::StreamEnded => ExitResult::error(Error::IoError {
            context: format!("state stream for {unit} ended before a terminal state"),
        }),
    }
}

async fn discard_dropin(path: PathBuf) {
    #[cfg(feature = "tracing")]
    let shown = path.display().to_string();
    if let Err(_e) = blocking::unblock(move || fsutil::remove_dropin(&path)).await {
        #[cfg(feature = "tracing")]
        tracing::warn!(path = %shown, error = %_e, "failed to remove drop-in after start failure");
    }
}

fn canceled(reason: &'static str) -> ExitResult {
    #[cfg(feature = "tracing")]
    tracing::debug!(%reason, "wait ended without a terminal state");
    ExitResult::error(Error::Canceled { reason })
}

/// `inactive` is a clean exit. `failed` carries the main process' exit code or signal when
/// systemd reports one, and exit code 1 otherwise.
fn exit_result_for(
    state: &ActiveState,
    exec: Option<Result<(Option<i32>, Option<i32>)>>,
) -> ExitResult {
    if *state != ActiveState::Failed {
        return ExitResult::success(0);
    }

    let (code, signal) = match exec {
        Some(Ok((Some(CLD_EXITED), Some(status)))) => (status, 0),
        Some(Ok((Some(CLD_KILLED | CLD_DUMPED), Some(status)))) => (0, status),
        _ => (0, 0),
    };

    if code == 0 && signal == 0 {
        ExitResult::failure(1, 0)
    } else {
        ExitResult::failure(code, signal)
    }
}
