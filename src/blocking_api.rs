use crate::{
    Driver, DriverOptions, ExitResult, Result, TaskHandle, TaskSpec, TaskStatus, WaitHandle,
};

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Blocking wrapper for `Driver` (feature=`blocking`).
///
/// This is a convenience API for hosts that drive the plugin from plain threads. Internally it
/// uses the selected runtime (`rt-async-io` or `rt-tokio`) to drive the async implementation.
#[derive(Clone, Debug)]
pub struct BlockingDriver {
    inner: Driver,
}

impl BlockingDriver {
    pub fn new(opts: DriverOptions) -> Self {
        Self {
            inner: Driver::new(opts),
        }
    }

    /// Access the async driver sharing this wrapper's state.
    pub fn driver(&self) -> &Driver {
        &self.inner
    }

    pub fn set_config(&self, plugin_config: &[u8]) -> Result<()> {
        self.inner.set_config(plugin_config)
    }

    pub fn start_task(&self, spec: TaskSpec) -> Result<TaskHandle> {
        crate::runtime::block_on_result(self.inner.start_task(spec))
    }

    /// Start waiting for the task; the background wait is spawned inside the runtime's context.
    pub fn wait_task(&self, task_id: &str, cancel: CancellationToken) -> Result<BlockingWaitHandle> {
        let inner = crate::runtime::block_on_result(async { self.inner.wait_task(task_id, cancel) })?;
        Ok(BlockingWaitHandle { inner })
    }

    pub fn stop_task(&self, task_id: &str, timeout: Duration, signal: &str) -> Result<()> {
        crate::runtime::block_on_result(self.inner.stop_task(task_id, timeout, signal))
    }

    pub fn inspect_task(&self, task_id: &str) -> Result<TaskStatus> {
        crate::runtime::block_on_result(self.inner.inspect_task(task_id))
    }

    pub fn destroy_task(&self, task_id: &str, force: bool) -> Result<()> {
        self.inner.destroy_task(task_id, force)
    }

    pub fn recover_task(&self, handle: &TaskHandle) -> Result<()> {
        self.inner.recover_task(handle)
    }

    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

/// Blocking wrapper for `WaitHandle`.
#[derive(Debug)]
pub struct BlockingWaitHandle {
    inner: WaitHandle,
}

impl BlockingWaitHandle {
    /// Block until the wait resolves.
    pub fn recv(self) -> Result<ExitResult> {
        crate::runtime::block_on(self.inner.recv())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn blocking_wait_on_unknown_task_is_not_found() {
        let driver = BlockingDriver::new(DriverOptions::default());
        let err = driver
            .wait_task("nope", CancellationToken::new())
            .expect_err("must fail");
        assert!(err.is_task_not_found());
    }
}
