#![cfg(target_os = "linux")]

// Linux/systemd integration tests.
//
// These are ignored by default and are intended to be run on a real systemd host:
// - `NOMAD_SYSTEMD_ITEST_UNIT`: a safe service unit to drive (e.g. "nomad-itest.service" in a
//   test VM). The test writes a drop-in under /run/systemd/system, so it needs root/policy.

use std::future::Future;
use std::time::Duration;

use nomad_driver_systemd::{
    Driver, DriverOptions, Error, HealthState, TaskConfig, TaskSpec, TaskState,
};
use tokio_util::sync::CancellationToken;

fn block_on<T>(fut: impl Future<Output = T>) -> T {
    #[cfg(feature = "rt-async-io")]
    {
        smol::block_on(fut)
    }

    #[cfg(feature = "rt-tokio")]
    {
        let rt = tokio::runtime::Runtime::new().expect("init tokio runtime");
        rt.block_on(fut)
    }
}

fn env(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

fn skippable(e: &Error) -> bool {
    matches!(
        e,
        Error::PermissionDenied { .. } | Error::BackendUnavailable { .. }
    )
}

#[test]
#[ignore]
fn fingerprint_reports_systemd_health() {
    block_on(async {
        let driver = Driver::new(DriverOptions::default());
        driver.set_config(&[])?;

        let mut fps = driver.fingerprint(CancellationToken::new());
        let fp = fps.next().await.expect("first fingerprint");
        if fp.health == HealthState::Unhealthy {
            eprintln!("system bus unavailable ({}); skipping", fp.health_description);
            return Ok(());
        }

        assert_eq!(fp.health, HealthState::Healthy);
        assert_eq!(
            fp.attributes.get("driver.systemd").map(String::as_str),
            Some("1")
        );

        driver.shutdown();
        assert!(fps.next().await.is_none());
        Ok::<(), Error>(())
    })
    .unwrap();
}

#[test]
#[ignore]
fn start_inspect_stop_and_wait() {
    let Some(unit) = env("NOMAD_SYSTEMD_ITEST_UNIT") else {
        eprintln!("NOMAD_SYSTEMD_ITEST_UNIT not set; skipping");
        return;
    };

    block_on(async {
        let driver = Driver::new(DriverOptions::default());
        driver.set_config(&[])?;
        let mut events = driver.task_events(CancellationToken::new());

        let mut spec = TaskSpec::default();
        spec.id = "itest/web".to_string();
        spec.name = "web".to_string();
        spec.env.insert("NOMAD_ITEST".to_string(), "1".to_string());
        spec.set_driver_config(&TaskConfig::new(unit.clone()))?;

        let handle = match driver.start_task(spec).await {
            Ok(h) => h,
            Err(e) if skippable(&e) => {
                eprintln!("cannot start {unit} ({e}); skipping");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let started = events.next().await.expect("start event");
        assert_eq!(started.task_id, "itest/web");
        assert_eq!(started.annotations.get("unit"), Some(&unit));

        let status = driver.inspect_task(handle.task_id()).await?;
        assert_ne!(status.state, TaskState::Unknown, "unexpected status: {status:?}");

        let waiter = driver.wait_task(handle.task_id(), CancellationToken::new())?;
        driver
            .stop_task(handle.task_id(), Duration::from_secs(10), "SIGTERM")
            .await?;

        let exit = waiter.recv().await;
        assert!(exit.err.is_none(), "wait failed: {exit:?}");

        let status = driver.inspect_task(handle.task_id()).await?;
        assert_eq!(status.state, TaskState::Exited);

        driver.destroy_task(handle.task_id(), false)?;
        assert_eq!(driver.task_count(), 0);

        let dropin = format!("/run/systemd/system/{unit}.d/nomad.conf");
        let _ = std::fs::remove_file(dropin);
        Ok::<(), Error>(())
    })
    .unwrap();
}

#[test]
#[ignore]
fn canceled_wait_leaves_the_unit_running() {
    let Some(unit) = env("NOMAD_SYSTEMD_ITEST_UNIT") else {
        eprintln!("NOMAD_SYSTEMD_ITEST_UNIT not set; skipping");
        return;
    };

    block_on(async {
        let driver = Driver::new(DriverOptions::default());
        driver.set_config(&[])?;

        let mut spec = TaskSpec::default();
        spec.id = "itest/cancel".to_string();
        spec.set_driver_config(&TaskConfig::new(unit.clone()))?;

        let handle = match driver.start_task(spec).await {
            Ok(h) => h,
            Err(e) if skippable(&e) => {
                eprintln!("cannot start {unit} ({e}); skipping");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let cancel = CancellationToken::new();
        let waiter = driver.wait_task(handle.task_id(), cancel.clone())?;
        cancel.cancel();

        let exit = waiter.recv().await;
        let Some(Error::Canceled { .. }) = exit.err else {
            panic!("unexpected exit: {exit:?}");
        };

        let status = driver.inspect_task(handle.task_id()).await?;
        assert_eq!(status.state, TaskState::Running);

        driver
            .stop_task(handle.task_id(), Duration::from_secs(10), "SIGTERM")
            .await?;
        driver.destroy_task(handle.task_id(), false)?;

        let dropin = format!("/run/systemd/system/{unit}.d/nomad.conf");
        let _ = std::fs::remove_file(dropin);
        Ok::<(), Error>(())
    })
    .unwrap();
}
