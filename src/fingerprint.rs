use crate::{DriverConfig, Fingerprint, HealthState};

use futures_util::FutureExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Periodic fingerprint stream returned by `Driver::fingerprint`.
///
/// The first `next()` resolves immediately; later ones after `fingerprint_period`. Yields
/// `None` once the caller's token or the driver's shutdown token fires.
#[derive(Debug)]
pub struct Fingerprints {
    inner: Arc<crate::Inner>,
    cancel: CancellationToken,
    started: bool,
}

impl Fingerprints {
    pub(crate) fn new(inner: Arc<crate::Inner>, cancel: CancellationToken) -> Self {
        Self {
            inner,
            cancel,
            started: false,
        }
    }

    pub async fn next(&mut self) -> Option<Fingerprint> {
        if self.cancel.is_cancelled() || self.inner.shutdown.is_cancelled() {
            return None;
        }

        if self.started {
            futures_util::select_biased! {
                _ = self.cancel.cancelled().fuse() => return None,
                _ = self.inner.shutdown.cancelled().fuse() => return None,
                _ = crate::runtime::sleep(self.inner.opts.fingerprint_period).fuse() => {}
            }
        }
        self.started = true;

        let fp = build_fingerprint(&self.inner).await;

        #[cfg(feature = "tracing")]
        tracing::debug!(health = ?fp.health, description = %fp.health_description, "fingerprint");

        Some(fp)
    }
}

async fn build_fingerprint(inner: &crate::Inner) -> Fingerprint {
    let config = inner.config();
    let probe = match &config {
        Some(DriverConfig { enabled: true }) => Some(inner.gateway.bus().await.map(|_| ())),
        _ => None,
    };
    fingerprint_from(config.as_ref(), probe)
}

fn fingerprint_from(
    config: Option<&DriverConfig>,
    probe: Option<crate::Result<()>>,
) -> Fingerprint {
    let mut attributes = BTreeMap::new();

    let (health, health_description) = match (config, probe) {
        (Some(cfg), Some(Ok(()))) if cfg.enabled => {
            attributes.insert("driver.systemd".to_string(), "1".to_string());
            attributes.insert(
                "driver.systemd.version".to_string(),
                env!("CARGO_PKG_VERSION").to_string(),
            );
            (HealthState::Healthy, "ready".to_string())
        }
        (Some(cfg), Some(Err(e))) if cfg.enabled => (
            HealthState::Unhealthy,
            format!("systemd unreachable: {e}"),
        ),
        (Some(_), _) => (HealthState::Undetected, "disabled".to_string()),
        (None, _) => (HealthState::Undetected, String::new()),
    };

    Fingerprint {
        attributes,
        health,
        health_description,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::Error;

    #[test]
    fn unconfigured_driver_is_undetected() {
        let fp = fingerprint_from(None, None);
        assert_eq!(fp.health, HealthState::Undetected);
        assert!(fp.attributes.is_empty());
    }

    #[test]
    fn disabled_driver_is_undetected() {
        let fp = fingerprint_from(Some(&DriverConfig::new(false)), None);
        assert_eq!(fp.health, HealthState::Undetected);
        assert_eq!(fp.health_description, "disabled");
    }

    #[test]
    fn enabled_and_reachable_is_healthy() {
        let fp = fingerprint_from(Some(&DriverConfig::new(true)), Some(Ok(())));
        assert_eq!(fp.health, HealthState::Healthy);
        assert_eq!(fp.health_description, "ready");
        assert_eq!(fp.attributes.get("driver.systemd").map(String::as_str), Some("1"));
    }

    #[test]
    fn enabled_but_unreachable_is_unhealthy() {
        let err = Error::BackendUnavailable {
            backend: "system_bus",
            detail: "no socket".to_string(),
        };
        let fp = fingerprint_from(Some(&DriverConfig::new(true)), Some(Err(err)));
        assert_eq!(fp.health, HealthState::Unhealthy);
        assert!(fp.health_description.contains("no socket"));
    }
}
