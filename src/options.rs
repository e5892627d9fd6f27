use std::time::Duration;

/// Configuration options for `Driver`.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct DriverOptions {
    /// Base directory under which per-unit drop-in directories are created.
    ///
    /// Default: `/run/systemd/system`.
    pub units_root: String,

    /// Drop-in file name (without `.conf` suffix).
    ///
    /// Default: `nomad`, i.e. `<units_root>/<unit>.d/nomad.conf`.
    pub dropin_name: String,

    /// D-Bus method call timeout.
    pub dbus_call_timeout: Duration,

    /// Interval between fingerprints after the first one.
    pub fingerprint_period: Duration,

    /// Queue depth for unit state signals and per-subscriber task events.
    pub signal_buffer: usize,

    /// Issue `Manager.Reload` after the drop-in content changed.
    pub daemon_reload: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            units_root: "/run/systemd/system".to_string(),
            dropin_name: "nomad".to_string(),
            dbus_call_timeout: Duration::from_secs(5),
            fingerprint_period: Duration::from_secs(30),
            signal_buffer: 16,
            daemon_reload: true,
        }
    }
}
