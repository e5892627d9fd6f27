//! Translation of a `TaskSpec` into unit directives.
//!
//! Everything here is pure: the same spec always yields the same directives in the same order.

use crate::{DeviceConfig, MountConfig, TaskSpec};

pub(crate) const SERVICE_SECTION: &str = "Service";

/// A single unit-file directive: `[section] name=value`.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct UnitOption {
    pub section: String,
    pub name: String,
    pub value: String,
}

impl UnitOption {
    pub fn new(
        section: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            section: section.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    fn service(name: &str, value: impl Into<String>) -> Self {
        Self::new(SERVICE_SECTION, name, value)
    }
}

/// Build the drop-in directives for a task.
///
/// Order: `Environment`, `CPUShares`, `MemoryLimit`, devices, explicit mounts, the implicit
/// task-directory mounts (`/alloc`, `/local`, `/secrets`), `User`, `StandardOutput`,
/// `StandardError`.
pub fn task_unit_options(spec: &TaskSpec) -> Vec<UnitOption> {
    let mut opts = Vec::with_capacity(8 + spec.devices.len() * 2 + spec.mounts.len());

    // Values containing whitespace are split by systemd; kept for compatibility.
    let env = spec
        .env
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    opts.push(UnitOption::service("Environment", env));

    opts.push(UnitOption::service(
        "CPUShares",
        spec.resources.cpu_shares.to_string(),
    ));
    opts.push(UnitOption::service(
        "MemoryLimit",
        spec.resources.memory_limit_bytes.to_string(),
    ));

    for device in &spec.devices {
        opts.extend(device_options(device));
    }

    for mount in &spec.mounts {
        opts.push(mount_option(mount));
    }
    for mount in task_dir_mounts(spec) {
        opts.push(mount_option(&mount));
    }

    opts.push(UnitOption::service("User", spec.user.clone()));

    opts.push(UnitOption::service(
        "StandardOutput",
        format!("file:{}", spec.stdout_path),
    ));
    opts.push(UnitOption::service(
        "StandardError",
        format!("file:{}", spec.stderr_path),
    ));

    opts
}

fn device_options(device: &DeviceConfig) -> [UnitOption; 2] {
    [
        UnitOption::service(
            "BindPaths",
            format!("{}:{}", device.host_path, device.task_path),
        ),
        UnitOption::service(
            "DeviceAllow",
            format!("{} {}", device.host_path, device.permissions),
        ),
    ]
}

fn mount_option(mount: &MountConfig) -> UnitOption {
    let name = if mount.readonly {
        "BindReadOnlyPaths"
    } else {
        "BindPaths"
    };
    UnitOption::service(name, format!("{}:{}", mount.host_path, mount.task_path))
}

fn task_dir_mounts(spec: &TaskSpec) -> [MountConfig; 3] {
    let dirs = &spec.task_dirs;
    [
        MountConfig::new(dirs.shared_alloc_dir.clone(), "/alloc", false),
        MountConfig::new(dirs.local_dir.clone(), "/local", false),
        MountConfig::new(dirs.secrets_dir.clone(), "/secrets", false),
    ]
}
