use crate::TaskState;

/// systemd `Unit.LoadState`.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum LoadState {
    Loaded,
    NotFound,
    Error,
    Masked,
    Stub,
    Merged,
    Generated,
    Transient,
    BadSetting,
    Unknown(String),
}

impl LoadState {
    pub(crate) fn parse(s: &str) -> Self {
        match s {
            "loaded" => LoadState::Loaded,
            "not-found" => LoadState::NotFound,
            "error" => LoadState::Error,
            "masked" => LoadState::Masked,
            "stub" => LoadState::Stub,
            "merged" => LoadState::Merged,
            "generated" => LoadState::Generated,
            "transient" => LoadState::Transient,
            "bad-setting" => LoadState::BadSetting,
            other => LoadState::Unknown(other.to_string()),
        }
    }
}

/// systemd `Unit.ActiveState`.
///
/// Always read live from systemd; the driver never caches it.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ActiveState {
    Active,
    Reloading,
    Inactive,
    Failed,
    Activating,
    Deactivating,
    Maintenance,
    Unknown(String),
}

impl ActiveState {
    pub(crate) fn parse(s: &str) -> Self {
        match s {
            "active" => ActiveState::Active,
            "reloading" => ActiveState::Reloading,
            "inactive" => ActiveState::Inactive,
            "failed" => ActiveState::Failed,
            "activating" => ActiveState::Activating,
            "deactivating" => ActiveState::Deactivating,
            "maintenance" => ActiveState::Maintenance,
            other => ActiveState::Unknown(other.to_string()),
        }
    }

    /// Whether a wait should stop on this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActiveState::Inactive | ActiveState::Failed)
    }

    /// Map to the orchestrator's task state.
    ///
    /// `activating`/`deactivating` are `Unknown`, `active` is `Running`, `inactive` and `failed`
    /// are `Exited`. Anything else is `Unknown`.
    pub fn task_state(&self) -> TaskState {
        match self {
            ActiveState::Active => TaskState::Running,
            ActiveState::Inactive | ActiveState::Failed => TaskState::Exited,
            ActiveState::Activating | ActiveState::Deactivating => TaskState::Unknown,
            _ => TaskState::Unknown,
        }
    }
}

/// A single row returned by `org.freedesktop.systemd1.Manager.ListUnitsByNames`.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct UnitStatus {
    pub name: String,
    pub description: Option<String>,
    pub load_state: LoadState,
    pub active_state: ActiveState,
    pub sub_state: Option<String>,
    pub unit_path: String,
    /// Id of the job queued for the unit, `0` when none is pending.
    pub job_id: u32,
    pub job_type: Option<String>,
}

impl UnitStatus {
    pub(crate) fn from_dbus(item: crate::bus::ListUnitItem) -> Self {
        let (
            name,
            description,
            load_state,
            active_state,
            sub_state,
            _followed,
            unit_path,
            job_id,
            job_type,
            _job_path,
        ) = item;

        Self {
            name,
            description: non_empty(description),
            load_state: LoadState::parse(&load_state),
            active_state: ActiveState::parse(&active_state),
            sub_state: non_empty(sub_state),
            unit_path: unit_path.to_string(),
            job_id,
            job_type: non_empty(job_type),
        }
    }

    /// The unit reached `inactive`/`failed` and no job is queued that would move it again.
    ///
    /// A start job queued right before the query still reports the old `inactive` state.
    pub fn is_settled(&self) -> bool {
        self.active_state.is_terminal() && self.job_id == 0
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use super::*;
    use zbus::zvariant::OwnedObjectPath;

    #[test]
    fn active_state_parses_known_and_unknown_values() {
        assert_eq!(ActiveState::parse("active"), ActiveState::Active);
        assert_eq!(ActiveState::parse("failed"), ActiveState::Failed);
        assert_eq!(
            ActiveState::parse("wat"),
            ActiveState::Unknown("wat".to_string())
        );
    }

    #[test]
    fn task_state_table() {
        assert_eq!(ActiveState::Activating.task_state(), TaskState::Unknown);
        assert_eq!(ActiveState::Deactivating.task_state(), TaskState::Unknown);
        assert_eq!(ActiveState::Active.task_state(), TaskState::Running);
        assert_eq!(ActiveState::Inactive.task_state(), TaskState::Exited);
        assert_eq!(ActiveState::Reloading.task_state(), TaskState::Unknown);
        assert_eq!(
            ActiveState::Unknown("x".to_string()).task_state(),
            TaskState::Unknown
        );
    }

    #[test]
    fn failed_maps_to_exited_not_unknown() {
        assert_eq!(ActiveState::parse("failed").task_state(), TaskState::Exited);
    }

    #[test]
    fn only_inactive_and_failed_are_terminal() {
        assert!(ActiveState::Inactive.is_terminal());
        assert!(ActiveState::Failed.is_terminal());
        assert!(!ActiveState::Active.is_terminal());
        assert!(!ActiveState::Activating.is_terminal());
        assert!(!ActiveState::Deactivating.is_terminal());
    }

    #[test]
    fn unit_status_from_list_row() {
        let path = OwnedObjectPath::try_from("/org/freedesktop/systemd1/unit/web_2eservice")
            .expect("path");
        let root = OwnedObjectPath::try_from("/").expect("path");
        let row = (
            "web.service".to_string(),
            String::new(),
            "loaded".to_string(),
            "failed".to_string(),
            "failed".to_string(),
            String::new(),
            path,
            0u32,
            String::new(),
            root,
        );

        let status = UnitStatus::from_dbus(row);
        assert_eq!(status.name, "web.service");
        assert_eq!(status.description, None);
        assert_eq!(status.load_state, LoadState::Loaded);
        assert_eq!(status.active_state, ActiveState::Failed);
        assert_eq!(status.sub_state.as_deref(), Some("failed"));
        assert_eq!(
            status.unit_path,
            "/org/freedesktop/systemd1/unit/web_2eservice"
        );
        assert_eq!(status.job_id, 0);
        assert!(status.is_settled());
    }

    #[test]
    fn inactive_with_queued_start_job_is_not_settled() {
        let path = OwnedObjectPath::try_from("/org/freedesktop/systemd1/unit/web_2eservice")
            .expect("path");
        let job = OwnedObjectPath::try_from("/org/freedesktop/systemd1/job/42").expect("path");
        let row = (
            "web.service".to_string(),
            String::new(),
            "loaded".to_string(),
            "inactive".to_string(),
            "dead".to_string(),
            String::new(),
            path,
            42u32,
            "start".to_string(),
            job,
        );

        let status = UnitStatus::from_dbus(row);
        assert_eq!(status.active_state, ActiveState::Inactive);
        assert_eq!(status.job_id, 42);
        assert_eq!(status.job_type.as_deref(), Some("start"));
        assert!(!status.is_settled());
    }
}
