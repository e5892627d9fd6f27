use std::time::Duration;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by driver APIs.
///
/// Variants are grouped by where the failure happens:
/// - **Before any side effect**: `ConfigDecode`, `InvalidInput`.
/// - **Drop-in persistence**: `UnitWrite`.
/// - **D-Bus**: `PermissionDenied`, `UnitNotFound`, `Timeout`, `BackendUnavailable`,
///   `DbusError`, `IoError`.
/// - **Registry**: `TaskNotFound`.
/// - **Contract**: `Unsupported`, `Canceled`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Plugin or task driver configuration could not be decoded.
    #[error("config decode error: {context}")]
    ConfigDecode { context: String },

    /// Input validation failure (e.g. invalid unit name, control characters in a directive).
    #[error("invalid input: {context}")]
    InvalidInput { context: String },

    /// Writing the unit drop-in failed. Always raised before the unit is started.
    #[error("unit write error: {context}")]
    UnitWrite { context: String },

    /// The current process is not allowed to perform an action (D-Bus policy, polkit).
    #[error("permission denied for {action}: {detail}")]
    PermissionDenied {
        action: &'static str,
        detail: String,
    },

    /// systemd does not know the unit (best-effort mapping from D-Bus error names).
    #[error("unit not found: {unit}")]
    UnitNotFound { unit: String },

    /// A D-Bus call exceeded the configured method timeout.
    #[error("timeout for {action}: {timeout:?}")]
    Timeout {
        action: &'static str,
        timeout: Duration,
    },

    /// The system bus could not be reached.
    #[error("backend unavailable ({backend}): {detail}")]
    BackendUnavailable {
        backend: &'static str,
        detail: String,
    },

    /// Raw D-Bus error that did not match a more specific classification.
    #[error("dbus error {name}: {message}")]
    DbusError { name: String, message: String },

    /// Generic I/O or transport error with context.
    #[error("io error: {context}")]
    IoError { context: String },

    /// No task handle is registered under this identifier.
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },

    /// The driver does not implement this operation.
    #[error("{operation} not supported")]
    Unsupported { operation: &'static str },

    /// A wait was canceled by the caller or by driver shutdown.
    #[error("canceled: {reason}")]
    Canceled { reason: &'static str },
}

impl Error {
    pub(crate) fn invalid_input(context: impl Into<String>) -> Self {
        Self::InvalidInput {
            context: context.into(),
        }
    }

    pub(crate) fn task_not_found(task_id: impl Into<String>) -> Self {
        Self::TaskNotFound {
            task_id: task_id.into(),
        }
    }

    /// Returns true for the distinct not-found condition of Wait/Stop/Inspect.
    pub fn is_task_not_found(&self) -> bool {
        matches!(self, Self::TaskNotFound { .. })
    }

    /// Returns true when the error came from the D-Bus transport or systemd.
    pub fn is_dbus(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. }
                | Self::UnitNotFound { .. }
                | Self::Timeout { .. }
                | Self::BackendUnavailable { .. }
                | Self::DbusError { .. }
                | Self::IoError { .. }
        )
    }
}
