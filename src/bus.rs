use crate::{Error, Result, UnitStatus};

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::OnceCell;

use zbus::zvariant::{OwnedObjectPath, OwnedValue};

pub(crate) const SYSTEMD_DESTINATION: &str = "org.freedesktop.systemd1";
pub(crate) const SYSTEMD_MANAGER_PATH: &str = "/org/freedesktop/systemd1";
pub(crate) const SYSTEMD_MANAGER_INTERFACE: &str = "org.freedesktop.systemd1.Manager";
pub(crate) const SYSTEMD_UNIT_INTERFACE: &str = "org.freedesktop.systemd1.Unit";
const SYSTEMD_SERVICE_INTERFACE: &str = "org.freedesktop.systemd1.Service";

pub(crate) const DBUS_PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Job mode for `StartUnit`/`StopUnit`: supersede conflicting queued jobs for the unit.
const REPLACE_MODE: &str = "replace";

pub(crate) type ListUnitItem = (
    String,
    String,
    String,
    String,
    String,
    String,
    OwnedObjectPath,
    u32,
    String,
    OwnedObjectPath,
);

/// `{unit name -> status}` as seen by one point query.
pub(crate) type StatusSnapshot = HashMap<String, UnitStatus>;

/// Live, lazily produced sequence of status snapshots for one unit.
///
/// Ends when the connection drops; errors are delivered in-band.
pub(crate) type StateStream = BoxStream<'static, Result<StatusSnapshot>>;

/// Shared systemd connection, established on first use.
///
/// Concurrent first callers wait on the same initialization. A failed initialization is
/// returned to its callers and retried by the next call; once established the connection is
/// never replaced.
#[derive(Debug)]
pub(crate) struct Gateway {
    cell: OnceCell<Bus>,
    dbus_call_timeout: Duration,
    signal_buffer: usize,
}

impl Gateway {
    pub(crate) fn new(dbus_call_timeout: Duration, signal_buffer: usize) -> Self {
        Self {
            cell: OnceCell::new(),
            dbus_call_timeout,
            signal_buffer,
        }
    }

    pub(crate) async fn bus(&self) -> Result<&Bus> {
        self.cell
            .get_or_try_init(|| Bus::connect_system(self.dbus_call_timeout, self.signal_buffer))
            .await
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.cell.initialized()
    }

    pub(crate) async fn start_unit(&self, unit: &str) -> Result<()> {
        self.bus().await?.start_unit(unit, REPLACE_MODE).await?;
        Ok(())
    }

    pub(crate) async fn stop_unit(&self, unit: &str) -> Result<()> {
        self.bus().await?.stop_unit(unit, REPLACE_MODE).await?;
        Ok(())
    }

    pub(crate) async fn daemon_reload(&self) -> Result<()> {
        self.bus().await?.daemon_reload().await
    }

    pub(crate) async fn list_unit_status(&self, units: &[&str]) -> Result<Vec<UnitStatus>> {
        self.bus().await?.list_unit_status(units).await
    }

    pub(crate) async fn exec_main_status(&self, unit: &str) -> Result<(Option<i32>, Option<i32>)> {
        self.bus().await?.exec_main_status(unit).await
    }

    pub(crate) async fn subscribe(&self, unit: &str) -> Result<StateStream> {
        self.bus().await?.subscribe(unit).await
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Bus {
    conn: zbus::Connection,
    dbus_call_timeout: Duration,
    signal_buffer: usize,
}

impl Bus {
    async fn connect_system(dbus_call_timeout: Duration, signal_buffer: usize) -> Result<Self> {
        let conn = zbus::connection::Builder::system()
            .map_err(|e| Error::BackendUnavailable {
                backend: "system_bus",
                detail: e.to_string(),
            })?
            .method_timeout(dbus_call_timeout)
            .build()
            .await
            .map_err(|e| Error::BackendUnavailable {
                backend: "system_bus",
                detail: e.to_string(),
            })?;

        let bus = Self {
            conn,
            dbus_call_timeout,
            signal_buffer,
        };

        // systemd only emits unit signals to subscribed clients.
        if let Err(_e) = bus.manager_subscribe().await {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_e, "systemd Subscribe failed; unit state changes may be missed");
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(?dbus_call_timeout, "connected to system bus");

        Ok(bus)
    }

    async fn manager_proxy(&self) -> Result<zbus::Proxy<'_>> {
        zbus::Proxy::new(
            &self.conn,
            SYSTEMD_DESTINATION,
            SYSTEMD_MANAGER_PATH,
            SYSTEMD_MANAGER_INTERFACE,
        )
        .await
        .map_err(map_zbus_error)
    }

    async fn manager_subscribe(&self) -> Result<()> {
        let proxy = self.manager_proxy().await?;
        proxy
            .call::<_, _, ()>("Subscribe", &())
            .await
            .map_err(|e| map_zbus_method_error("subscribe", self.dbus_call_timeout, e, None))
    }

    pub(crate) async fn load_unit(&self, unit: &str) -> Result<OwnedObjectPath> {
        let proxy = self.manager_proxy().await?;
        proxy
            .call("LoadUnit", &(unit))
            .await
            .map_err(|e| map_zbus_method_error("load_unit", self.dbus_call_timeout, e, Some(unit)))
    }

    pub(crate) async fn start_unit(&self, unit: &str, mode: &str) -> Result<OwnedObjectPath> {
        let proxy = self.manager_proxy().await?;
        proxy
            .call("StartUnit", &(unit, mode))
            .await
            .map_err(|e| map_zbus_method_error("start_unit", self.dbus_call_timeout, e, Some(unit)))
    }

    pub(crate) async fn stop_unit(&self, unit: &str, mode: &str) -> Result<OwnedObjectPath> {
        let proxy = self.manager_proxy().await?;
        proxy
            .call("StopUnit", &(unit, mode))
            .await
            .map_err(|e| map_zbus_method_error("stop_unit", self.dbus_call_timeout, e, Some(unit)))
    }

    pub(crate) async fn daemon_reload(&self) -> Result<()> {
        let proxy = self.manager_proxy().await?;
        proxy
            .call::<_, _, ()>("Reload", &())
            .await
            .map_err(|e| map_zbus_method_error("daemon_reload", self.dbus_call_timeout, e, None))
    }

    pub(crate) async fn list_unit_status(&self, units: &[&str]) -> Result<Vec<UnitStatus>> {
        let proxy = self.manager_proxy().await?;
        let items: Vec<ListUnitItem> = proxy
            .call("ListUnitsByNames", &(units))
            .await
            .map_err(|e| {
                map_zbus_method_error("list_units_by_names", self.dbus_call_timeout, e, None)
            })?;
        Ok(items.into_iter().map(UnitStatus::from_dbus).collect())
    }

    async fn get_all_properties(
        &self,
        object_path: &str,
        interface: &str,
    ) -> Result<HashMap<String, OwnedValue>> {
        let proxy = zbus::Proxy::new(
            &self.conn,
            SYSTEMD_DESTINATION,
            object_path,
            DBUS_PROPERTIES_INTERFACE,
        )
        .await
        .map_err(map_zbus_error)?;

        proxy.call("GetAll", &(interface)).await.map_err(|e| {
            map_zbus_method_error("get_all_properties", self.dbus_call_timeout, e, None)
        })
    }

    /// `(ExecMainCode, ExecMainStatus)` of a service unit.
    pub(crate) async fn exec_main_status(&self, unit: &str) -> Result<(Option<i32>, Option<i32>)> {
        let unit_path = self.load_unit(unit).await?;
        let props = self
            .get_all_properties(unit_path.as_str(), SYSTEMD_SERVICE_INTERFACE)
            .await?;
        Ok((
            get_i32(&props, "ExecMainCode"),
            get_i32(&props, "ExecMainStatus"),
        ))
    }

    /// Open a state stream for `unit`.
    ///
    /// The match rule is installed before the first point query, so a transition that happens
    /// in between is still observed through the follow-up signal.
    pub(crate) async fn subscribe(&self, unit: &str) -> Result<StateStream> {
        let unit_path = self.load_unit(unit).await?;

        let builder = zbus::MatchRule::builder().msg_type(zbus::message::Type::Signal);
        let builder = builder
            .sender(SYSTEMD_DESTINATION)
            .map_err(map_match_rule_error)?;
        let builder = builder
            .interface(DBUS_PROPERTIES_INTERFACE)
            .map_err(map_match_rule_error)?;
        let builder = builder
            .member("PropertiesChanged")
            .map_err(map_match_rule_error)?;
        let builder = builder
            .path(unit_path.as_str())
            .map_err(map_match_rule_error)?;
        let builder = builder
            .add_arg(SYSTEMD_UNIT_INTERFACE)
            .map_err(map_match_rule_error)?;
        let rule = builder.build();

        let messages =
            zbus::MessageStream::for_match_rule(rule, &self.conn, Some(self.signal_buffer))
                .await
                .map_err(|e| Error::IoError {
                    context: format!("subscribe to {unit} failed: {e}"),
                })?;

        let state = SubscriptionState {
            bus: self.clone(),
            unit: unit.to_string(),
            messages,
            primed: false,
        };

        Ok(futures_util::stream::unfold(state, next_snapshot).boxed())
    }
}

struct SubscriptionState {
    bus: Bus,
    unit: String,
    messages: zbus::MessageStream,
    primed: bool,
}

async fn next_snapshot(
    mut st: SubscriptionState,
) -> Option<(Result<StatusSnapshot>, SubscriptionState)> {
    if !st.primed {
        st.primed = true;
        let snapshot = st.snapshot().await;
        return Some((snapshot, st));
    }

    loop {
        let msg = st.messages.next().await?;
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                let err = Error::IoError {
                    context: format!("subscription error: {e}"),
                };
                return Some((Err(err), st));
            }
        };

        match wait_state_changed(&msg) {
            Ok(true) => {
                let snapshot = st.snapshot().await;
                return Some((snapshot, st));
            }
            Ok(false) => continue,
            Err(e) => return Some((Err(e), st)),
        }
    }
}

impl SubscriptionState {
    async fn snapshot(&self) -> Result<StatusSnapshot> {
        let statuses = self.bus.list_unit_status(&[self.unit.as_str()]).await?;
        Ok(statuses
            .into_iter()
            .map(|status| (status.name.clone(), status))
            .collect())
    }
}

fn wait_state_changed(msg: &zbus::Message) -> Result<bool> {
    let body = msg.body();
    let decoded: std::result::Result<(String, HashMap<String, OwnedValue>, Vec<String>), _> =
        body.deserialize();

    let (iface, changed, invalidated) = decoded.map_err(|e| Error::DbusError {
        name: "SignalDecode".to_string(),
        message: e.to_string(),
    })?;

    Ok(properties_touch_wait_state(
        &iface,
        changed.keys().map(String::as_str),
        &invalidated,
    ))
}

/// Properties a wait decides on: the active state, and the queued job that can move it.
const WAIT_PROPERTIES: [&str; 2] = ["ActiveState", "Job"];

fn properties_touch_wait_state<'a>(
    iface: &str,
    mut changed: impl Iterator<Item = &'a str>,
    invalidated: &[String],
) -> bool {
    iface == SYSTEMD_UNIT_INTERFACE
        && (changed.any(|p| WAIT_PROPERTIES.contains(&p))
            || invalidated
                .iter()
                .any(|p| WAIT_PROPERTIES.contains(&p.as_str())))
}

fn get_i32(map: &HashMap<String, OwnedValue>, key: &str) -> Option<i32> {
    map.get(key).and_then(|v| i32::try_from(v).ok())
}

fn map_match_rule_error(e: zbus::Error) -> Error {
    Error::IoError {
        context: format!("subscription match rule error: {e}"),
    }
}

fn map_zbus_method_error(
    action: &'static str,
    timeout: Duration,
    err: zbus::Error,
    unit: Option<&str>,
) -> Error {
    match &err {
        zbus::Error::MethodError(name, detail, _reply) => {
            let name = name.to_string();
            let message = detail.clone().unwrap_or_default();

            if (name.contains("NoSuchUnit") || name.contains("UnknownUnit"))
                && let Some(unit) = unit
            {
                return Error::UnitNotFound {
                    unit: unit.to_string(),
                };
            }

            if name.contains("AccessDenied")
                || name.contains("PermissionDenied")
                || name.contains("PolicyKit")
            {
                return Error::PermissionDenied {
                    action,
                    detail: format!("{name}: {message}"),
                };
            }

            Error::DbusError { name, message }
        }
        zbus::Error::InputOutput(e) if e.kind() == std::io::ErrorKind::TimedOut => {
            Error::Timeout { action, timeout }
        }
        _ => map_zbus_error(err),
    }
}

fn map_zbus_error(err: zbus::Error) -> Error {
    match err {
        zbus::Error::MethodError(name, detail, _reply) => Error::DbusError {
            name: name.to_string(),
            message: detail.unwrap_or_default(),
        },
        zbus::Error::InputOutput(e) => Error::IoError {
            context: format!("dbus io error: {e}"),
        },
        other => Error::IoError {
            context: format!("dbus error: {other}"),
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::Arc;

    fn dummy_msg() -> zbus::Message {
        zbus::Message::method_call("/org/freedesktop/systemd1", "Dummy")
            .expect("builder")
            .build(&())
            .expect("msg")
    }

    #[test]
    fn maps_no_such_unit_to_unit_not_found() {
        let name = zbus::names::OwnedErrorName::try_from("org.freedesktop.systemd1.NoSuchUnit")
            .expect("name");
        let err = zbus::Error::MethodError(name, Some("missing".to_string()), dummy_msg());

        let mapped = map_zbus_method_error(
            "start_unit",
            Duration::from_secs(5),
            err,
            Some("webserver@1.service"),
        );

        let Error::UnitNotFound { unit } = mapped else {
            panic!("unexpected error: {mapped:?}");
        };
        assert_eq!(unit, "webserver@1.service");
    }

    #[test]
    fn maps_access_denied_to_permission_denied() {
        let name = zbus::names::OwnedErrorName::try_from("org.freedesktop.DBus.Error.AccessDenied")
            .expect("name");
        let err = zbus::Error::MethodError(name, Some("no".to_string()), dummy_msg());

        let mapped =
            map_zbus_method_error("stop_unit", Duration::from_secs(5), err, Some("web.service"));

        let Error::PermissionDenied { action, .. } = mapped else {
            panic!("unexpected error: {mapped:?}");
        };
        assert_eq!(action, "stop_unit");
    }

    #[test]
    fn maps_io_timeout_to_timeout_variant() {
        let err = zbus::Error::InputOutput(Arc::new(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "timeout",
        )));

        let mapped = map_zbus_method_error("list_units_by_names", Duration::from_secs(7), err, None);

        let Error::Timeout { action, timeout } = mapped else {
            panic!("unexpected error: {mapped:?}");
        };
        assert_eq!(action, "list_units_by_names");
        assert_eq!(timeout, Duration::from_secs(7));
    }

    #[test]
    fn only_unit_interface_state_and_job_changes_count() {
        let none: [&str; 0] = [];
        assert!(properties_touch_wait_state(
            SYSTEMD_UNIT_INTERFACE,
            ["SubState", "ActiveState"].into_iter(),
            &[]
        ));
        assert!(properties_touch_wait_state(
            SYSTEMD_UNIT_INTERFACE,
            ["Job"].into_iter(),
            &[]
        ));
        assert!(properties_touch_wait_state(
            SYSTEMD_UNIT_INTERFACE,
            none.into_iter(),
            &["ActiveState".to_string()]
        ));
        assert!(!properties_touch_wait_state(
            SYSTEMD_UNIT_INTERFACE,
            ["SubState"].into_iter(),
            &["SubState".to_string()]
        ));
        assert!(!properties_touch_wait_state(
            SYSTEMD_SERVICE_INTERFACE,
            ["ActiveState"].into_iter(),
            &[]
        ));
    }

    #[test]
    fn gateway_does_not_connect_until_used() {
        let gateway = Gateway::new(Duration::from_secs(1), 4);
        assert!(!gateway.is_connected());
    }
}
