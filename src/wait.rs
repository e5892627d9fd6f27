use crate::bus::StatusSnapshot;
use crate::{ActiveState, Error, Result};

use futures_util::{FutureExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// How a wait loop ended.
#[derive(Debug)]
pub(crate) enum WaitOutcome {
    /// The unit reached `inactive` or `failed`.
    Exited(ActiveState),
    /// The caller canceled the wait.
    Canceled,
    /// The driver is shutting down.
    Shutdown,
    StreamError(Error),
    /// The state stream ended without a terminal state (connection closed).
    StreamEnded,
}

/// Consume snapshots until the unit reaches a terminal state or a token fires.
///
/// Tokens are checked before every snapshot, so once either fires no further snapshot is
/// consumed. Snapshots that lack `unit`, non-terminal states, and terminal states with a job
/// still queued for the unit are skipped.
pub(crate) async fn consume_states<S>(
    unit: &str,
    states: S,
    cancel: &CancellationToken,
    shutdown: &CancellationToken,
) -> WaitOutcome
where
    S: Stream<Item = Result<StatusSnapshot>> + Unpin,
{
    let mut states = states.fuse();
    let canceled = cancel.cancelled().fuse();
    let stopping = shutdown.cancelled().fuse();
    let mut canceled = std::pin::pin!(canceled);
    let mut stopping = std::pin::pin!(stopping);

    loop {
        futures_util::select_biased! {
            _ = canceled => return WaitOutcome::Canceled,
            _ = stopping => return WaitOutcome::Shutdown,
            item = states.next() => {
                let snapshot = match item {
                    Some(Ok(snapshot)) => snapshot,
                    Some(Err(e)) => return WaitOutcome::StreamError(e),
                    None => return WaitOutcome::StreamEnded,
                };

                let Some(status) = snapshot.get(unit) else {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%unit, "snapshot without unit; ignoring");
                    continue;
                };

                #[cfg(feature = "tracing")]
                tracing::trace!(
                    %unit,
                    active_state = ?status.active_state,
                    job_id = status.job_id,
                    "unit state"
                );

                if status.is_settled() {
                    return WaitOutcome::Exited(status.active_state.clone());
                }
            }
        }
    }
}
