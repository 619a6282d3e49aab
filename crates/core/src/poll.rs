use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::CountingClient;
use crate::job::JobStatus;
use crate::session::SessionShared;
use crate::view::{self, JobView};

/// Everything one poller task needs: the shared view it writes into, the
/// client it fetches with, and the identity it is pinned to.
pub(crate) struct PollContext {
    pub(crate) shared: Arc<SessionShared>,
    pub(crate) client: Arc<CountingClient>,
    pub(crate) job_id: String,
    pub(crate) interval: Duration,
    pub(crate) cancel: CancellationToken,
}

impl PollContext {
    fn with_cancel(&self, cancel: CancellationToken) -> PollContext {
        PollContext {
            shared: Arc::clone(&self.shared),
            client: Arc::clone(&self.client),
            job_id: self.job_id.clone(),
            interval: self.interval,
            cancel,
        }
    }
}

pub(crate) fn spawn_status_poller(ctx: PollContext) -> JoinHandle<()> {
    tokio::spawn(status_poll_loop(ctx))
}

/// Status polling loop for one job.
///
/// Ticks immediately on attach and then on the configured interval.
/// `MissedTickBehavior::Delay` reschedules relative to fetch completion
/// when a fetch overruns the interval, so at most one status request is
/// ever in flight. Fetch failures are logged and retried on the next
/// tick; only a terminal status, cancellation, or a stale-guard miss ends
/// the loop. The result poller is spawned as a child the first time
/// `processing` is observed and cancelled as soon as the status moves
/// elsewhere.
async fn status_poll_loop(ctx: PollContext) {
    let mut ticker = tokio::time::interval(ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut result_cancel: Option<CancellationToken> = None;

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Discard the in-flight response if the job is torn down mid-fetch.
        let fetched = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            result = ctx.client.job_status(&ctx.job_id) => result,
        };

        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(
                    job_id = %ctx.job_id,
                    error = %error,
                    "status poll failed; retrying on next tick"
                );
                continue;
            }
        };

        let status = snapshot.status;
        if !apply_if_current(&ctx, |view| view::apply_status(view, snapshot)) {
            break;
        }

        if status.is_terminal() {
            debug!(job_id = %ctx.job_id, %status, "job reached terminal status; polling stopped");
            break;
        }

        if status == JobStatus::Processing {
            let needs_spawn = match &result_cancel {
                Some(token) => token.is_cancelled(),
                None => true,
            };
            if needs_spawn {
                let child = ctx.cancel.child_token();
                tokio::spawn(result_poll_loop(ctx.with_cancel(child.clone())));
                result_cancel = Some(child);
            }
        } else if let Some(token) = result_cancel.take() {
            token.cancel();
        }
    }

    if let Some(token) = result_cancel {
        token.cancel();
    }
}

/// Result polling loop, alive only while the job is `processing`.
///
/// Each tick re-checks the shared status first and exits on its own as
/// soon as the job is no longer processing, independent of the status
/// poller's cancellation. Every successful fetch replaces the history
/// wholesale.
async fn result_poll_loop(ctx: PollContext) {
    let mut ticker = tokio::time::interval(ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let still_processing = ctx.shared.read(|view| {
            view.job_id() == Some(ctx.job_id.as_str())
                && view.status == Some(JobStatus::Processing)
        });
        if !still_processing {
            debug!(job_id = %ctx.job_id, "job left processing; result polling stopped");
            break;
        }

        let fetched = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            result = ctx.client.result_history(&ctx.job_id) => result,
        };

        match fetched {
            Ok(history) => {
                if !apply_if_current(&ctx, |view| view::apply_history(view, history)) {
                    break;
                }
            }
            Err(error) => {
                warn!(
                    job_id = %ctx.job_id,
                    error = %error,
                    "result poll failed; retrying on next tick"
                );
            }
        }
    }
}

/// Stale-response guard: a fetched payload only mutates the view while
/// this task is uncancelled and the session still points at the same job.
fn apply_if_current(ctx: &PollContext, apply: impl FnOnce(&mut JobView)) -> bool {
    if ctx.cancel.is_cancelled() {
        return false;
    }
    ctx.shared.try_update(|view| {
        if view.job_id() != Some(ctx.job_id.as_str()) {
            return false;
        }
        apply(view);
        true
    })
}
