use std::path::PathBuf;

use crate::api::StatusSnapshot;
use crate::job::{JobHandle, JobStatus, Observation};
use crate::params::ParameterSet;

/// Reconciled client-side state for one counting job.
///
/// Updated only by the submit/reset handlers and the two poller tasks;
/// everything else observes snapshots of it.
#[derive(Debug, Clone, Default)]
pub struct JobView {
    pub selected_file: Option<PathBuf>,
    pub parameters: ParameterSet,
    pub job: Option<JobHandle>,
    pub status: Option<JobStatus>,
    pub latest: Option<Observation>,
    pub history: Vec<Observation>,
    /// Service-reported failure detail, present once a job has failed.
    pub error: Option<String>,
    pub submission_in_flight: bool,
}

impl JobView {
    pub fn job_id(&self) -> Option<&str> {
        self.job.as_ref().map(|job| job.job_id.as_str())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(|status| status.is_terminal())
    }
}

/// Precedence rule for the "latest observation" tile: the history tail is
/// the source of truth whenever the history is non-empty; the snapshot
/// embedded in a status response only fills the gap before the first
/// history fetch lands.
pub fn latest_observation(
    embedded: Option<&Observation>,
    history: &[Observation],
) -> Option<Observation> {
    history.last().or(embedded).cloned()
}

/// Merge a status response into the view.
pub(crate) fn apply_status(view: &mut JobView, snapshot: StatusSnapshot) {
    view.status = Some(snapshot.status);
    if snapshot.error_message.is_some() {
        view.error = snapshot.error_message;
    }
    if let Some(merged) = latest_observation(snapshot.latest.as_ref(), &view.history) {
        view.latest = Some(merged);
    }
}

/// Replace the local history wholesale with the service's current rows.
pub(crate) fn apply_history(view: &mut JobView, history: Vec<Observation>) {
    if let Some(tail) = history.last() {
        view.latest = Some(tail.clone());
    }
    view.history = history;
}

/// Return to the pre-submission state. The operator's parameter edits are
/// kept; everything derived from the submitted job is discarded.
pub(crate) fn reset(view: &mut JobView) {
    view.selected_file = None;
    view.job = None;
    view.status = None;
    view.latest = None;
    view.history.clear();
    view.error = None;
    view.submission_in_flight = false;
}
