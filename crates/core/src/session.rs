use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::{ApiError, CountingClient};
use crate::job::{JobHandle, JobStatus};
use crate::params::{ParameterError, ParameterSet};
use crate::poll::{self, PollContext};
use crate::view::{self, JobView};

/// Why a submission attempt did not produce a job.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("no video file selected")]
    NoFileSelected,

    #[error("selected file is not a video: {path} (detected {media_type})")]
    NotAVideo { path: PathBuf, media_type: String },

    /// A previous submission has not finished; re-submission is disabled
    /// until it resolves.
    #[error("a submission is already in flight")]
    AlreadyInFlight,

    #[error(transparent)]
    InvalidParameters(#[from] ParameterError),

    /// The service refused the job; `detail` is its message, verbatim.
    #[error("counting service rejected the submission: {detail}")]
    Rejected { detail: String },

    #[error(transparent)]
    Api(ApiError),
}

impl SubmitError {
    fn from_api(err: ApiError) -> Self {
        match err {
            ApiError::Rejected { detail, .. } => SubmitError::Rejected { detail },
            other => SubmitError::Api(other),
        }
    }
}

/// Shared mutable state behind the session: the view itself plus a watch
/// channel that republishes every change to subscribers.
pub(crate) struct SessionShared {
    view: Mutex<JobView>,
    tx: watch::Sender<JobView>,
}

impl SessionShared {
    fn new(view: JobView) -> Self {
        let (tx, _rx) = watch::channel(view.clone());
        Self {
            view: Mutex::new(view),
            tx,
        }
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&JobView) -> R) -> R {
        f(&self.view.lock().expect("job view mutex poisoned"))
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut JobView) -> R) -> R {
        let mut view = self.view.lock().expect("job view mutex poisoned");
        let result = f(&mut view);
        self.tx.send_replace(view.clone());
        result
    }

    /// Apply `f`; publish only when it reports a change.
    pub(crate) fn try_update(&self, f: impl FnOnce(&mut JobView) -> bool) -> bool {
        let mut view = self.view.lock().expect("job view mutex poisoned");
        if f(&mut view) {
            self.tx.send_replace(view.clone());
            true
        } else {
            false
        }
    }
}

/// Client-side owner of one counting job's lifecycle: file selection,
/// submission, both polling loops, and reset.
///
/// All state lives in a single [`JobView`] behind a mutex; the poller
/// tasks and the submit/reset handlers are its only writers. Observers
/// take snapshots via [`view`](Self::view) or follow every change via
/// [`subscribe`](Self::subscribe).
pub struct CountingSession {
    client: Arc<CountingClient>,
    shared: Arc<SessionShared>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl CountingSession {
    pub fn new(client: CountingClient, parameters: ParameterSet) -> Self {
        let view = JobView {
            parameters,
            ..Default::default()
        };
        Self {
            client: Arc::new(client),
            shared: Arc::new(SessionShared::new(view)),
            cancel: Mutex::new(None),
        }
    }

    /// Snapshot of the current state.
    pub fn view(&self) -> JobView {
        self.shared.read(JobView::clone)
    }

    /// Follow every state change; the receiver always holds the newest
    /// [`JobView`].
    pub fn subscribe(&self) -> watch::Receiver<JobView> {
        self.shared.tx.subscribe()
    }

    pub fn select_file(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.shared.update(|view| view.selected_file = Some(path));
    }

    /// Edit the form parameters. Only affects the next submission; the
    /// copy frozen into an already-submitted job is untouched.
    pub fn set_parameters(&self, parameters: ParameterSet) {
        self.shared.update(|view| view.parameters = parameters);
    }

    /// Submit the selected video with the current parameters.
    ///
    /// Validates locally first (file selected, declared media type is a
    /// video, parameter ranges) without touching the network, refuses to
    /// run while another submission is outstanding, and performs exactly
    /// one remote call. On success the returned handle is attached and
    /// polling begins immediately.
    pub async fn submit(&self) -> Result<JobHandle, SubmitError> {
        let (path, params) = self.begin_submission()?;

        let response = match self.client.start_counting(&path, &params).await {
            Ok(response) => response,
            Err(err) => {
                self.clear_in_flight();
                return Err(SubmitError::from_api(err));
            }
        };

        let initial = match response.status.parse::<JobStatus>() {
            Ok(status) => status,
            Err(err) => {
                self.clear_in_flight();
                return Err(SubmitError::Api(ApiError::Malformed(err.to_string())));
            }
        };

        let handle = JobHandle::new(response.job_id, initial);
        self.clear_in_flight();
        self.attach(handle.clone(), params.poll_interval());
        Ok(handle)
    }

    /// Start both polling loops for `handle`, replacing (and cancelling)
    /// any previously attached job.
    pub fn attach(&self, handle: JobHandle, poll_interval: Duration) {
        let cancel = CancellationToken::new();
        if let Some(previous) = self
            .cancel
            .lock()
            .expect("cancel token mutex poisoned")
            .replace(cancel.clone())
        {
            previous.cancel();
        }

        self.shared.update(|view| {
            view.job = Some(handle.clone());
            view.status = Some(handle.initial_status);
            view.latest = None;
            view.history.clear();
            view.error = None;
        });

        info!(
            job_id = %handle.job_id,
            interval_secs = poll_interval.as_secs(),
            "attached to counting job"
        );

        poll::spawn_status_poller(PollContext {
            shared: Arc::clone(&self.shared),
            client: Arc::clone(&self.client),
            job_id: handle.job_id,
            interval: poll_interval,
            cancel,
        });
    }

    /// Return to the pre-submission state: cancel both pollers, discard
    /// the job handle, clear status, latest observation, history and the
    /// selected file. Parameter edits survive.
    pub fn reset(&self) {
        if let Some(token) = self
            .cancel
            .lock()
            .expect("cancel token mutex poisoned")
            .take()
        {
            token.cancel();
        }
        self.shared.update(view::reset);
    }

    /// Wait until the attached job reaches `completed` or `failed` and
    /// return the final state.
    pub async fn wait_until_terminal(&self) -> JobView {
        let mut rx = self.subscribe();
        loop {
            {
                let current = rx.borrow_and_update();
                if current.is_terminal() {
                    return current.clone();
                }
            }
            if rx.changed().await.is_err() {
                return self.view();
            }
        }
    }

    fn begin_submission(&self) -> Result<(PathBuf, ParameterSet), SubmitError> {
        let mut view = self.shared.view.lock().expect("job view mutex poisoned");

        if view.submission_in_flight {
            return Err(SubmitError::AlreadyInFlight);
        }

        let path = view
            .selected_file
            .clone()
            .ok_or(SubmitError::NoFileSelected)?;

        let media_type = mime_guess::from_path(&path).first();
        let is_video = media_type
            .as_ref()
            .is_some_and(|mime| mime.type_() == mime_guess::mime::VIDEO);
        if !is_video {
            return Err(SubmitError::NotAVideo {
                path,
                media_type: media_type
                    .map(|mime| mime.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            });
        }

        view.parameters.validate()?;

        view.submission_in_flight = true;
        let frozen = view.parameters.clone();
        self.shared.tx.send_replace(view.clone());
        Ok((path, frozen))
    }

    fn clear_in_flight(&self) {
        self.shared.update(|view| view.submission_in_flight = false);
    }
}

impl Drop for CountingSession {
    fn drop(&mut self) {
        if let Some(token) = self
            .cancel
            .lock()
            .expect("cancel token mutex poisoned")
            .take()
        {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::DoorDirection;

    fn session() -> CountingSession {
        // Unroutable port; validation failures must error before any dial.
        let client = CountingClient::new("http://127.0.0.1:9").unwrap();
        CountingSession::new(client, ParameterSet::default())
    }

    #[tokio::test]
    async fn submit_without_file_fails_validation() {
        let session = session();
        let err = session.submit().await.unwrap_err();
        assert!(matches!(err, SubmitError::NoFileSelected), "got: {err:?}");
        assert!(!session.view().submission_in_flight);
    }

    #[tokio::test]
    async fn submit_with_non_video_file_fails_validation() {
        let session = session();
        session.select_file("/tmp/notes.txt");
        let err = session.submit().await.unwrap_err();
        match err {
            SubmitError::NotAVideo { path, .. } => {
                assert_eq!(path, PathBuf::from("/tmp/notes.txt"));
            }
            other => panic!("expected NotAVideo, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn submit_with_unknown_extension_fails_validation() {
        let session = session();
        session.select_file("/tmp/mystery");
        assert!(matches!(
            session.submit().await.unwrap_err(),
            SubmitError::NotAVideo { .. }
        ));
    }

    #[tokio::test]
    async fn submit_with_out_of_range_parameters_fails_before_network() {
        let session = session();
        session.select_file("/tmp/entrance.mp4");
        session.set_parameters(ParameterSet {
            confidence: 2.0,
            ..Default::default()
        });

        let err = session.submit().await.unwrap_err();
        assert!(
            matches!(err, SubmitError::InvalidParameters(_)),
            "got: {err:?}"
        );
        assert!(!session.view().submission_in_flight);
    }

    #[test]
    fn select_file_and_parameters_are_visible_in_snapshots() {
        let session = session();
        session.select_file("/videos/entrance.mp4");
        session.set_parameters(ParameterSet {
            door_direction: DoorDirection::Down,
            ..Default::default()
        });

        let view = session.view();
        assert_eq!(
            view.selected_file,
            Some(PathBuf::from("/videos/entrance.mp4"))
        );
        assert_eq!(view.parameters.door_direction, DoorDirection::Down);
        assert!(view.job.is_none());
    }

    #[test]
    fn subscribers_observe_form_edits() {
        let session = session();
        let rx = session.subscribe();

        session.select_file("/videos/entrance.mp4");

        let seen = rx.borrow();
        assert_eq!(
            seen.selected_file,
            Some(PathBuf::from("/videos/entrance.mp4"))
        );
    }

    #[tokio::test]
    async fn reset_preserves_parameter_edits() {
        let session = session();
        session.set_parameters(ParameterSet {
            confidence: 0.9,
            ..Default::default()
        });
        session.select_file("/videos/entrance.mp4");

        session.reset();

        let view = session.view();
        assert!(view.selected_file.is_none());
        assert!(view.job.is_none());
        assert_eq!(view.parameters.confidence, 0.9);
    }
}
