use std::path::Path;
use std::time::Duration;

use reqwest::multipart;
use serde::Deserialize;
use url::Url;

use crate::job::{DataError, JobStatus, Observation};
use crate::params::ParameterSet;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Video uploads can be large; give the submission call generous room.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the remote people-counting service.
///
/// Holds the configured base URL; the service contract is
/// `POST /api/start-counting`, `GET /api/status/{job_id}` and
/// `GET /api/csv-data/{job_id}`.
#[derive(Debug)]
pub struct CountingClient {
    base_url: Url,
    client: reqwest::Client,
    poll_timeout: Duration,
}

/// Failures talking to the counting service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid counting service URL: {0}")]
    InvalidUrl(String),

    #[error("failed to read video file {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Transport-level failure (connect, timeout, interrupted body).
    #[error("request to counting service failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a non-2xx status; `detail` is the
    /// server-provided message, verbatim when one was parseable.
    #[error("counting service returned HTTP {status}: {detail}")]
    Rejected { status: u16, detail: String },

    /// The body did not match the declared contract.
    #[error("malformed response from counting service: {0}")]
    Malformed(String),
}

impl From<DataError> for ApiError {
    fn from(err: DataError) -> Self {
        ApiError::Malformed(err.to_string())
    }
}

/// Successful `POST /api/start-counting` body.
#[derive(Debug, Clone, Deserialize)]
pub struct StartCountingResponse {
    pub job_id: String,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Raw `GET /api/status/{job_id}` body.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusPayload {
    pub status: String,
    #[serde(default)]
    pub latest_data: Option<ObservationRow>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// One result row as the service reports it: counts are decimal strings
/// straight out of the CSV backing store.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservationRow {
    pub timestamp: String,
    pub total_present_inside: String,
    pub incoming_last_interval: String,
    pub outgoing_last_interval: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CsvDataPayload {
    #[serde(default)]
    data: Vec<ObservationRow>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorBody {
    detail: String,
}

/// Typed view of a status response after strict parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub status: JobStatus,
    pub latest: Option<Observation>,
    pub error_message: Option<String>,
}

impl ObservationRow {
    pub fn parse(&self) -> Result<Observation, DataError> {
        Observation::from_wire(
            &self.timestamp,
            &self.total_present_inside,
            &self.incoming_last_interval,
            &self.outgoing_last_interval,
        )
    }
}

impl TryFrom<StatusPayload> for StatusSnapshot {
    type Error = DataError;

    fn try_from(payload: StatusPayload) -> Result<Self, Self::Error> {
        let status: JobStatus = payload.status.parse()?;
        let latest = payload.latest_data.map(|row| row.parse()).transpose()?;
        Ok(StatusSnapshot {
            status,
            latest,
            error_message: payload.error_message,
        })
    }
}

impl CountingClient {
    /// Create a client for the service at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url,
            client,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        })
    }

    /// Bound each status/history request; a hung fetch must not outlive
    /// the tick that issued it by more than this.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(format!("{path}: {e}")))
    }

    /// `POST /api/start-counting` — upload a video and start a job.
    ///
    /// Exactly one request per invocation; no automatic retries.
    pub async fn start_counting(
        &self,
        video_path: &Path,
        params: &ParameterSet,
    ) -> Result<StartCountingResponse, ApiError> {
        let url = self.url("/api/start-counting")?;

        let bytes = tokio::fs::read(video_path)
            .await
            .map_err(|source| ApiError::FileRead {
                path: video_path.display().to_string(),
                source,
            })?;
        let file_name = video_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mime = mime_guess::from_path(video_path).first_or_octet_stream();

        let video_part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime.essence_str())?;
        let form = multipart::Form::new()
            .part("video", video_part)
            .text("door_direction", params.door_direction.as_str())
            .text("confidence", params.confidence.to_string())
            .text("skip_frames", params.skip_frames.to_string())
            .text("interval", params.poll_interval_secs.to_string())
            .text("crop", params.crop.to_string())
            .text("show_preview", params.show_preview.to_string());

        let resp = self
            .client
            .post(url)
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(rejection(status.as_u16(), &body));
        }

        serde_json::from_slice(&body)
            .map_err(|e| ApiError::Malformed(format!("start-counting response: {e}")))
    }

    /// `GET /api/status/{job_id}` — current status plus the service's own
    /// latest snapshot when it has one.
    pub async fn job_status(&self, job_id: &str) -> Result<StatusSnapshot, ApiError> {
        let url = self.url(&format!("/api/status/{job_id}"))?;
        let resp = self
            .client
            .get(url)
            .timeout(self.poll_timeout)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(rejection(status.as_u16(), &body));
        }

        let payload: StatusPayload = serde_json::from_slice(&body)
            .map_err(|e| ApiError::Malformed(format!("status response: {e}")))?;
        Ok(payload.try_into()?)
    }

    /// `GET /api/csv-data/{job_id}` — the full result history, oldest
    /// first; the tail is the most recent snapshot.
    pub async fn result_history(&self, job_id: &str) -> Result<Vec<Observation>, ApiError> {
        let url = self.url(&format!("/api/csv-data/{job_id}"))?;
        let resp = self
            .client
            .get(url)
            .timeout(self.poll_timeout)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(rejection(status.as_u16(), &body));
        }

        let payload: CsvDataPayload = serde_json::from_slice(&body)
            .map_err(|e| ApiError::Malformed(format!("csv-data response: {e}")))?;
        payload
            .data
            .iter()
            .map(|row| row.parse().map_err(ApiError::from))
            .collect()
    }
}

/// Map a non-2xx response to [`ApiError::Rejected`], preferring the
/// service's own `detail` text when the body carries one.
fn rejection(status: u16, body: &[u8]) -> ApiError {
    let detail = match serde_json::from_slice::<ErrorBody>(body) {
        Ok(parsed) => parsed.detail,
        Err(_) => {
            let text = String::from_utf8_lossy(body);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                "no error detail provided".to_string()
            } else {
                trimmed.to_string()
            }
        }
    };
    ApiError::Rejected { status, detail }
}
