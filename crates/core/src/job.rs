use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state reported by the counting service.
///
/// Transitions are monotonic in practice (queued → processing →
/// completed/failed) but the client stores whatever the service last
/// reported rather than assuming ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Completed and failed jobs never transition again; polling stops.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DataError::UnknownStatus(other.to_string())),
        }
    }
}

/// Identity of one server-side analysis run, minted by a successful
/// submission and discarded on reset. The id is opaque to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
    pub initial_status: JobStatus,
    pub submitted_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>, initial_status: JobStatus) -> Self {
        Self {
            job_id: job_id.into(),
            initial_status,
            submitted_at: Utc::now(),
        }
    }
}

/// One timestamped occupancy snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: String,
    pub total_present_inside: u64,
    pub incoming_last_interval: u64,
    pub outgoing_last_interval: u64,
}

impl Observation {
    /// Build an observation from the service's string-valued count fields.
    ///
    /// The CSV-backed endpoints report counts as decimal strings; anything
    /// that does not parse as a non-negative integer rejects the whole row.
    pub fn from_wire(
        timestamp: &str,
        total_present_inside: &str,
        incoming_last_interval: &str,
        outgoing_last_interval: &str,
    ) -> Result<Self, DataError> {
        Ok(Self {
            timestamp: timestamp.to_string(),
            total_present_inside: parse_count("total_present_inside", total_present_inside)?,
            incoming_last_interval: parse_count("incoming_last_interval", incoming_last_interval)?,
            outgoing_last_interval: parse_count("outgoing_last_interval", outgoing_last_interval)?,
        })
    }
}

fn parse_count(field: &'static str, value: &str) -> Result<u64, DataError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| DataError::InvalidCount {
            field,
            value: value.to_string(),
        })
}

/// Malformed payload content from the counting service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataError {
    #[error("unrecognized job status {0:?}")]
    UnknownStatus(String),
    #[error("invalid count for {field}: {value:?}")]
    InvalidCount { field: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_strings_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_a_parse_error() {
        let err = "exploded".parse::<JobStatus>().unwrap_err();
        assert_eq!(err, DataError::UnknownStatus("exploded".to_string()));
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn status_serde_uses_snake_case() {
        let json = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        let back: JobStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(back, JobStatus::Failed);
    }

    #[test]
    fn observation_parses_numeric_strings() {
        let obs = Observation::from_wire("00:02", "7", "3", "1").unwrap();
        assert_eq!(
            obs,
            Observation {
                timestamp: "00:02".to_string(),
                total_present_inside: 7,
                incoming_last_interval: 3,
                outgoing_last_interval: 1,
            }
        );
    }

    #[test]
    fn observation_tolerates_surrounding_whitespace() {
        let obs = Observation::from_wire("00:01", " 5", "5 ", " 0 ").unwrap();
        assert_eq!(obs.total_present_inside, 5);
        assert_eq!(obs.outgoing_last_interval, 0);
    }

    #[test]
    fn observation_rejects_non_numeric_counts() {
        let err = Observation::from_wire("00:01", "five", "5", "0").unwrap_err();
        assert_eq!(
            err,
            DataError::InvalidCount {
                field: "total_present_inside",
                value: "five".to_string(),
            }
        );
    }

    #[test]
    fn observation_rejects_negative_counts() {
        assert!(Observation::from_wire("00:01", "5", "-2", "0").is_err());
    }

    #[test]
    fn handle_records_submission_time() {
        let before = Utc::now();
        let handle = JobHandle::new("abc", JobStatus::Queued);
        assert_eq!(handle.job_id, "abc");
        assert_eq!(handle.initial_status, JobStatus::Queued);
        assert!(handle.submitted_at >= before);
    }
}
