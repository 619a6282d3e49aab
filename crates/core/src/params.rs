use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const MIN_CONFIDENCE: f64 = 0.0;
pub const MAX_CONFIDENCE: f64 = 1.0;
pub const MAX_SKIP_FRAMES: u8 = 2;
pub const MIN_POLL_INTERVAL_SECS: u64 = 1;
pub const MAX_POLL_INTERVAL_SECS: u64 = 60;

/// Which edge of the frame the monitored door sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoorDirection {
    Up,
    Down,
    Left,
    Right,
}

impl DoorDirection {
    /// Wire form sent in the `door_direction` multipart field.
    pub fn as_str(&self) -> &'static str {
        match self {
            DoorDirection::Up => "up",
            DoorDirection::Down => "down",
            DoorDirection::Left => "left",
            DoorDirection::Right => "right",
        }
    }
}

impl fmt::Display for DoorDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DoorDirection {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(DoorDirection::Up),
            "down" => Ok(DoorDirection::Down),
            "left" => Ok(DoorDirection::Left),
            "right" => Ok(DoorDirection::Right),
            other => Err(ParameterError::UnknownDoorDirection(other.to_string())),
        }
    }
}

/// Counting parameters submitted with a job.
///
/// Freely editable before submission; `CountingSession::submit` freezes a
/// clone for the lifetime of the job, so later edits only affect the next
/// submission. Also serves as the `[defaults]` section of `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSet {
    pub door_direction: DoorDirection,
    pub confidence: f64,
    pub skip_frames: u8,
    /// Seconds between count snapshots on the service side, reused as the
    /// cadence of both client-side polling loops.
    pub poll_interval_secs: u64,
    pub crop: bool,
    pub show_preview: bool,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            door_direction: DoorDirection::Up,
            confidence: 0.5,
            skip_frames: 0,
            poll_interval_secs: 5,
            crop: false,
            show_preview: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParameterError {
    #[error("confidence must be within [{MIN_CONFIDENCE}, {MAX_CONFIDENCE}], got {0}")]
    ConfidenceOutOfRange(f64),
    #[error("skip_frames must be at most {MAX_SKIP_FRAMES}, got {0}")]
    SkipFramesOutOfRange(u8),
    #[error(
        "poll interval must be within [{MIN_POLL_INTERVAL_SECS}, {MAX_POLL_INTERVAL_SECS}] seconds, got {0}"
    )]
    PollIntervalOutOfRange(u64),
    #[error("unknown door direction: {0:?} (expected up/down/left/right)")]
    UnknownDoorDirection(String),
}

impl ParameterSet {
    /// Enforce the range constraints the counting service expects.
    pub fn validate(&self) -> Result<(), ParameterError> {
        if !(MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&self.confidence) || self.confidence.is_nan()
        {
            return Err(ParameterError::ConfidenceOutOfRange(self.confidence));
        }
        if self.skip_frames > MAX_SKIP_FRAMES {
            return Err(ParameterError::SkipFramesOutOfRange(self.skip_frames));
        }
        if !(MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS).contains(&self.poll_interval_secs) {
            return Err(ParameterError::PollIntervalOutOfRange(self.poll_interval_secs));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let params = ParameterSet::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn confidence_bounds_are_inclusive() {
        let mut params = ParameterSet {
            confidence: 0.0,
            ..Default::default()
        };
        assert!(params.validate().is_ok());

        params.confidence = 1.0;
        assert!(params.validate().is_ok());

        params.confidence = 1.01;
        assert_eq!(
            params.validate(),
            Err(ParameterError::ConfidenceOutOfRange(1.01))
        );

        params.confidence = -0.1;
        assert!(params.validate().is_err());
    }

    #[test]
    fn nan_confidence_is_rejected() {
        let params = ParameterSet {
            confidence: f64::NAN,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn skip_frames_capped_at_two() {
        let mut params = ParameterSet {
            skip_frames: 2,
            ..Default::default()
        };
        assert!(params.validate().is_ok());

        params.skip_frames = 3;
        assert_eq!(params.validate(), Err(ParameterError::SkipFramesOutOfRange(3)));
    }

    #[test]
    fn poll_interval_bounds() {
        let mut params = ParameterSet {
            poll_interval_secs: 1,
            ..Default::default()
        };
        assert!(params.validate().is_ok());

        params.poll_interval_secs = 60;
        assert!(params.validate().is_ok());

        params.poll_interval_secs = 0;
        assert_eq!(
            params.validate(),
            Err(ParameterError::PollIntervalOutOfRange(0))
        );

        params.poll_interval_secs = 61;
        assert!(params.validate().is_err());
    }

    #[test]
    fn door_direction_wire_strings_round_trip() {
        for direction in [
            DoorDirection::Up,
            DoorDirection::Down,
            DoorDirection::Left,
            DoorDirection::Right,
        ] {
            assert_eq!(direction.as_str().parse::<DoorDirection>(), Ok(direction));
        }
    }

    #[test]
    fn unknown_door_direction_is_rejected() {
        let err = "sideways".parse::<DoorDirection>().unwrap_err();
        assert_eq!(
            err,
            ParameterError::UnknownDoorDirection("sideways".to_string())
        );
    }

    #[test]
    fn toml_round_trip_preserves_values() {
        let original = ParameterSet {
            door_direction: DoorDirection::Left,
            confidence: 0.72,
            skip_frames: 1,
            poll_interval_secs: 10,
            crop: true,
            show_preview: false,
        };
        let encoded = toml::to_string(&original).expect("serialize parameters");
        let decoded: ParameterSet = toml::from_str(&encoded).expect("deserialize parameters");
        assert_eq!(decoded, original);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let decoded: ParameterSet =
            toml::from_str("confidence = 0.9\n").expect("deserialize partial parameters");
        assert_eq!(decoded.confidence, 0.9);
        assert_eq!(decoded.door_direction, DoorDirection::Up);
        assert_eq!(decoded.poll_interval_secs, 5);
    }
}
