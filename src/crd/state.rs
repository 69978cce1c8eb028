//! Lifecycle states
//!
//! Composite restore states such as `IN_PROGRESS_BOSH_STOP` are modelled as a
//! stage plus a phase rather than as concatenated strings.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Label value marking a metering event as ready for archival
pub const METERED_STATE: &str = "METERED";

/// Stage of a restore phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseStage {
    /// The restore service is asked to kick off the phase
    Trigger,
    /// The phase's external task is running
    InProgress,
}

impl PhaseStage {
    fn as_str(&self) -> &'static str {
        match self {
            PhaseStage::Trigger => "TRIGGER",
            PhaseStage::InProgress => "IN_PROGRESS",
        }
    }
}

/// Ordered phases of a bosh restore
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RestorePhase {
    BoshStop,
    CreateDisk,
    AttachDisk,
    PutFile,
    BaseBackupErrand,
    PitrErrand,
    BoshStart,
    PostBoshStart,
}

impl RestorePhase {
    /// All phases in execution order
    pub const ALL: [RestorePhase; 8] = [
        RestorePhase::BoshStop,
        RestorePhase::CreateDisk,
        RestorePhase::AttachDisk,
        RestorePhase::PutFile,
        RestorePhase::BaseBackupErrand,
        RestorePhase::PitrErrand,
        RestorePhase::BoshStart,
        RestorePhase::PostBoshStart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RestorePhase::BoshStop => "BOSH_STOP",
            RestorePhase::CreateDisk => "CREATE_DISK",
            RestorePhase::AttachDisk => "ATTACH_DISK",
            RestorePhase::PutFile => "PUT_FILE",
            RestorePhase::BaseBackupErrand => "BASEBACKUP_ERRAND",
            RestorePhase::PitrErrand => "PITR_ERRAND",
            RestorePhase::BoshStart => "BOSH_START",
            RestorePhase::PostBoshStart => "POST_BOSH_START",
        }
    }

    /// Phase name used after `stage`. The post-start trigger names the errand
    /// explicitly: `TRIGGER_POST_BOSH_START_ERRAND`.
    pub fn stage_name(&self, stage: PhaseStage) -> &'static str {
        match (stage, self) {
            (PhaseStage::Trigger, RestorePhase::PostBoshStart) => "POST_BOSH_START_ERRAND",
            _ => self.as_str(),
        }
    }

    fn from_stage_name(stage: PhaseStage, name: &str) -> Result<Self, Error> {
        RestorePhase::ALL
            .iter()
            .find(|p| p.stage_name(stage) == name)
            .copied()
            .ok_or_else(|| {
                Error::validation(format!(
                    "Unknown restore phase '{}' for stage {}",
                    name,
                    stage.as_str()
                ))
            })
    }
}

impl fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceState {
    InQueue,
    InProgress,
    Succeeded,
    Failed,
    Delete,
    Abort,
    Aborting,
    Aborted,
    Waiting,
    Finalize,
    /// A staged restore phase, e.g. `IN_PROGRESS_BOSH_STOP`
    Restore {
        stage: PhaseStage,
        phase: RestorePhase,
    },
}

impl ResourceState {
    /// `IN_PROGRESS_<phase>`
    pub const fn in_progress(phase: RestorePhase) -> Self {
        ResourceState::Restore {
            stage: PhaseStage::InProgress,
            phase,
        }
    }

    /// `TRIGGER_<phase>`
    pub const fn trigger(phase: RestorePhase) -> Self {
        ResourceState::Restore {
            stage: PhaseStage::Trigger,
            phase,
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = match self {
            ResourceState::InQueue => "IN_QUEUE",
            ResourceState::InProgress => "IN_PROGRESS",
            ResourceState::Succeeded => "SUCCEEDED",
            ResourceState::Failed => "FAILED",
            ResourceState::Delete => "DELETE",
            ResourceState::Abort => "ABORT",
            ResourceState::Aborting => "ABORTING",
            ResourceState::Aborted => "ABORTED",
            ResourceState::Waiting => "WAITING",
            ResourceState::Finalize => "FINALIZE",
            ResourceState::Restore { stage, phase } => {
                return write!(f, "{}_{}", stage.as_str(), phase.stage_name(*stage));
            }
        };
        f.write_str(simple)
    }
}

impl FromStr for ResourceState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s {
            "IN_QUEUE" => ResourceState::InQueue,
            "IN_PROGRESS" => ResourceState::InProgress,
            "SUCCEEDED" => ResourceState::Succeeded,
            "FAILED" => ResourceState::Failed,
            "DELETE" => ResourceState::Delete,
            "ABORT" => ResourceState::Abort,
            "ABORTING" => ResourceState::Aborting,
            "ABORTED" => ResourceState::Aborted,
            "WAITING" => ResourceState::Waiting,
            "FINALIZE" => ResourceState::Finalize,
            other => {
                if let Some(name) = other.strip_prefix("IN_PROGRESS_") {
                    ResourceState::in_progress(RestorePhase::from_stage_name(
                        PhaseStage::InProgress,
                        name,
                    )?)
                } else if let Some(name) = other.strip_prefix("TRIGGER_") {
                    ResourceState::trigger(RestorePhase::from_stage_name(PhaseStage::Trigger, name)?)
                } else {
                    return Err(Error::validation(format!("Unknown resource state '{}'", other)));
                }
            }
        };
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_state_parses_into_stage_and_phase() {
        let state: ResourceState = "IN_PROGRESS_BOSH_STOP".parse().unwrap();
        assert_eq!(state, ResourceState::in_progress(RestorePhase::BoshStop));

        let state: ResourceState = "TRIGGER_PITR_ERRAND".parse().unwrap();
        assert_eq!(state, ResourceState::trigger(RestorePhase::PitrErrand));
    }

    #[test]
    fn test_states_display_as_wire_strings() {
        for s in [
            "IN_QUEUE",
            "IN_PROGRESS",
            "FAILED",
            "IN_PROGRESS_ATTACH_DISK",
            "TRIGGER_POST_BOSH_START_ERRAND",
            "IN_PROGRESS_POST_BOSH_START",
            "FINALIZE",
        ] {
            let state: ResourceState = s.parse().unwrap();
            assert_eq!(state.to_string(), s);
        }
    }

    #[test]
    fn test_unknown_state_is_rejected() {
        assert!("IN_PROGRESS_NOPE".parse::<ResourceState>().is_err());
        assert!("running".parse::<ResourceState>().is_err());
    }

    #[test]
    fn test_post_start_trigger_names_the_errand() {
        let state: ResourceState = "TRIGGER_POST_BOSH_START_ERRAND".parse().unwrap();
        assert_eq!(state, ResourceState::trigger(RestorePhase::PostBoshStart));
        assert_eq!(
            ResourceState::trigger(RestorePhase::PostBoshStart).to_string(),
            "TRIGGER_POST_BOSH_START_ERRAND"
        );
        assert!("TRIGGER_POST_BOSH_START".parse::<ResourceState>().is_err());
        assert!("IN_PROGRESS_POST_BOSH_START_ERRAND".parse::<ResourceState>().is_err());
    }
}
