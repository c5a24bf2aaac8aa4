//! Per-pair lifecycle state.

use crate::error::RemoteError;
use std::fmt;
use std::time::Duration;

/// State of one (client, share) pair.
///
/// Transitions:
/// - Pending → Created (export exists on the cluster)
/// - Created → Mounted (client mounted the export)
/// - Mounted → Verified (mount shows up in the client's mount table)
/// - Pending | Created | Mounted → Failed (stage gave up)
/// - anything but TornDown → TornDown (teardown finished for the pair)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Pending,
    Created,
    Mounted,
    Verified,
    Failed,
    TornDown,
}

impl ResourceState {
    pub fn can_transition_to(self, next: ResourceState) -> bool {
        use ResourceState::*;
        match (self, next) {
            (Pending, Created) | (Created, Mounted) | (Mounted, Verified) => true,
            (Pending | Created | Mounted, Failed) => true,
            (TornDown, TornDown) => false,
            (_, TornDown) => true,
            _ => false,
        }
    }

    /// `advance` has nothing left to do.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            ResourceState::Verified | ResourceState::Failed | ResourceState::TornDown
        )
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Setup stage a pair can fail in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Create,
    Mount,
    Verify,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Create => "create",
            Stage::Mount => "mount",
            Stage::Verify => "verify",
        };
        f.write_str(s)
    }
}

/// Why a pair ended in [`ResourceState::Failed`].
#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    pub stage: Stage,
    pub attempts: u32,
    pub elapsed: Duration,
    /// Last error the remote side reported, if the stage saw one.
    pub last_error: Option<RemoteError>,
    pub detail: String,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after {} attempt(s) in {:?}: {}",
            self.stage, self.attempts, self.elapsed, self.detail
        )?;
        if let Some(err) = &self.last_error {
            write!(f, " (last error: {})", err)?;
        }
        Ok(())
    }
}
