//! Issue lifecycle gate.
//!
//! ```text
//! New ──> Active ──> Resolved ──> Closed
//!           ^                        │
//!           └────────── reopen ──────┘
//! Removed (terminal)
//! ```

use crate::errors::TrackerError;

use super::models::IssueState;

/// Legal successor states for `state`.
pub fn successors(state: IssueState) -> &'static [IssueState] {
    match state {
        IssueState::New => &[IssueState::Active],
        IssueState::Active => &[IssueState::Resolved],
        IssueState::Resolved => &[IssueState::Closed],
        IssueState::Closed => &[IssueState::Active],
        IssueState::Removed => &[],
    }
}

pub fn can_transition(from: IssueState, to: IssueState) -> bool {
    successors(from).contains(&to)
}

/// Validate a requested move. The caller must not mutate anything on error.
pub fn check_transition(from: IssueState, to: IssueState) -> Result<(), TrackerError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(TrackerError::InvalidTransition { from, to })
    }
}
