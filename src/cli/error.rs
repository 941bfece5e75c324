use crate::download::history::SessionStatus;

// Exit codes for scripted runs
pub const SUCCESS: i32 = 0;
pub const ERROR: i32 = 1;
/// No persisted run, or nothing to clear
pub const NOT_FOUND: i32 = 2;
pub const INVALID_INPUT: i32 = 3;

/// Exit code for a finished session
///
/// A window with no matching orders still counts as a clean run.
pub fn for_session(status: SessionStatus) -> i32 {
    match status {
        SessionStatus::Success | SessionStatus::PartialSuccess | SessionStatus::NothingFound => {
            SUCCESS
        }
        SessionStatus::AllFailed | SessionStatus::Stopped => ERROR,
    }
}
