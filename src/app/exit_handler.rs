//! Exit code logic for the segfetch process.
//!
//! Single responsibility: map transfer outcome counts to the process exit outcome.

use crate::ProcessExit;

/// Determines the process exit outcome from completed and unfinished transfer counts.
///
/// Paused transfers count as unfinished: their output file does not exist yet.
pub(crate) fn determine_exit_outcome(completed: usize, unfinished: usize) -> ProcessExit {
    if unfinished == 0 {
        ProcessExit::Success
    } else if completed > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}

#[cfg(test)]
mod tests {
    use super::determine_exit_outcome;
    use crate::ProcessExit;

    #[test]
    fn test_exit_outcome_success_when_nothing_unfinished() {
        assert_eq!(determine_exit_outcome(3, 0), ProcessExit::Success);
        assert_eq!(determine_exit_outcome(0, 0), ProcessExit::Success);
    }

    #[test]
    fn test_exit_outcome_partial_when_mixed() {
        assert_eq!(determine_exit_outcome(2, 1), ProcessExit::Partial);
    }

    #[test]
    fn test_exit_outcome_failure_when_none_completed() {
        assert_eq!(determine_exit_outcome(0, 2), ProcessExit::Failure);
    }
}
