//! Stable exit codes for arbor CLI commands.

use crate::core::types::RunOutcome;

/// Command succeeded; the session can keep stepping.
pub const OK: i32 = 0;
/// Invalid config/snapshot/collaborator output, or any other error.
pub const INVALID: i32 = 1;
/// The session finished with an answer (`solved`) or a complete walk.
pub const FINISHED: i32 = 2;
/// The session finished without an answer (failed, exhausted or out of budget).
pub const FAILED: i32 = 3;

/// Exit code reported for a finished session.
pub fn for_outcome(outcome: &RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Solved { .. } | RunOutcome::Completed => FINISHED,
        RunOutcome::Failed { .. } | RunOutcome::Exhausted | RunOutcome::BudgetExhausted => FAILED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_map_to_finished_or_failed() {
        assert_eq!(for_outcome(&RunOutcome::Completed), FINISHED);
        assert_eq!(
            for_outcome(&RunOutcome::Solved {
                answer_path: vec![0, 2]
            }),
            FINISHED
        );
        assert_eq!(for_outcome(&RunOutcome::Failed { node_id: 3 }), FAILED);
        assert_eq!(for_outcome(&RunOutcome::BudgetExhausted), FAILED);
    }
}
