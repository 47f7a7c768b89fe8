use crate::api::types::QuizSummary;

// The live attempt itself (answers, clock, status) is not dialogue data:
// it lives in the SessionRegistry so the countdown task can reach it.
#[derive(Debug, Clone, Default)]
pub enum TakerState {
    #[default]
    Start,
    Selection,
    ConfirmingStart {
        quiz: QuizSummary,
    },
    InAttempt,
}
