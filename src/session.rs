use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};

use teloxide::types::ChatId;
use teloxide::utils::html::escape;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::api::types::{
    AttemptId, ChosenOption, OptionId, Question, QuestionId, QuizContent, SubmissionPayload,
};
use crate::timer::format_time_left;

#[derive(Debug, Clone, Copy)]
pub struct AttemptConfig {
    pub auto_advance: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    InProgress,
    Submitting,
    Completed,
    SubmitFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running,
    Expired,
    Halted,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidSelection {
    #[error("question {0} is not part of this quiz")]
    UnknownQuestion(QuestionId),
    #[error("option {option} does not belong to question {question}")]
    ForeignOption {
        question: QuestionId,
        option: OptionId,
    },
}

pub struct AttemptSession {
    attempt_id: AttemptId,
    quiz: QuizContent,
    answers: HashMap<QuestionId, OptionId>,
    current_index: usize,
    // Bumped on every navigation; a scheduled auto-advance only fires if
    // the counter still matches the value captured when it was scheduled.
    nav_generation: u64,
    time_left_secs: u32,
    status: AttemptStatus,
    auto_advance: bool,
}

impl AttemptSession {
    pub fn new(attempt_id: AttemptId, quiz: QuizContent, config: AttemptConfig) -> Self {
        let time_left_secs = quiz.time_limit * 60;
        Self {
            attempt_id,
            quiz,
            answers: HashMap::new(),
            current_index: 0,
            nav_generation: 0,
            time_left_secs,
            status: AttemptStatus::InProgress,
            auto_advance: config.auto_advance,
        }
    }

    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    pub fn quiz(&self) -> &QuizContent {
        &self.quiz
    }

    pub fn status(&self) -> AttemptStatus {
        self.status
    }

    pub fn time_left_secs(&self) -> u32 {
        self.time_left_secs
    }

    pub fn time_limit_minutes(&self) -> u32 {
        self.quiz.time_limit
    }

    // PART FOR --- ANSWERS ---

    pub fn select_option(
        &mut self,
        question: QuestionId,
        option: OptionId,
    ) -> Result<(), InvalidSelection> {
        let Some(found) = self.quiz.find_question(question) else {
            return Err(InvalidSelection::UnknownQuestion(question));
        };
        if !found.has_option(option) {
            return Err(InvalidSelection::ForeignOption { question, option });
        }
        self.answers.insert(question, option);
        Ok(())
    }

    pub fn selected_option(&self, question: QuestionId) -> Option<OptionId> {
        self.answers.get(&question).copied()
    }

    pub fn is_answered(&self, question: QuestionId) -> bool {
        self.answers.contains_key(&question)
    }

    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }

    pub fn unanswered_count(&self) -> usize {
        self.question_count() - self.answered_count()
    }

    // PART FOR --- NAVIGATION ---

    pub fn question_count(&self) -> usize {
        self.quiz.questions.len()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.quiz.questions.get(self.current_index)
    }

    pub fn is_last_question(&self) -> bool {
        self.current_index + 1 >= self.question_count()
    }

    pub fn nav_generation(&self) -> u64 {
        self.nav_generation
    }

    pub fn go_to(&mut self, index: usize) {
        if index < self.question_count() {
            self.current_index = index;
            self.nav_generation += 1;
        }
    }

    pub fn next(&mut self) {
        if !self.is_last_question() {
            self.current_index += 1;
            self.nav_generation += 1;
        }
    }

    pub fn previous(&mut self) {
        if self.current_index > 0 {
            self.current_index -= 1;
            self.nav_generation += 1;
        }
    }

    // Fraction of questions *before* the current one, so the first
    // question reads 0% and the last of three reads 67%.
    pub fn progress_percent(&self) -> u32 {
        let total = self.question_count();
        if total == 0 {
            return 0;
        }
        (self.current_index as f64 / total as f64 * 100.0).round() as u32
    }

    pub fn wants_auto_advance(&self) -> bool {
        self.auto_advance && self.status == AttemptStatus::InProgress && !self.is_last_question()
    }

    pub fn try_auto_advance(&mut self, scheduled_generation: u64) -> Option<usize> {
        if self.status != AttemptStatus::InProgress
            || self.nav_generation != scheduled_generation
            || self.is_last_question()
        {
            return None;
        }
        self.next();
        Some(self.current_index)
    }

    pub fn invalidate_pending(&mut self) {
        self.nav_generation += 1;
    }

    // PART FOR --- TIMER ---

    pub fn tick(&mut self) -> TickOutcome {
        if self.status != AttemptStatus::InProgress {
            return TickOutcome::Halted;
        }
        if self.time_left_secs > 0 {
            self.time_left_secs -= 1;
            TickOutcome::Running
        } else {
            TickOutcome::Expired
        }
    }

    // PART FOR --- SUBMISSION ---

    // Single winner: both the manual path and the expired countdown call
    // this, and only the first caller gets to fire the network request.
    pub fn try_begin_submission(&mut self) -> bool {
        match self.status {
            AttemptStatus::InProgress | AttemptStatus::SubmitFailed => {
                self.status = AttemptStatus::Submitting;
                true
            }
            AttemptStatus::Submitting | AttemptStatus::Completed => false,
        }
    }

    pub fn complete(&mut self) {
        self.status = AttemptStatus::Completed;
    }

    pub fn submission_failed(&mut self) {
        self.status = if self.time_left_secs > 0 {
            AttemptStatus::InProgress
        } else {
            AttemptStatus::SubmitFailed
        };
    }

    pub fn needs_confirmation(&self) -> bool {
        self.unanswered_count() > 0
    }

    pub fn submission_payload(&self) -> SubmissionPayload {
        let answers: BTreeMap<QuestionId, ChosenOption> = self
            .answers
            .iter()
            .map(|(&question, &option)| (question, ChosenOption { option_id: option }))
            .collect();
        SubmissionPayload { answers }
    }

    // PART FOR --- RENDERING ---

    pub fn question_view(&self) -> String {
        let Some(question) = self.current_question() else {
            return "This quiz has no questions.".to_string();
        };
        format!(
            "<b>{}</b> — {} / {}\nQuestion <b>{}</b> of {} · {}% through · ⏱ {} left\n\n{}\n\nAnswered {} of {}",
            escape(&self.quiz.title),
            escape(&self.quiz.subject),
            escape(&self.quiz.chapter),
            self.current_index + 1,
            self.question_count(),
            self.progress_percent(),
            format_time_left(self.time_left_secs),
            escape(&question.text),
            self.answered_count(),
            self.question_count(),
        )
    }

    pub fn confirm_view(&self) -> String {
        let unanswered = self.unanswered_count();
        let mut text = format!(
            "<b>Submit this attempt?</b>\n\nYou answered {} of {} questions.",
            self.answered_count(),
            self.question_count(),
        );
        if unanswered > 0 {
            text.push_str(&format!(
                "\n⚠️ {unanswered} unanswered — they will be scored as incorrect."
            ));
        }
        text
    }
}

struct ActiveAttempt {
    session: Arc<Mutex<AttemptSession>>,
    countdown: JoinHandle<()>,
    pending_advance: Option<JoinHandle<()>>,
}

pub struct SessionRegistry {
    inner: StdMutex<HashMap<ChatId, ActiveAttempt>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: StdMutex::new(HashMap::new()),
        }
    }

    pub fn begin(
        &self,
        chat: ChatId,
        session: Arc<Mutex<AttemptSession>>,
        countdown: JoinHandle<()>,
    ) {
        let mut attempts = self.inner.lock().expect("session registry lock poisoned");
        if let Some(stale) = attempts.insert(
            chat,
            ActiveAttempt {
                session,
                countdown,
                pending_advance: None,
            },
        ) {
            stale.countdown.abort();
            if let Some(advance) = stale.pending_advance {
                advance.abort();
            }
        }
    }

    pub fn session(&self, chat: ChatId) -> Option<Arc<Mutex<AttemptSession>>> {
        let attempts = self.inner.lock().expect("session registry lock poisoned");
        attempts.get(&chat).map(|attempt| attempt.session.clone())
    }

    pub fn track_advance(&self, chat: ChatId, handle: JoinHandle<()>) {
        let mut attempts = self.inner.lock().expect("session registry lock poisoned");
        if let Some(attempt) = attempts.get_mut(&chat) {
            if let Some(previous) = attempt.pending_advance.replace(handle) {
                previous.abort();
            }
        } else {
            handle.abort();
        }
    }

    // Not called from the countdown task itself: aborting the caller
    // kills the submission it is in the middle of.
    pub fn stop_countdown(&self, chat: ChatId) {
        let attempts = self.inner.lock().expect("session registry lock poisoned");
        if let Some(attempt) = attempts.get(&chat) {
            attempt.countdown.abort();
        }
    }

    pub fn close(&self, chat: ChatId, stop_countdown: bool) -> bool {
        let removed = {
            let mut attempts = self.inner.lock().expect("session registry lock poisoned");
            attempts.remove(&chat)
        };
        match removed {
            Some(attempt) => {
                if let Some(advance) = attempt.pending_advance {
                    advance.abort();
                }
                if stop_countdown {
                    attempt.countdown.abort();
                }
                true
            }
            None => false,
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::AnswerOption;

    fn quiz(question_count: usize, time_limit: u32) -> QuizContent {
        let questions = (0..question_count)
            .map(|i| {
                let id = (i + 1) as QuestionId;
                Question {
                    id,
                    text: format!("Question number {id}"),
                    options: vec![
                        AnswerOption {
                            id: id * 10,
                            text: "first".to_string(),
                        },
                        AnswerOption {
                            id: id * 10 + 1,
                            text: "second".to_string(),
                        },
                    ],
                }
            })
            .collect();
        QuizContent {
            id: 1,
            title: "Fixtures".to_string(),
            subject: "Testing".to_string(),
            chapter: "Sessions".to_string(),
            time_limit,
            questions,
        }
    }

    fn session(question_count: usize, time_limit: u32) -> AttemptSession {
        AttemptSession::new(
            42,
            quiz(question_count, time_limit),
            AttemptConfig { auto_advance: true },
        )
    }

    #[test]
    fn reselecting_an_option_overwrites_the_previous_one() {
        let mut session = session(3, 10);
        session.select_option(1, 10).unwrap();
        session.select_option(1, 11).unwrap();
        assert_eq!(session.selected_option(1), Some(11));
        assert_eq!(session.answered_count(), 1);
    }

    #[test]
    fn selecting_option_of_another_question_is_rejected() {
        let mut session = session(3, 10);
        let err = session.select_option(1, 20).unwrap_err();
        assert_eq!(
            err,
            InvalidSelection::ForeignOption {
                question: 1,
                option: 20
            }
        );
        assert_eq!(session.answered_count(), 0, "rejected pick must not stick");
    }

    #[test]
    fn selecting_unknown_question_is_rejected() {
        let mut session = session(2, 10);
        let err = session.select_option(99, 10).unwrap_err();
        assert_eq!(err, InvalidSelection::UnknownQuestion(99));
    }

    #[test]
    fn navigation_is_clamped_to_quiz_bounds() {
        let mut session = session(3, 10);
        session.previous();
        assert_eq!(session.current_index(), 0);
        session.go_to(7);
        assert_eq!(session.current_index(), 0);
        session.go_to(2);
        assert_eq!(session.current_index(), 2);
        session.next();
        assert_eq!(session.current_index(), 2);
    }

    #[test]
    fn navigation_does_not_touch_answers() {
        let mut session = session(3, 10);
        session.select_option(1, 10).unwrap();
        session.next();
        session.go_to(2);
        session.previous();
        assert_eq!(session.selected_option(1), Some(10));
        assert_eq!(session.answered_count(), 1);
    }

    #[test]
    fn progress_is_zero_on_first_question_and_rounds_after() {
        let mut session = session(3, 10);
        assert_eq!(session.progress_percent(), 0);
        session.next();
        assert_eq!(session.progress_percent(), 33);
        session.next();
        assert_eq!(session.progress_percent(), 67);
    }

    #[test]
    fn tick_counts_down_and_expires_after_zero() {
        let mut session = session(1, 1);
        assert_eq!(session.time_left_secs(), 60);
        for expected in (0..60).rev() {
            assert_eq!(session.tick(), TickOutcome::Running);
            assert_eq!(session.time_left_secs(), expected);
        }
        // Shows 0:00 for one beat, then the next tick forces submission.
        assert_eq!(session.tick(), TickOutcome::Expired);
    }

    #[test]
    fn tick_halts_once_submission_started() {
        let mut session = session(1, 1);
        assert!(session.try_begin_submission());
        assert_eq!(session.tick(), TickOutcome::Halted);
        assert_eq!(session.time_left_secs(), 60, "halted tick must not decrement");
    }

    #[test]
    fn submission_guard_admits_only_one_caller() {
        let mut session = session(2, 10);
        assert!(session.try_begin_submission());
        assert!(!session.try_begin_submission());
        session.complete();
        assert!(!session.try_begin_submission());
    }

    #[test]
    fn failed_submission_before_expiry_returns_to_in_progress() {
        let mut session = session(2, 10);
        assert!(session.try_begin_submission());
        session.submission_failed();
        assert_eq!(session.status(), AttemptStatus::InProgress);
        assert!(session.try_begin_submission(), "retry must be possible");
    }

    #[test]
    fn failed_submission_after_expiry_allows_retry_but_no_countdown() {
        let mut session = session(1, 1);
        for _ in 0..61 {
            session.tick();
        }
        assert!(session.try_begin_submission());
        session.submission_failed();
        assert_eq!(session.status(), AttemptStatus::SubmitFailed);
        assert_eq!(session.tick(), TickOutcome::Halted);
        assert!(session.try_begin_submission(), "retry must be possible");
    }

    #[test]
    fn payload_contains_answered_questions_only() {
        let mut session = session(5, 10);
        session.select_option(2, 20).unwrap();
        session.select_option(4, 41).unwrap();
        let payload = session.submission_payload();
        assert_eq!(payload.answers.len(), 2);
        assert_eq!(payload.answers.get(&2).map(|c| c.option_id), Some(20));
        assert_eq!(payload.answers.get(&4).map(|c| c.option_id), Some(41));
        assert!(!payload.answers.contains_key(&1));
    }

    #[test]
    fn auto_advance_fires_only_for_matching_generation() {
        let mut session = session(3, 10);
        let scheduled = session.nav_generation();
        session.next();
        assert_eq!(
            session.try_auto_advance(scheduled),
            None,
            "manual navigation must cancel the scheduled advance"
        );
        assert_eq!(session.current_index(), 1);

        let scheduled = session.nav_generation();
        assert_eq!(session.try_auto_advance(scheduled), Some(2));
    }

    #[test]
    fn auto_advance_never_fires_on_last_question() {
        let mut session = session(2, 10);
        session.next();
        assert!(!session.wants_auto_advance());
        let scheduled = session.nav_generation();
        assert_eq!(session.try_auto_advance(scheduled), None);
    }

    #[test]
    fn invalidate_pending_stales_scheduled_advances() {
        let mut session = session(3, 10);
        let scheduled = session.nav_generation();
        session.invalidate_pending();
        assert_eq!(session.try_auto_advance(scheduled), None);
        assert_eq!(session.current_index(), 0);
    }

    #[test]
    fn confirmation_needed_only_while_questions_are_open() {
        let mut session = session(2, 10);
        assert!(session.needs_confirmation());
        session.select_option(1, 10).unwrap();
        session.select_option(2, 20).unwrap();
        assert!(!session.needs_confirmation());
    }

    #[test]
    fn question_view_shows_position_and_clock() {
        let session = session(3, 10);
        let view = session.question_view();
        assert!(view.contains("Question <b>1</b> of 3"));
        assert!(view.contains("0% through"));
        assert!(view.contains("10:00 left"));
        assert!(view.contains("Question number 1"));
    }

    #[test]
    fn confirm_view_warns_about_open_questions() {
        let mut session = session(3, 10);
        session.select_option(1, 10).unwrap();
        let view = session.confirm_view();
        assert!(view.contains("1 of 3"));
        assert!(view.contains("2 unanswered"));

        session.select_option(2, 20).unwrap();
        session.select_option(3, 30).unwrap();
        assert!(!session.confirm_view().contains("unanswered"));
    }

    #[tokio::test]
    async fn registry_replaces_and_closes_attempts() {
        let registry = SessionRegistry::new();
        let chat = ChatId(7);
        let session = Arc::new(Mutex::new(session(2, 10)));

        registry.begin(chat, session.clone(), tokio::spawn(async {}));
        assert!(registry.session(chat).is_some());

        registry.track_advance(chat, tokio::spawn(async {}));
        assert!(registry.close(chat, true));
        assert!(registry.session(chat).is_none());
        assert!(!registry.close(chat, true));
    }
}
