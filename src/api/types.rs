use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use teloxide::utils::html::escape;

use super::ApiError;

pub type QuizId = i64;
pub type QuestionId = i64;
pub type OptionId = i64;
pub type AttemptId = i64;

#[derive(Debug, Clone, Deserialize)]
pub struct QuizSummary {
    pub id: QuizId,
    pub title: String,
    pub subject: String,
    pub chapter: String,
    pub time_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuizContent {
    pub id: QuizId,
    pub title: String,
    pub subject: String,
    pub chapter: String,
    pub time_limit: u32,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    pub options: Vec<AnswerOption>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnswerOption {
    pub id: OptionId,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartedAttempt {
    pub attempt_id: AttemptId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttemptResult {
    pub score: f64,
    pub correct_count: u32,
    pub total_questions: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttemptRecord {
    pub attempt_id: AttemptId,
    pub quiz_id: QuizId,
    pub quiz_title: String,
    pub score: Option<f64>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChosenOption {
    pub option_id: OptionId,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionPayload {
    pub answers: BTreeMap<QuestionId, ChosenOption>,
}

impl fmt::Display for QuizSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<b>{}</b>\n<i>{} / {}</i>\n\nTime limit: {} min",
            escape(&self.title),
            escape(&self.subject),
            escape(&self.chapter),
            self.time_limit
        )
    }
}

impl fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let day = self.started_at.split('T').next().unwrap_or(&self.started_at);
        match self.score {
            Some(score) => write!(f, "{} — {:.1}% ({})", escape(&self.quiz_title), score, day),
            None => write!(f, "{} — in progress ({})", escape(&self.quiz_title), day),
        }
    }
}

impl QuizContent {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.questions.is_empty() {
            return Err(ApiError::BadPayload(format!(
                "quiz '{}' has no questions",
                self.title
            )));
        }

        let mut question_ids = HashSet::new();
        for question in &self.questions {
            if !question_ids.insert(question.id) {
                return Err(ApiError::BadPayload(format!(
                    "duplicate question id {}",
                    question.id
                )));
            }
            if question.options.len() < 2 {
                return Err(ApiError::BadPayload(format!(
                    "question {} has fewer than two options",
                    question.id
                )));
            }
            let mut option_ids = HashSet::new();
            for option in &question.options {
                if !option_ids.insert(option.id) {
                    return Err(ApiError::BadPayload(format!(
                        "duplicate option id {} in question {}",
                        option.id, question.id
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn find_question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|question| question.id == id)
    }
}

impl Question {
    pub fn has_option(&self, id: OptionId) -> bool {
        self.options.iter().any(|option| option.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_options(first: OptionId, second: OptionId) -> Vec<AnswerOption> {
        vec![
            AnswerOption {
                id: first,
                text: "left".to_string(),
            },
            AnswerOption {
                id: second,
                text: "right".to_string(),
            },
        ]
    }

    fn content(questions: Vec<Question>) -> QuizContent {
        QuizContent {
            id: 1,
            title: "Borrow checker".to_string(),
            subject: "Rust".to_string(),
            chapter: "Ownership".to_string(),
            time_limit: 10,
            questions,
        }
    }

    #[test]
    fn quiz_content_deserializes_from_platform_shape() {
        let payload = json!({
            "id": 4,
            "title": "Sorting",
            "subject": "CS",
            "chapter": "Algorithms",
            "time_limit": 15,
            "questions": [
                {
                    "id": 7,
                    "text": "Worst case of quicksort?",
                    "options": [
                        {"id": 70, "text": "O(n log n)"},
                        {"id": 71, "text": "O(n^2)"}
                    ]
                }
            ]
        });

        let quiz: QuizContent = serde_json::from_value(payload).expect("payload should parse");
        assert_eq!(quiz.id, 4);
        assert_eq!(quiz.time_limit, 15);
        assert_eq!(quiz.questions.len(), 1);
        assert_eq!(quiz.questions[0].options[1].id, 71);
        assert!(quiz.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_quiz() {
        let quiz = content(vec![]);
        assert!(matches!(quiz.validate(), Err(ApiError::BadPayload(_))));
    }

    #[test]
    fn validate_rejects_single_option_question() {
        let quiz = content(vec![Question {
            id: 1,
            text: "pick one".to_string(),
            options: vec![AnswerOption {
                id: 10,
                text: "only".to_string(),
            }],
        }]);
        assert!(matches!(quiz.validate(), Err(ApiError::BadPayload(_))));
    }

    #[test]
    fn validate_rejects_duplicate_question_ids() {
        let quiz = content(vec![
            Question {
                id: 1,
                text: "first".to_string(),
                options: two_options(10, 11),
            },
            Question {
                id: 1,
                text: "again".to_string(),
                options: two_options(12, 13),
            },
        ]);
        assert!(matches!(quiz.validate(), Err(ApiError::BadPayload(_))));
    }

    #[test]
    fn validate_rejects_duplicate_option_ids_within_question() {
        let quiz = content(vec![Question {
            id: 1,
            text: "first".to_string(),
            options: two_options(10, 10),
        }]);
        assert!(matches!(quiz.validate(), Err(ApiError::BadPayload(_))));
    }

    #[test]
    fn submission_payload_matches_wire_shape() {
        let mut answers = BTreeMap::new();
        answers.insert(7, ChosenOption { option_id: 71 });
        answers.insert(3, ChosenOption { option_id: 30 });
        let payload = SubmissionPayload { answers };

        let value = serde_json::to_value(&payload).expect("payload should serialize");
        assert_eq!(
            value,
            json!({"answers": {"3": {"option_id": 30}, "7": {"option_id": 71}}})
        );
    }

    #[test]
    fn attempt_record_renders_pending_and_scored_lines() {
        let mut record = AttemptRecord {
            attempt_id: 9,
            quiz_id: 2,
            quiz_title: "Graphs".to_string(),
            score: None,
            started_at: "2026-08-20T10:00:00".to_string(),
            completed_at: None,
        };
        assert_eq!(record.to_string(), "Graphs — in progress (2026-08-20)");

        record.score = Some(87.5);
        record.completed_at = Some("2026-08-20T10:20:00".to_string());
        assert_eq!(record.to_string(), "Graphs — 87.5% (2026-08-20)");
    }
}
