use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

use crate::api::types::{OptionId, QuestionId, QuizSummary};
use crate::session::AttemptSession;

const BUTTON_TEXT_LIMIT: usize = 48;
const JUMP_ROW_WIDTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallbackAction {
    Choose {
        question: QuestionId,
        option: OptionId,
    },
    Previous,
    Next,
    JumpTo(usize),
    SubmitRequested,
    ConfirmSubmit,
    CancelSubmit,
}

impl CallbackAction {
    pub(crate) fn encode(&self) -> String {
        match self {
            CallbackAction::Choose { question, option } => format!("pick:{question}:{option}"),
            CallbackAction::Previous => "nav:prev".to_string(),
            CallbackAction::Next => "nav:next".to_string(),
            CallbackAction::JumpTo(index) => format!("nav:jump:{index}"),
            CallbackAction::SubmitRequested => "submit:ask".to_string(),
            CallbackAction::ConfirmSubmit => "submit:go".to_string(),
            CallbackAction::CancelSubmit => "submit:back".to_string(),
        }
    }

    pub(crate) fn decode(data: &str) -> Option<Self> {
        let mut parts = data.split(':');
        let action = match (parts.next()?, parts.next()) {
            ("pick", Some(question)) => CallbackAction::Choose {
                question: question.parse().ok()?,
                option: parts.next()?.parse().ok()?,
            },
            ("nav", Some("prev")) => CallbackAction::Previous,
            ("nav", Some("next")) => CallbackAction::Next,
            ("nav", Some("jump")) => CallbackAction::JumpTo(parts.next()?.parse().ok()?),
            ("submit", Some("ask")) => CallbackAction::SubmitRequested,
            ("submit", Some("go")) => CallbackAction::ConfirmSubmit,
            ("submit", Some("back")) => CallbackAction::CancelSubmit,
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(action)
    }
}

fn option_letter(index: usize) -> String {
    if index < 26 {
        char::from(b'A' + index as u8).to_string()
    } else {
        (index + 1).to_string()
    }
}

fn trim_label(text: &str) -> String {
    if text.chars().count() <= BUTTON_TEXT_LIMIT {
        return text.to_string();
    }
    let mut trimmed: String = text.chars().take(BUTTON_TEXT_LIMIT - 1).collect();
    trimmed.push('…');
    trimmed
}

pub(crate) fn yes_no_keyboard() -> KeyboardMarkup {
    let keyboard: Vec<Vec<KeyboardButton>> = vec![vec![
        KeyboardButton::new("Yes✔️"),
        KeyboardButton::new("No❌"),
    ]];

    KeyboardMarkup::new(keyboard)
}

pub(crate) fn action_keyboard() -> KeyboardMarkup {
    let keyboard = vec![
        vec![KeyboardButton::new("Take a quiz📝")],
        vec![KeyboardButton::new("My results📊")],
    ];

    KeyboardMarkup::new(keyboard)
}

pub(crate) fn quizzes_keyboard(quizzes: &[QuizSummary]) -> KeyboardMarkup {
    let keyboard = quizzes
        .iter()
        .map(|quiz| vec![KeyboardButton::new(&quiz.title)]);

    KeyboardMarkup::new(keyboard)
}

pub(crate) fn question_keyboard(session: &AttemptSession) -> InlineKeyboardMarkup {
    let mut keyboard: Vec<Vec<InlineKeyboardButton>> = vec![];

    if let Some(question) = session.current_question() {
        let selected = session.selected_option(question.id);
        for (index, option) in question.options.iter().enumerate() {
            let mark = if selected == Some(option.id) { "✅ " } else { "" };
            let label = format!("{mark}{}) {}", option_letter(index), trim_label(&option.text));
            keyboard.push(vec![InlineKeyboardButton::callback(
                label,
                CallbackAction::Choose {
                    question: question.id,
                    option: option.id,
                }
                .encode(),
            )]);
        }
    }

    let mut nav_row = vec![];
    if session.current_index() > 0 {
        nav_row.push(InlineKeyboardButton::callback(
            "⬅️ Previous",
            CallbackAction::Previous.encode(),
        ));
    }
    if !session.is_last_question() {
        nav_row.push(InlineKeyboardButton::callback(
            "Next ➡️",
            CallbackAction::Next.encode(),
        ));
    }
    if !nav_row.is_empty() {
        keyboard.push(nav_row);
    }

    let indices: Vec<usize> = (0..session.question_count()).collect();
    for chunk in indices.chunks(JUMP_ROW_WIDTH) {
        let row = chunk
            .iter()
            .map(|&index| {
                let question_id = session.quiz().questions[index].id;
                let label = if index == session.current_index() {
                    format!("▶{}", index + 1)
                } else if session.is_answered(question_id) {
                    format!("✓{}", index + 1)
                } else {
                    format!("{}", index + 1)
                };
                InlineKeyboardButton::callback(label, CallbackAction::JumpTo(index).encode())
            })
            .collect();
        keyboard.push(row);
    }

    keyboard.push(vec![InlineKeyboardButton::callback(
        "📤 Submit answers",
        CallbackAction::SubmitRequested.encode(),
    )]);

    InlineKeyboardMarkup::new(keyboard)
}

pub(crate) fn confirm_keyboard() -> InlineKeyboardMarkup {
    let keyboard = vec![
        vec![InlineKeyboardButton::callback(
            "✅ Submit now",
            CallbackAction::ConfirmSubmit.encode(),
        )],
        vec![InlineKeyboardButton::callback(
            "↩️ Keep answering",
            CallbackAction::CancelSubmit.encode(),
        )],
    ];

    InlineKeyboardMarkup::new(keyboard)
}

pub(crate) fn retry_submit_keyboard() -> InlineKeyboardMarkup {
    let keyboard = vec![vec![InlineKeyboardButton::callback(
        "🔁 Retry submit",
        CallbackAction::ConfirmSubmit.encode(),
    )]];

    InlineKeyboardMarkup::new(keyboard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{AnswerOption, Question, QuizContent};
    use crate::session::AttemptConfig;

    #[test]
    fn callback_actions_survive_a_round_trip() {
        let actions = [
            CallbackAction::Choose {
                question: 12,
                option: 345,
            },
            CallbackAction::Previous,
            CallbackAction::Next,
            CallbackAction::JumpTo(4),
            CallbackAction::SubmitRequested,
            CallbackAction::ConfirmSubmit,
            CallbackAction::CancelSubmit,
        ];
        for action in actions {
            assert_eq!(CallbackAction::decode(&action.encode()), Some(action));
        }
    }

    #[test]
    fn malformed_callback_data_is_ignored() {
        for data in ["", "pick", "pick:1", "pick:1:x", "nav:up", "submit", "nav:jump:1:2", "pick:1:2:3"] {
            assert_eq!(CallbackAction::decode(data), None, "{data:?} should not decode");
        }
    }

    fn fixture_session() -> AttemptSession {
        let quiz = QuizContent {
            id: 1,
            title: "Keyboards".to_string(),
            subject: "UI".to_string(),
            chapter: "Buttons".to_string(),
            time_limit: 5,
            questions: vec![
                Question {
                    id: 1,
                    text: "first".to_string(),
                    options: vec![
                        AnswerOption { id: 10, text: "yes".to_string() },
                        AnswerOption { id: 11, text: "no".to_string() },
                    ],
                },
                Question {
                    id: 2,
                    text: "second".to_string(),
                    options: vec![
                        AnswerOption { id: 20, text: "left".to_string() },
                        AnswerOption { id: 21, text: "right".to_string() },
                    ],
                },
            ],
        };
        AttemptSession::new(7, quiz, AttemptConfig { auto_advance: true })
    }

    #[test]
    fn question_keyboard_marks_selection_and_skips_previous_on_first_question() {
        let mut session = fixture_session();
        session.select_option(1, 11).unwrap();

        let markup = question_keyboard(&session);
        let rows = &markup.inline_keyboard;

        // 2 options, nav, jump grid, submit.
        assert_eq!(rows.len(), 5);
        assert!(rows[0][0].text.starts_with("A)"));
        assert!(rows[1][0].text.starts_with("✅ B)"));
        assert_eq!(rows[2].len(), 1, "first question only offers Next");
        assert_eq!(rows[3][0].text, "▶1");
        assert_eq!(rows[3][1].text, "2");
        assert_eq!(rows[4][0].text, "📤 Submit answers");
    }

    #[test]
    fn jump_grid_shows_answered_marks() {
        let mut session = fixture_session();
        session.select_option(2, 20).unwrap();
        let markup = question_keyboard(&session);
        // Rows: two options, nav, jump grid, submit.
        assert_eq!(markup.inline_keyboard[3][1].text, "✓2");
    }

    #[test]
    fn long_option_text_is_trimmed_for_the_button() {
        let trimmed = trim_label(&"x".repeat(100));
        assert_eq!(trimmed.chars().count(), BUTTON_TEXT_LIMIT);
        assert!(trimmed.ends_with('…'));
    }

    #[test]
    fn option_letters_run_through_the_alphabet() {
        assert_eq!(option_letter(0), "A");
        assert_eq!(option_letter(3), "D");
        assert_eq!(option_letter(26), "27");
    }
}
