use std::sync::Arc;

use teloxide::{
    dispatching::dialogue::GetChatId,
    payloads::{AnswerCallbackQuerySetters, EditMessageTextSetters, SendMessageSetters},
    prelude::Requester,
    types::{CallbackQuery, ChatId, InlineKeyboardMarkup, Message, MessageId, ParseMode, ReplyMarkup},
    utils::html::escape,
    Bot,
};
use tokio::sync::Mutex;
use tracing::instrument;

use crate::{
    api::{
        client::{ApiClient, BrowseQuizzes, FetchAttempts, FetchQuiz, StartAttempt, SubmitAttempt},
        types::{AttemptId, QuizContent, QuizSummary},
        ApiError,
    },
    keyboard::{
        action_keyboard, confirm_keyboard, question_keyboard, quizzes_keyboard,
        retry_submit_keyboard, yes_no_keyboard, CallbackAction,
    },
    session::{AttemptConfig, AttemptSession, AttemptStatus, SessionRegistry},
    state::TakerState,
    timer::{spawn_auto_advance, spawn_countdown},
    HandlerResult, UserDialogue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubmitTrigger {
    Manual,
    TimerExpiry,
}

enum NavMove {
    Previous,
    Next,
    Jump(usize),
}

enum SubmitAsk {
    Confirm(String),
    Straight,
    Busy,
}

#[instrument(level = "info", skip(api))]
pub(crate) async fn choose_action<Api: BrowseQuizzes + FetchAttempts>(
    bot: Bot,
    dialogue: UserDialogue,
    msg: Message,
    api: Arc<Api>,
) -> HandlerResult {
    match msg.text() {
        Some("Take a quiz📝") => match api.list_quizzes().await {
            Ok(quizzes) if quizzes.is_empty() => {
                bot.send_message(msg.chat.id, "No quizzes are available right now.")
                    .await?;
            }
            Ok(quizzes) => {
                log::info!(
                    "{} browses {} available quizzes",
                    msg.chat.username().unwrap_or("someone"),
                    quizzes.len()
                );
                dialogue.update(TakerState::Selection).await?;
                bot.send_message(msg.chat.id, "Which quiz do you want to take?")
                    .reply_markup(quizzes_keyboard(&quizzes))
                    .await?;
            }
            Err(e) => {
                log::error!("Failed to list quizzes: {e}");
                bot.send_message(msg.chat.id, format!("Could not load the quiz list: {e}"))
                    .await?;
            }
        },
        Some("My results📊") => {
            send_attempt_history(&bot, msg.chat.id, api.as_ref()).await?;
        }
        _ => {
            bot.send_message(msg.chat.id, "Please choose one of the actions below.")
                .reply_markup(action_keyboard())
                .await?;
        }
    }
    Ok(())
}

#[instrument(level = "info", skip(api))]
pub(crate) async fn selection<Api: BrowseQuizzes>(
    bot: Bot,
    dialogue: UserDialogue,
    msg: Message,
    api: Arc<Api>,
) -> HandlerResult {
    match msg.text() {
        Some(title) => match api.list_quizzes().await {
            Ok(quizzes) => match quizzes.into_iter().find(|quiz| quiz.title == title) {
                Some(quiz) => {
                    log::info!(
                        "{} selected '{}'",
                        msg.chat.username().unwrap_or("someone"),
                        quiz.title
                    );
                    bot.send_message(
                        msg.chat.id,
                        format!("{quiz}\n\nReady to begin? The clock starts right away. (Yes/No)"),
                    )
                    .reply_markup(yes_no_keyboard())
                    .parse_mode(ParseMode::Html)
                    .await?;
                    dialogue
                        .update(TakerState::ConfirmingStart { quiz })
                        .await?;
                }
                None => {
                    bot.send_message(
                        msg.chat.id,
                        format!("Quiz '{title}' not found. Pick one from the keyboard."),
                    )
                    .await?;
                }
            },
            Err(e) => {
                log::error!("Failed to list quizzes: {e}");
                bot.send_message(msg.chat.id, format!("Could not load the quiz list: {e}"))
                    .await?;
            }
        },
        None => {
            bot.send_message(msg.chat.id, "Please send a quiz title.")
                .await?;
        }
    }
    Ok(())
}

#[instrument(level = "info", skip(api, registry))]
pub(crate) async fn confirm_start(
    bot: Bot,
    dialogue: UserDialogue,
    msg: Message,
    quiz: QuizSummary,
    api: Arc<ApiClient>,
    registry: Arc<SessionRegistry>,
    config: AttemptConfig,
) -> HandlerResult {
    let chat = msg.chat.id;
    match msg.text() {
        Some("Yes") | Some("Yes✔️") => {
            log::info!(
                "{} starts quiz '{}'",
                msg.chat.username().unwrap_or("someone"),
                quiz.title
            );
            match load_attempt(&api, &quiz).await {
                Ok((attempt_id, content)) => {
                    let session =
                        Arc::new(Mutex::new(AttemptSession::new(attempt_id, content, config)));

                    bot.send_message(chat, "Let's begin! The clock is ticking.")
                        .reply_markup(ReplyMarkup::kb_remove())
                        .await?;
                    let (view, markup) = {
                        let session = session.lock().await;
                        (session.question_view(), question_keyboard(&session))
                    };
                    bot.send_message(chat, view)
                        .reply_markup(markup)
                        .parse_mode(ParseMode::Html)
                        .await?;

                    let countdown = spawn_countdown(
                        bot.clone(),
                        chat,
                        session.clone(),
                        api.clone(),
                        registry.clone(),
                        dialogue.clone(),
                    );
                    registry.begin(chat, session, countdown);
                    dialogue.update(TakerState::InAttempt).await?;
                }
                Err(e) => {
                    log::error!("Failed to load quiz '{}' for chat {chat}: {e}", quiz.title);
                    bot.send_message(
                        chat,
                        format!("Failed to load the quiz: {e}\nTry again? (Yes/No)"),
                    )
                    .reply_markup(yes_no_keyboard())
                    .await?;
                }
            }
        }
        Some("No") | Some("No❌") => {
            log::info!(
                "{} backs out of quiz '{}'",
                msg.chat.username().unwrap_or("someone"),
                quiz.title
            );
            dialogue.update(TakerState::Start).await?;
            bot.send_message(chat, "OK, maybe later. What do you want to do now?")
                .reply_markup(action_keyboard())
                .await?;
        }
        _ => {
            bot.send_message(chat, "Please answer <b>Yes</b> or <b>No</b>.")
                .parse_mode(ParseMode::Html)
                .await?;
        }
    }
    Ok(())
}

async fn load_attempt(
    api: &ApiClient,
    quiz: &QuizSummary,
) -> Result<(AttemptId, QuizContent), ApiError> {
    let started = api.start_attempt(quiz.id).await?;
    let content = api.fetch_quiz(quiz.id).await?;
    Ok((started.attempt_id, content))
}

#[instrument(level = "info")]
pub(crate) async fn in_attempt_note(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(
        msg.chat.id,
        "You have an attempt in progress — use the buttons under the question, or /cancel to abandon it.",
    )
    .await?;
    Ok(())
}

#[instrument(level = "info", skip(api, registry))]
pub(crate) async fn take_action(
    bot: Bot,
    dialogue: UserDialogue,
    q: CallbackQuery,
    api: Arc<ApiClient>,
    registry: Arc<SessionRegistry>,
) -> HandlerResult {
    let Some(chat) = q.chat_id() else {
        bot.answer_callback_query(&q.id).await?;
        return Ok(());
    };
    let Some(session) = registry.session(chat) else {
        // Dialogue says InAttempt but no live session: the bot restarted.
        bot.answer_callback_query(&q.id).await?;
        dialogue.update(TakerState::Start).await?;
        bot.send_message(chat, "That attempt is no longer active. What do you want to do now?")
            .reply_markup(action_keyboard())
            .await?;
        return Ok(());
    };
    let Some(action) = q.data.as_deref().and_then(CallbackAction::decode) else {
        log::warn!("Unrecognized callback data {:?} in chat {chat}", q.data);
        bot.answer_callback_query(&q.id).await?;
        return Ok(());
    };
    let message = q.message.as_ref().map(|message| message.id());

    match action {
        CallbackAction::Choose { question, option } => {
            let outcome = {
                let mut session = session.lock().await;
                if session.status() != AttemptStatus::InProgress {
                    Err("This attempt is already being submitted.".to_string())
                } else {
                    session
                        .select_option(question, option)
                        .map(|()| {
                            let advance =
                                session.wants_auto_advance().then(|| session.nav_generation());
                            (session.question_view(), question_keyboard(&session), advance)
                        })
                        .map_err(|e| e.to_string())
                }
            };
            match outcome {
                Ok((view, markup, advance)) => {
                    bot.answer_callback_query(&q.id).await?;
                    if let Some(message) = message {
                        refresh_question_message(&bot, chat, message, view, markup).await;
                        if let Some(generation) = advance {
                            let handle = spawn_auto_advance(
                                bot.clone(),
                                chat,
                                message,
                                session.clone(),
                                generation,
                            );
                            registry.track_advance(chat, handle);
                        }
                    }
                }
                Err(text) => {
                    bot.answer_callback_query(&q.id)
                        .text(text)
                        .show_alert(true)
                        .await?;
                }
            }
        }
        CallbackAction::Previous => {
            navigate(&bot, &q, chat, message, &session, NavMove::Previous).await?;
        }
        CallbackAction::Next => {
            navigate(&bot, &q, chat, message, &session, NavMove::Next).await?;
        }
        CallbackAction::JumpTo(index) => {
            navigate(&bot, &q, chat, message, &session, NavMove::Jump(index)).await?;
        }
        CallbackAction::SubmitRequested => {
            let decision = {
                let session = session.lock().await;
                match session.status() {
                    AttemptStatus::InProgress => {
                        if session.needs_confirmation() {
                            SubmitAsk::Confirm(session.confirm_view())
                        } else {
                            SubmitAsk::Straight
                        }
                    }
                    AttemptStatus::SubmitFailed => SubmitAsk::Straight,
                    AttemptStatus::Submitting | AttemptStatus::Completed => SubmitAsk::Busy,
                }
            };
            bot.answer_callback_query(&q.id).await?;
            match decision {
                SubmitAsk::Confirm(view) => {
                    if let Some(message) = message {
                        refresh_question_message(&bot, chat, message, view, confirm_keyboard())
                            .await;
                    }
                }
                SubmitAsk::Straight => {
                    perform_submission(
                        &bot,
                        chat,
                        &dialogue,
                        &session,
                        &api,
                        &registry,
                        SubmitTrigger::Manual,
                    )
                    .await?;
                }
                SubmitAsk::Busy => {}
            }
        }
        CallbackAction::ConfirmSubmit => {
            bot.answer_callback_query(&q.id).await?;
            perform_submission(
                &bot,
                chat,
                &dialogue,
                &session,
                &api,
                &registry,
                SubmitTrigger::Manual,
            )
            .await?;
        }
        CallbackAction::CancelSubmit => {
            let refreshed = {
                let session = session.lock().await;
                (session.status() == AttemptStatus::InProgress)
                    .then(|| (session.question_view(), question_keyboard(&session)))
            };
            bot.answer_callback_query(&q.id).await?;
            if let (Some(message), Some((view, markup))) = (message, refreshed) {
                refresh_question_message(&bot, chat, message, view, markup).await;
            }
        }
    }
    Ok(())
}

async fn navigate(
    bot: &Bot,
    q: &CallbackQuery,
    chat: ChatId,
    message: Option<MessageId>,
    session: &Arc<Mutex<AttemptSession>>,
    step: NavMove,
) -> HandlerResult {
    let refreshed = {
        let mut session = session.lock().await;
        if session.status() == AttemptStatus::InProgress {
            match step {
                NavMove::Previous => session.previous(),
                NavMove::Next => session.next(),
                NavMove::Jump(index) => session.go_to(index),
            }
            Some((session.question_view(), question_keyboard(&session)))
        } else {
            None
        }
    };
    bot.answer_callback_query(&q.id).await?;
    if let (Some(message), Some((view, markup))) = (message, refreshed) {
        refresh_question_message(bot, chat, message, view, markup).await;
    }
    Ok(())
}

// Telegram rejects edits that change nothing (re-picking the same option,
// jumping to the current question), so failures here are not fatal.
async fn refresh_question_message(
    bot: &Bot,
    chat: ChatId,
    message: MessageId,
    view: String,
    markup: InlineKeyboardMarkup,
) {
    if let Err(e) = bot
        .edit_message_text(chat, message, view)
        .reply_markup(markup)
        .parse_mode(ParseMode::Html)
        .await
    {
        log::debug!("Question message refresh skipped in chat {chat}: {e}");
    }
}

pub(crate) async fn perform_submission(
    bot: &Bot,
    chat: ChatId,
    dialogue: &UserDialogue,
    session: &Arc<Mutex<AttemptSession>>,
    api: &Arc<ApiClient>,
    registry: &Arc<SessionRegistry>,
    trigger: SubmitTrigger,
) -> HandlerResult {
    let (attempt_id, payload, title) = {
        let mut session = session.lock().await;
        if !session.try_begin_submission() {
            log::debug!("Duplicate submission suppressed in chat {chat}");
            return Ok(());
        }
        (
            session.attempt_id(),
            session.submission_payload(),
            session.quiz().title.clone(),
        )
    };

    // The countdown ends itself after a forced submission; aborting it
    // from here would cancel the request it is waiting on.
    if trigger == SubmitTrigger::Manual {
        registry.stop_countdown(chat);
    }

    log::info!(
        "Submitting attempt {attempt_id} ('{title}') from chat {chat} with {} answers",
        payload.answers.len()
    );

    match api.submit_attempt(attempt_id, &payload).await {
        Ok(result) => {
            session.lock().await.complete();
            registry.close(chat, trigger == SubmitTrigger::Manual);
            bot.send_message(
                chat,
                format!(
                    "🎉 <b>{}</b> — submitted!\nScore: <b>{:.1}%</b> — {} of {} correct.\nSaved as attempt #{attempt_id}.",
                    escape(&title),
                    result.score,
                    result.correct_count,
                    result.total_questions
                ),
            )
            .parse_mode(ParseMode::Html)
            .await?;
            dialogue.update(TakerState::Start).await?;
            bot.send_message(chat, "What do you want to do now?")
                .reply_markup(action_keyboard())
                .await?;
        }
        Err(e) => {
            log::error!("Submission of attempt {attempt_id} from chat {chat} failed: {e}");
            let status = {
                let mut session = session.lock().await;
                session.submission_failed();
                session.status()
            };
            match status {
                AttemptStatus::SubmitFailed => {
                    bot.send_message(chat, format!("⚠️ Time is up and the submission failed: {e}"))
                        .reply_markup(retry_submit_keyboard())
                        .await?;
                }
                _ => {
                    bot.send_message(
                        chat,
                        format!("⚠️ Failed to submit: {e}\nYour answers are kept — tap Submit to try again."),
                    )
                    .await?;
                }
            }
        }
    }
    Ok(())
}

pub(crate) async fn send_attempt_history<History: FetchAttempts>(
    bot: &Bot,
    chat: ChatId,
    api: &History,
) -> HandlerResult {
    match api.attempt_history().await {
        Ok(records) if records.is_empty() => {
            bot.send_message(chat, "You have no attempts yet. Take a quiz first!")
                .await?;
        }
        Ok(records) => {
            let lines: Vec<String> = records.iter().map(|record| format!("• {record}")).collect();
            bot.send_message(
                chat,
                format!("📊 <b>Your attempts</b>\n{}", lines.join("\n")),
            )
            .parse_mode(ParseMode::Html)
            .await?;
        }
        Err(e) => {
            log::error!("Failed to fetch attempt history for chat {chat}: {e}");
            bot.send_message(chat, format!("Could not load your attempts: {e}"))
                .await?;
        }
    }
    Ok(())
}

pub(crate) async fn teardown_attempt(registry: &SessionRegistry, chat: ChatId) -> bool {
    let session = registry.session(chat);
    let closed = registry.close(chat, true);
    if let Some(session) = session {
        session.lock().await.invalidate_pending();
    }
    closed
}
