use std::sync::Arc;
use std::time::Duration;

use teloxide::payloads::EditMessageTextSetters;
use teloxide::prelude::Requester;
use teloxide::types::{ChatId, MessageId, ParseMode};
use teloxide::Bot;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::api::client::ApiClient;
use crate::keyboard::question_keyboard;
use crate::runner::{perform_submission, SubmitTrigger};
use crate::session::{AttemptSession, SessionRegistry, TickOutcome};
use crate::UserDialogue;

pub const AUTO_ADVANCE_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimeBand {
    Nominal,
    Warning,
    Critical,
    CriticalPulse,
}

impl TimeBand {
    pub fn of(time_left_secs: u32, limit_minutes: u32) -> Self {
        if time_left_secs < 60 {
            return TimeBand::CriticalPulse;
        }
        let total = (limit_minutes * 60).max(1) as f64;
        let percent = time_left_secs as f64 * 100.0 / total;
        if percent > 50.0 {
            TimeBand::Nominal
        } else if percent >= 25.0 {
            TimeBand::Warning
        } else {
            TimeBand::Critical
        }
    }

    fn notice(&self, time_left_secs: u32) -> Option<String> {
        match self {
            TimeBand::Nominal => None,
            TimeBand::Warning => Some(format!(
                "⏳ Less than half the time left — {} to go.",
                format_time_left(time_left_secs)
            )),
            TimeBand::Critical => Some(format!(
                "⚠️ Under a quarter of the time left — {} to go.",
                format_time_left(time_left_secs)
            )),
            TimeBand::CriticalPulse => Some("🚨 Less than a minute left!".to_string()),
        }
    }
}

pub fn format_time_left(secs: u32) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

pub(crate) fn spawn_countdown(
    bot: Bot,
    chat: ChatId,
    session: Arc<Mutex<AttemptSession>>,
    api: Arc<ApiClient>,
    registry: Arc<SessionRegistry>,
    dialogue: UserDialogue,
) -> JoinHandle<()> {
    tokio::spawn(countdown_loop(bot, chat, session, api, registry, dialogue))
}

async fn countdown_loop(
    bot: Bot,
    chat: ChatId,
    session: Arc<Mutex<AttemptSession>>,
    api: Arc<ApiClient>,
    registry: Arc<SessionRegistry>,
    dialogue: UserDialogue,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;

    loop {
        ticker.tick().await;

        // The lock is released before any message goes out.
        let (outcome, notice) = {
            let mut session = session.lock().await;
            let limit = session.time_limit_minutes();
            let before = TimeBand::of(session.time_left_secs(), limit);
            let outcome = session.tick();
            let after = TimeBand::of(session.time_left_secs(), limit);
            let notice = (outcome == TickOutcome::Running && after > before)
                .then(|| after.notice(session.time_left_secs()))
                .flatten();
            (outcome, notice)
        };

        match outcome {
            TickOutcome::Running => {
                if let Some(text) = notice {
                    if let Err(e) = bot.send_message(chat, text).await {
                        log::warn!("Failed to send a time notice to {chat}: {e}");
                    }
                }
            }
            TickOutcome::Expired => {
                log::info!("Time is up in chat {chat}, forcing submission.");
                if let Err(e) = bot
                    .send_message(chat, "⏰ Time is up — submitting your answers.")
                    .await
                {
                    log::warn!("Failed to announce expiry to {chat}: {e}");
                }
                if let Err(e) = perform_submission(
                    &bot,
                    chat,
                    &dialogue,
                    &session,
                    &api,
                    &registry,
                    SubmitTrigger::TimerExpiry,
                )
                .await
                {
                    log::error!("Forced submission in chat {chat} failed: {e}");
                }
                break;
            }
            TickOutcome::Halted => break,
        }
    }
}

pub(crate) fn spawn_auto_advance(
    bot: Bot,
    chat: ChatId,
    message: MessageId,
    session: Arc<Mutex<AttemptSession>>,
    scheduled_generation: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(AUTO_ADVANCE_DELAY).await;

        let advanced = {
            let mut session = session.lock().await;
            session
                .try_auto_advance(scheduled_generation)
                .map(|_| (session.question_view(), question_keyboard(&session)))
        };

        let Some((text, markup)) = advanced else {
            return;
        };
        if let Err(e) = bot
            .edit_message_text(chat, message, text)
            .reply_markup(markup)
            .parse_mode(ParseMode::Html)
            .await
        {
            log::warn!("Auto-advance edit failed in chat {chat}: {e}");
        }
    })
}
