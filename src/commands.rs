use std::sync::Arc;

use teloxide::{
    payloads::SendMessageSetters, prelude::Requester, types::Message, utils::command::BotCommands,
    Bot,
};

use crate::{
    api::client::FetchAttempts,
    keyboard::action_keyboard,
    runner::{send_attempt_history, teardown_attempt},
    session::SessionRegistry,
    state::TakerState,
    HandlerResult, UserDialogue,
};

#[derive(Debug, Clone, BotCommands)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "display help.")]
    Help,
    #[command(description = "start the bot")]
    Start,
    #[command(description = "abandon the current attempt")]
    Cancel,
    #[command(description = "show your past attempts")]
    Attempts,
}

pub(crate) async fn help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

pub(crate) async fn start(
    bot: Bot,
    dialogue: UserDialogue,
    msg: Message,
    registry: Arc<SessionRegistry>,
) -> HandlerResult {
    if teardown_attempt(&registry, msg.chat.id).await {
        log::info!("Chat {} restarted over a live attempt", msg.chat.id);
        bot.send_message(msg.chat.id, "Your attempt in progress was abandoned.")
            .await?;
    }
    bot.send_message(msg.chat.id, "Please choose what to do:")
        .reply_markup(action_keyboard())
        .await?;
    dialogue.update(TakerState::Start).await?;
    Ok(())
}

pub(crate) async fn cancel(
    bot: Bot,
    dialogue: UserDialogue,
    msg: Message,
    registry: Arc<SessionRegistry>,
) -> HandlerResult {
    let text = if teardown_attempt(&registry, msg.chat.id).await {
        "Attempt abandoned. Nothing was submitted."
    } else {
        "Nothing to cancel."
    };
    bot.send_message(msg.chat.id, text)
        .reply_markup(action_keyboard())
        .await?;
    dialogue.update(TakerState::Start).await?;
    Ok(())
}

pub(crate) async fn attempts<History: FetchAttempts>(
    bot: Bot,
    msg: Message,
    api: Arc<History>,
) -> HandlerResult {
    send_attempt_history(&bot, msg.chat.id, api.as_ref()).await
}
