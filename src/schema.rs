use std::error::Error;

use teloxide::{
    dispatching::{
        dialogue::{self, InMemStorage},
        DpHandlerDescription, UpdateFilterExt, UpdateHandler,
    },
    dptree::{self, Handler},
    prelude::{DependencyMap, Requester},
    types::{Message, Update},
    Bot,
};
use tracing::instrument;

use crate::{
    api::client::ApiClient,
    commands::{self, Command},
    runner,
    state::TakerState,
    HandlerResult,
};

pub fn schema() -> UpdateHandler<Box<dyn Error + Send + Sync + 'static>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Help].endpoint(commands::help))
        .branch(case![Command::Start].endpoint(commands::start))
        .branch(case![Command::Cancel].endpoint(commands::cancel))
        .branch(case![Command::Attempts].endpoint(commands::attempts::<ApiClient>));

    let handler = Update::filter_message()
        .branch(command_handler)
        .branch(case![TakerState::Start].endpoint(runner::choose_action::<ApiClient>))
        .branch(taking_scheme())
        .endpoint(invalid_state);

    dialogue::enter::<Update, InMemStorage<TakerState>, TakerState, _>()
        .branch(handler)
        .branch(callback_query_scheme())
}

#[instrument(level = "debug")]
fn taking_scheme() -> Handler<
    'static,
    DependencyMap,
    Result<(), Box<(dyn Error + Send + Sync + 'static)>>,
    DpHandlerDescription,
> {
    use dptree::case;
    log::debug!("Building a dispatch tree for quiz taking");
    Update::filter_message()
        .branch(case![TakerState::Selection].endpoint(runner::selection::<ApiClient>))
        .branch(case![TakerState::ConfirmingStart { quiz }].endpoint(runner::confirm_start))
        .branch(case![TakerState::InAttempt].endpoint(runner::in_attempt_note))
}

#[instrument(level = "debug")]
fn callback_query_scheme() -> Handler<
    'static,
    DependencyMap,
    Result<(), Box<(dyn Error + Send + Sync + 'static)>>,
    DpHandlerDescription,
> {
    use dptree::case;
    log::debug!("Building a dispatch tree for callback queries");
    Update::filter_callback_query()
        .branch(case![TakerState::InAttempt].endpoint(runner::take_action))
}

#[instrument(level = "info")]
async fn invalid_state(bot: Bot, msg: Message) -> HandlerResult {
    log::info!(
        "{}: unhandled input '{:?}'",
        msg.chat.username().unwrap_or("someone"),
        msg.text()
    );
    bot.send_message(
        msg.chat.id,
        "Unable to handle the message. Enter /help to see usages.",
    )
    .await?;
    Ok(())
}
