use state::TakerState;
use teloxide::{dispatching::dialogue::InMemStorage, prelude::Dialogue};

pub mod api;
pub mod commands;
pub mod keyboard;
pub mod runner;
pub mod schema;
pub mod session;
pub mod state;
pub mod timer;

type UserDialogue = Dialogue<TakerState, InMemStorage<TakerState>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;
