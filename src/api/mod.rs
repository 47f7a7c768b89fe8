use thiserror::Error;

pub mod client;
pub mod types;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("could not reach the assessment platform: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("bad endpoint url: {0}")]
    BadUrl(#[from] url::ParseError),
    #[error("platform answered {status}: {message}")]
    Status { status: u16, message: String },
    #[error("platform sent an unusable quiz: {0}")]
    BadPayload(String),
}
