use std::time::Duration;

use reqwest::Response;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use url::Url;

use super::types::{
    AttemptId, AttemptRecord, AttemptResult, QuizContent, QuizId, QuizSummary, StartedAttempt,
    SubmissionPayload,
};
use super::ApiError;

const AUTH_HEADER: &str = "Authentication-Token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    token: String,
}

impl ApiClient {
    pub fn new(mut base: Url, token: String) -> Result<Self, ApiError> {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, base, token })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.base.join(path)?;
        log::debug!("GET {url}");
        let response = self
            .http
            .get(url)
            .header(AUTH_HEADER, &self.token)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.base.join(path)?;
        log::debug!("POST {url}");
        let response = self
            .http
            .post(url)
            .header(AUTH_HEADER, &self.token)
            .json(body)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

pub(crate) trait BrowseQuizzes {
    async fn list_quizzes(&self) -> Result<Vec<QuizSummary>, ApiError>;
}

pub(crate) trait FetchQuiz {
    async fn fetch_quiz(&self, quiz: QuizId) -> Result<QuizContent, ApiError>;
}

pub(crate) trait StartAttempt {
    async fn start_attempt(&self, quiz: QuizId) -> Result<StartedAttempt, ApiError>;
}

pub(crate) trait SubmitAttempt {
    async fn submit_attempt(
        &self,
        attempt: AttemptId,
        payload: &SubmissionPayload,
    ) -> Result<AttemptResult, ApiError>;
}

pub(crate) trait FetchAttempts {
    async fn attempt_history(&self) -> Result<Vec<AttemptRecord>, ApiError>;
}

impl BrowseQuizzes for ApiClient {
    async fn list_quizzes(&self) -> Result<Vec<QuizSummary>, ApiError> {
        self.get_json("api/quizzes").await
    }
}

impl FetchQuiz for ApiClient {
    async fn fetch_quiz(&self, quiz: QuizId) -> Result<QuizContent, ApiError> {
        let content: QuizContent = self.get_json(&format!("api/quizzes/{quiz}")).await?;
        content.validate()?;
        Ok(content)
    }
}

impl StartAttempt for ApiClient {
    async fn start_attempt(&self, quiz: QuizId) -> Result<StartedAttempt, ApiError> {
        self.post_json(&format!("api/quizzes/{quiz}/start"), &serde_json::json!({}))
            .await
    }
}

impl SubmitAttempt for ApiClient {
    async fn submit_attempt(
        &self,
        attempt: AttemptId,
        payload: &SubmissionPayload,
    ) -> Result<AttemptResult, ApiError> {
        self.post_json(&format!("api/attempts/{attempt}/submit"), payload)
            .await
    }
}

impl FetchAttempts for ApiClient {
    async fn attempt_history(&self) -> Result<Vec<AttemptRecord>, ApiError> {
        self.get_json("api/user/attempts").await
    }
}
