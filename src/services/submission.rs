use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::models::ApplicationIntent;

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Executor returned status {0}")]
    ApiError(u16),
}

/// Hand-off to the external application-submission service
///
/// `Ok(true)` means the executor took the request and will report a terminal
/// outcome through the callback; `Ok(false)` means it refused outright.
#[async_trait]
pub trait SubmissionExecutor: Send + Sync {
    async fn submit(&self, intent: &ApplicationIntent) -> Result<bool, SubmissionError>;
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    intent_id: Uuid,
    profile_id: &'a str,
    listing_id: Uuid,
    score: f64,
    callback_url: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    accepted: bool,
}

/// Executor reached over HTTP POST
pub struct HttpSubmissionExecutor {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    callback_base_url: String,
}

impl HttpSubmissionExecutor {
    pub fn new(endpoint: String, api_key: Option<String>, callback_base_url: String, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            endpoint,
            api_key,
            callback_base_url: callback_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SubmissionExecutor for HttpSubmissionExecutor {
    async fn submit(&self, intent: &ApplicationIntent) -> Result<bool, SubmissionError> {
        let body = SubmitRequest {
            intent_id: intent.id,
            profile_id: &intent.profile_id,
            listing_id: intent.listing_id,
            score: intent.score,
            callback_url: format!(
                "{}/api/v1/intents/{}/outcome",
                self.callback_base_url, intent.id
            ),
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SubmissionError::ApiError(status.as_u16()));
        }

        let parsed: SubmitResponse = response.json().await?;
        tracing::debug!(
            intent_id = %intent.id,
            accepted = parsed.accepted,
            "Submission executor responded"
        );

        Ok(parsed.accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn executor(url: &str) -> HttpSubmissionExecutor {
        HttpSubmissionExecutor::new(
            format!("{}/submissions", url),
            Some("exec-key".to_string()),
            "https://ingest.internal/".to_string(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_submit_posts_intent_with_callback() {
        let mut server = mockito::Server::new_async().await;
        let intent = ApplicationIntent::pending("p1", Uuid::new_v4(), 0.9, Utc::now());
        let mock = server
            .mock("POST", "/submissions")
            .match_header("authorization", "Bearer exec-key")
            .match_body(mockito::Matcher::PartialJsonString(format!(
                r#"{{"intent_id":"{}","callback_url":"https://ingest.internal/api/v1/intents/{}/outcome"}}"#,
                intent.id, intent.id
            )))
            .with_status(202)
            .with_body(r#"{"accepted":true}"#)
            .create_async()
            .await;

        assert!(executor(&server.url()).submit(&intent).await.unwrap());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refusal_and_errors() {
        let mut server = mockito::Server::new_async().await;
        let intent = ApplicationIntent::pending("p1", Uuid::new_v4(), 0.9, Utc::now());
        server
            .mock("POST", "/submissions")
            .with_status(200)
            .with_body(r#"{"accepted":false}"#)
            .create_async()
            .await;
        assert!(!executor(&server.url()).submit(&intent).await.unwrap());

        let mut down = mockito::Server::new_async().await;
        down.mock("POST", "/submissions")
            .with_status(500)
            .create_async()
            .await;
        assert!(matches!(
            executor(&down.url()).submit(&intent).await,
            Err(SubmissionError::ApiError(500))
        ));
    }
}
