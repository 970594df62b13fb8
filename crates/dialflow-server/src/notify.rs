use async_trait::async_trait;
use dialflow_core::collab::{CollabError, CollabResult, Notifier};
use std::time::Duration;

/// Posts dial-plan summaries to a Slack-style incoming webhook. Rate limits
/// surface as transient errors carrying the server's Retry-After hint so the
/// retry policy can wait exactly as long as asked.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn post(&self, channel: &str, message: &str) -> CollabResult<()> {
        let body = serde_json::json!({ "channel": channel, "text": message });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CollabError::transient(format!("webhook unreachable: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(match retry_after {
                Some(wait) => {
                    CollabError::transient_after(format!("webhook rate limited: {status}"), wait)
                }
                None => CollabError::transient(format!("webhook rate limited: {status}")),
            });
        }
        if status.is_client_error() {
            // A misconfigured hook will not fix itself by retrying.
            return Err(CollabError::fatal(format!(
                "webhook rejected the post: {status}"
            )));
        }
        Err(CollabError::transient(format!("webhook returned {status}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn posts_channel_and_text_as_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "channel": "#dial-plan",
                "text": "morning sweep ready",
            })))
            .with_status(200)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", server.url()));
        notifier
            .post("#dial-plan", "morning sweep ready")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_carries_the_retry_after_hint() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hook")
            .with_status(429)
            .with_header("retry-after", "7")
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", server.url()));
        let err = notifier.post("#dial-plan", "hello").await.unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn client_error_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hook")
            .with_status(404)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", server.url()));
        let err = notifier.post("#dial-plan", "hello").await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hook")
            .with_status(503)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", server.url()));
        let err = notifier.post("#dial-plan", "hello").await.unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(err.retry_after(), None);
    }
}
