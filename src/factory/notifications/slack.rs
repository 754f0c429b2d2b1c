//! Notification delivery.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::payload::NotificationPayload;
use crate::errors::{FactoryError, FactoryResult};
use crate::factory::models::NotificationTarget;

pub const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api";

/// Delivers a rendered payload to one target.
/// Real implementations: `SlackNotifier`, `LogNotifier`. Test double: `RecordingSender`.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, target: &NotificationTarget, payload: &NotificationPayload) -> FactoryResult<()>;
}

/// `key: value` per line.
pub fn render_message(payload: &NotificationPayload) -> String {
    payload
        .fields()
        .into_iter()
        .map(|(key, value)| format!("{}: {}", key, value))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

pub struct SlackNotifier {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl SlackNotifier {
    pub fn new(api_url: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl NotificationSender for SlackNotifier {
    async fn send(&self, target: &NotificationTarget, payload: &NotificationPayload) -> FactoryResult<()> {
        let resp = self
            .http
            .post(format!("{}/chat.postMessage", self.api_url))
            .bearer_auth(&self.token)
            .json(&json!({
                "channel": target.channel_id,
                "text": render_message(payload),
                "mrkdwn": true,
            }))
            .send()
            .await
            .map_err(|e| FactoryError::Notification(format!("Slack request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FactoryError::Notification(format!("Slack returned {}", status)));
        }
        let body: SlackResponse = resp
            .json()
            .await
            .map_err(|e| FactoryError::Notification(format!("Invalid Slack response: {}", e)))?;
        if !body.ok {
            return Err(FactoryError::Notification(format!(
                "Slack rejected message to {}: {}",
                target.channel_id,
                body.error.unwrap_or_else(|| "unknown error".into())
            )));
        }

        tracing::debug!(channel = %target.channel_id, "notification delivered");
        Ok(())
    }
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn send(&self, target: &NotificationTarget, payload: &NotificationPayload) -> FactoryResult<()> {
        tracing::info!(
            channel = %target.channel_id,
            channel_type = target.channel_type.as_str(),
            message = %render_message(payload),
            "notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::models::ChannelType;
    use mockito::Matcher;

    fn payload() -> NotificationPayload {
        NotificationPayload {
            name: "acme-stage-api-main".into(),
            state: "FAILED".into(),
            execution_id: "exec-1".into(),
            commit_url: "https://github.com/acme/stage-api/commit/abc".into(),
            commit_message: "Fix".into(),
            commit_author: "Ada".into(),
            commit_date: "2024-05-01".into(),
            failure_logs: None,
            failure_summary: None,
            failure_phase: Some("Build".into()),
        }
    }

    fn target() -> NotificationTarget {
        NotificationTarget {
            channel_id: "master-problems".into(),
            channel_type: ChannelType::Slack,
        }
    }

    #[test]
    fn renders_key_value_lines() {
        let text = render_message(&payload());
        assert!(text.starts_with("name: acme-stage-api-main\nstate: FAILED\n"));
        assert!(text.ends_with("failurePhase: Build"));
        assert!(!text.contains("failureLogs"));
    }

    #[tokio::test]
    async fn posts_to_chat_post_message() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat.postMessage")
            .match_header("authorization", "Bearer xoxb-test")
            .match_body(Matcher::PartialJson(json!({"channel": "master-problems", "mrkdwn": true})))
            .with_status(200)
            .with_body(r#"{"ok": true}"#)
            .create_async()
            .await;

        SlackNotifier::new(&server.url(), "xoxb-test")
            .send(&target(), &payload())
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn slack_error_body_is_a_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat.postMessage")
            .with_status(200)
            .with_body(r#"{"ok": false, "error": "channel_not_found"}"#)
            .create_async()
            .await;

        let err = SlackNotifier::new(&server.url(), "xoxb-test")
            .send(&target(), &payload())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("channel_not_found"));
    }

    #[tokio::test]
    async fn log_notifier_never_fails() {
        assert!(LogNotifier.send(&target(), &payload()).await.is_ok());
    }
}
