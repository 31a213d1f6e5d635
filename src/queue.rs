//! Message-queue pass-through.
//!
//! Publishes frontend messages to a Pub/Sub-emulator-compatible REST
//! endpoint and, when enabled, drains a subscription in a background task.
//! No broker logic lives here: the service forwards payloads verbatim
//! (base64-encoded on the wire) and acknowledges what it pulls.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::config::QueueConfig;
use crate::errors::{Result, TwistwatchError};
use crate::retry::{QueueRetryPolicy, RetryConfigBuilder, RetryExecutor};

/// Client for one topic/subscription pair on the emulator.
pub struct QueueClient {
    http: reqwest::Client,
    base: String,
    project: String,
    topic: String,
    subscription: String,
    pull_interval: Duration,
}

impl QueueClient {
    /// Build a client when an emulator host is configured; None disables
    /// the pass-through entirely.
    pub fn from_config(config: &QueueConfig) -> Result<Option<Self>> {
        let Some(ref host) = config.emulator_host else {
            return Ok(None);
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TwistwatchError::internal_with("failed to build HTTP client", e))?;

        Ok(Some(Self {
            http,
            base: format!("http://{host}/v1"),
            project: config.project.clone(),
            topic: config.topic.clone(),
            subscription: config.subscription.clone(),
            pull_interval: config.pull_interval,
        }))
    }

    fn topic_path(&self) -> String {
        format!("projects/{}/topics/{}", self.project, self.topic)
    }

    fn subscription_path(&self) -> String {
        format!("projects/{}/subscriptions/{}", self.project, self.subscription)
    }

    /// Create the topic if it does not exist yet.
    pub async fn ensure_topic(&self) -> Result<()> {
        let url = format!("{}/{}", self.base, self.topic_path());
        let resp = self.http.put(&url).json(&json!({})).send().await?;

        match resp.status().as_u16() {
            200 => {
                info!(topic = %self.topic, "topic created");
                Ok(())
            }
            409 => Ok(()), // already exists
            status => Err(TwistwatchError::queue(
                "create topic",
                format!("unexpected status {status}"),
            )),
        }
    }

    /// Create the subscription if it does not exist yet.
    pub async fn ensure_subscription(&self) -> Result<()> {
        let url = format!("{}/{}", self.base, self.subscription_path());
        let body = json!({ "topic": self.topic_path() });
        let resp = self.http.put(&url).json(&body).send().await?;

        match resp.status().as_u16() {
            200 => {
                info!(subscription = %self.subscription, "subscription created");
                Ok(())
            }
            409 => Ok(()),
            status => Err(TwistwatchError::queue(
                "create subscription",
                format!("unexpected status {status}"),
            )),
        }
    }

    /// Publish one message, returning the broker-assigned id.
    pub async fn publish(&self, message: &str) -> Result<String> {
        let url = format!("{}/{}:publish", self.base, self.topic_path());
        let body = json!({
            "messages": [ { "data": BASE64.encode(message) } ]
        });

        let executor = RetryExecutor::new(
            RetryConfigBuilder::new()
                .max_attempts(2)
                .initial_delay(Duration::from_millis(250))
                .build(),
        );

        let value: Value = executor
            .execute(
                || async {
                    let resp = self.http.post(&url).json(&body).send().await?;
                    let resp = resp.error_for_status()?;
                    resp.json::<Value>().await
                },
                QueueRetryPolicy,
            )
            .await?;

        parse_publish_response(&value)
    }

    /// Pull pending messages and acknowledge them, returning the decoded
    /// payloads.
    pub async fn pull_and_ack(&self) -> Result<Vec<String>> {
        let url = format!("{}/{}:pull", self.base, self.subscription_path());
        let body = json!({ "maxMessages": 10, "returnImmediately": true });

        let resp = self.http.post(&url).json(&body).send().await?;
        let resp = resp.error_for_status().map_err(TwistwatchError::from)?;
        let value: Value = resp.json().await?;

        let received = parse_pull_response(&value);
        if received.is_empty() {
            return Ok(vec![]);
        }

        let ack_ids: Vec<&str> = received.iter().map(|(ack, _)| ack.as_str()).collect();
        let ack_url = format!("{}/{}:acknowledge", self.base, self.subscription_path());
        self.http
            .post(&ack_url)
            .json(&json!({ "ackIds": ack_ids }))
            .send()
            .await?
            .error_for_status()
            .map_err(TwistwatchError::from)?;

        Ok(received.into_iter().map(|(_, payload)| payload).collect())
    }
}

/// Extract the first message id from a publish response.
fn parse_publish_response(value: &Value) -> Result<String> {
    value
        .get("messageIds")
        .and_then(|ids| ids.as_array())
        .and_then(|ids| ids.first())
        .and_then(|id| id.as_str())
        .map(|id| id.to_string())
        .ok_or_else(|| TwistwatchError::queue("publish", "response carried no message id"))
}

/// Extract (ackId, decoded payload) pairs from a pull response.
/// Messages with undecodable payloads keep their ack id so they still get
/// acknowledged, with a placeholder body.
fn parse_pull_response(value: &Value) -> Vec<(String, String)> {
    let Some(messages) = value.get("receivedMessages").and_then(|m| m.as_array()) else {
        return vec![];
    };

    messages
        .iter()
        .filter_map(|entry| {
            let ack_id = entry.get("ackId")?.as_str()?.to_string();
            let data = entry
                .get("message")
                .and_then(|m| m.get("data"))
                .and_then(|d| d.as_str())
                .unwrap_or("");
            let payload = BASE64
                .decode(data)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .unwrap_or_else(|| "<undecodable payload>".to_string());
            Some((ack_id, payload))
        })
        .collect()
}

/// Run the subscriber loop until the process exits, logging every payload.
/// Mirrors the original daemon-thread subscriber: errors are logged and the
/// loop keeps going.
pub fn spawn_subscriber(client: Arc<QueueClient>) {
    tokio::spawn(async move {
        info!(subscription = %client.subscription, "queue subscriber started");
        loop {
            match client.pull_and_ack().await {
                Ok(payloads) => {
                    for payload in payloads {
                        info!(%payload, "received queue message");
                    }
                }
                Err(e) => {
                    error!(error = %e, "queue pull failed");
                }
            }
            tokio::time::sleep(client.pull_interval).await;
        }
    });
}

/// Create topic and subscription at startup, tolerating an unreachable
/// emulator (the pass-through endpoints will surface errors per-request).
pub async fn ensure_infrastructure(client: &QueueClient) {
    if let Err(e) = client.ensure_topic().await {
        warn!(error = %e, "could not ensure topic");
    }
    if let Err(e) = client.ensure_subscription().await {
        warn!(error = %e, "could not ensure subscription");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> QueueClient {
        let config = QueueConfig {
            emulator_host: Some("localhost:8085".to_string()),
            ..QueueConfig::default()
        };
        QueueClient::from_config(&config).unwrap().unwrap()
    }

    #[test]
    fn disabled_without_host() {
        let config = QueueConfig::default();
        assert!(QueueClient::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn paths_follow_emulator_layout() {
        let c = client();
        assert_eq!(c.topic_path(), "projects/twistwatch/topics/frontend-to-backend");
        assert_eq!(
            c.subscription_path(),
            "projects/twistwatch/subscriptions/backend-sub"
        );
        assert_eq!(c.base, "http://localhost:8085/v1");
    }

    #[test]
    fn publish_response_parsing() {
        let ok = json!({ "messageIds": ["42"] });
        assert_eq!(parse_publish_response(&ok).unwrap(), "42");

        let empty = json!({ "messageIds": [] });
        assert!(parse_publish_response(&empty).is_err());

        let missing = json!({});
        assert!(parse_publish_response(&missing).is_err());
    }

    #[test]
    fn pull_response_parsing() {
        let value = json!({
            "receivedMessages": [
                { "ackId": "a1", "message": { "data": BASE64.encode("hello") } },
                { "ackId": "a2", "message": { "data": "!!!not-base64!!!" } }
            ]
        });
        let parsed = parse_pull_response(&value);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], ("a1".to_string(), "hello".to_string()));
        assert_eq!(parsed[1].0, "a2");
        assert_eq!(parsed[1].1, "<undecodable payload>");

        assert!(parse_pull_response(&json!({})).is_empty());
    }
}
