//! Notification delivery.
//!
//! Delivery goes through the [`Notifier`] trait so the pipeline does not
//! care whether mails reach an HTTP mail gateway, the log, or a test
//! recorder. [`NotifyService`] owns the send policy: which templates go to
//! whom, and that delivery problems never propagate into the pipeline.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use archivio_common::config::NotifyConfig;
use archivio_common::types::FailureCause;
use archivio_common::{Error, Result};

use crate::message::{Message, NotifyContext, Template};

/// A notification sink
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Deliver one message
    async fn send(&self, message: &Message) -> Result<()>;
}

/// Delivers messages to an HTTP mail gateway as JSON
pub struct HttpNotifier {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpNotifier {
    pub fn new(endpoint: impl Into<String>, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(message)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout
                } else {
                    Error::ConnectionFailed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::notify(format!(
                "mail gateway returned {status}: {body}"
            )));
        }

        debug!("Delivered '{}' to {}", message.subject, message.to);
        Ok(())
    }
}

/// Log-only sink used when no mail endpoint is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &Message) -> Result<()> {
        info!(
            "Notification (no mail endpoint configured): to={} subject='{}'",
            message.to, message.subject
        );
        Ok(())
    }
}

/// Records messages in memory. For tests.
#[derive(Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Message>>,
}

impl MemoryNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn send(&self, message: &Message) -> Result<()> {
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

/// Send policy over a notifier
pub struct NotifyService {
    notifier: Arc<dyn Notifier>,
    config: NotifyConfig,
}

impl NotifyService {
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>, config: NotifyConfig) -> Self {
        Self { notifier, config }
    }

    /// Pick the notifier the config implies: HTTP delivery when a mail
    /// endpoint is set, log-only otherwise.
    pub fn from_config(config: NotifyConfig) -> Result<Self> {
        let notifier: Arc<dyn Notifier> = match &config.mail_endpoint {
            Some(endpoint) => Arc::new(HttpNotifier::new(endpoint.clone(), config.timeout_ms)?),
            None => Arc::new(LogNotifier),
        };
        Ok(Self { notifier, config })
    }

    /// Send the user and desk mails for a failed archive: exactly two
    /// messages, one to the initiator and one to the support inbox.
    ///
    /// Delivery problems are logged and swallowed; a lost mail must not
    /// change the outcome of the run.
    pub async fn send_failure_pair(&self, cause: FailureCause, ctx: &NotifyContext) {
        let (user_template, desk_template) = Template::user_desk_pair(cause);
        let user_message = user_template.render(
            ctx,
            &ctx.user_email,
            &self.config.from_addr,
            &self.config.support_addr,
        );
        let desk_message = desk_template.render(
            ctx,
            &self.config.support_addr,
            &self.config.from_addr,
            &self.config.support_addr,
        );
        self.deliver(&user_message).await;
        self.deliver(&desk_message).await;
    }

    /// Tell the initiator their archive finished.
    pub async fn send_success(&self, ctx: &NotifyContext) {
        let message = Template::ArchiveSuccess.render(
            ctx,
            &ctx.user_email,
            &self.config.from_addr,
            &self.config.support_addr,
        );
        self.deliver(&message).await;
    }

    async fn deliver(&self, message: &Message) {
        if let Err(e) = self.notifier.send(message).await {
            warn!(
                "Notification via {} to {} failed: {}",
                self.notifier.name(),
                message.to,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::NotifyDetail;
    use archivio_common::types::{NodeId, RegistrationId, UserId};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context() -> NotifyContext {
        NotifyContext {
            user: UserId::new("user1234").unwrap(),
            user_email: "user@example.org".to_string(),
            registration: RegistrationId::new("regabc12").unwrap(),
            title: "Glacier Melt Study".to_string(),
            source: NodeId::new("node1234").unwrap(),
            detail: NotifyDetail::None,
        }
    }

    fn service_with_recorder() -> (Arc<MemoryNotifier>, NotifyService) {
        let recorder = Arc::new(MemoryNotifier::new());
        let service = NotifyService::new(recorder.clone(), NotifyConfig::default());
        (recorder, service)
    }

    #[tokio::test]
    async fn test_failure_pair_sends_exactly_two() {
        let (recorder, service) = service_with_recorder();

        service
            .send_failure_pair(FailureCause::Copy, &context())
            .await;

        let sent = recorder.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, "user@example.org");
        assert!(sent[0].html);
        assert_eq!(sent[1].to, "support@archivio.example");
        assert!(!sent[1].html);
        assert_ne!(sent[0].subject, sent[1].subject);
    }

    #[tokio::test]
    async fn test_failure_pair_templates_differ_per_cause() {
        let (recorder, service) = service_with_recorder();

        service
            .send_failure_pair(FailureCause::SizeExceeded, &context())
            .await;
        service
            .send_failure_pair(FailureCause::Stalled, &context())
            .await;

        let sent = recorder.sent();
        assert_eq!(sent.len(), 4);
        assert!(sent[0].body.contains("could not be archived because"));
        assert!(sent[2].body.contains("did not finish within the allowed time"));
    }

    #[tokio::test]
    async fn test_success_sends_one() {
        let (recorder, service) = service_with_recorder();

        service.send_success(&context()).await;

        let sent = recorder.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "user@example.org");
        assert!(sent[0].subject.contains("complete"));
    }

    #[tokio::test]
    async fn test_http_notifier_posts_json() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mail"))
            .and(body_partial_json(json!({
                "to": "user@example.org",
                "from": "notifications@archivio.example",
                "html": true
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let notifier = HttpNotifier::new(format!("{}/mail", mock_server.uri()), 5_000).unwrap();
        let message = Template::ArchiveSuccess.render(
            &context(),
            "user@example.org",
            "notifications@archivio.example",
            "support@archivio.example",
        );
        notifier.send(&message).await.unwrap();
    }

    #[tokio::test]
    async fn test_http_notifier_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mail"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let notifier = HttpNotifier::new(format!("{}/mail", mock_server.uri()), 5_000).unwrap();
        let message = Template::ArchiveSuccess.render(
            &context(),
            "user@example.org",
            "notifications@archivio.example",
            "support@archivio.example",
        );
        let err = notifier.send(&message).await.unwrap_err();
        assert!(matches!(err, Error::Notify(_)));
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let config = NotifyConfig {
            mail_endpoint: Some(format!("{}/mail", mock_server.uri())),
            ..NotifyConfig::default()
        };
        let service = NotifyService::from_config(config).unwrap();

        // Must not error or panic even though every delivery fails
        service
            .send_failure_pair(FailureCause::Copy, &context())
            .await;
        service.send_success(&context()).await;
    }
}
