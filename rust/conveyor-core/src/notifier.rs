use crate::JobEvent;
use anyhow::Result;
use async_trait::async_trait;
use conveyor_common::spawn_no_wait;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Delivers a JSON body to a callback endpoint.
#[async_trait]
pub trait NotificationTransport: Clone + Send + Sync + 'static {
    async fn deliver(&self, target: &Url, body: &Value) -> Result<()>;
}

/// A [NotificationTransport] that POSTs the body as JSON. Any non-2xx
/// response counts as a failed delivery.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport whose requests give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Ok(HttpTransport {
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl NotificationTransport for HttpTransport {
    async fn deliver(&self, target: &Url, body: &Value) -> Result<()> {
        self.client
            .post(target.clone())
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Best-effort, single-attempt delivery of terminal [JobEvent]s.
///
/// Delivery failures are logged and swallowed; they never touch the job
/// record and are never retried.
#[derive(Debug, Clone)]
pub struct Notifier<T: NotificationTransport> {
    transport: T,
}

impl<T> Notifier<T>
where
    T: NotificationTransport,
{
    pub fn new(transport: T) -> Self {
        Notifier { transport }
    }

    /// Fire-and-forget delivery of `event` to `target`. Returns
    /// immediately; the delivery runs on its own task.
    pub fn notify(&self, target: Url, event: JobEvent) {
        let notifier = self.clone();
        spawn_no_wait(async move {
            if let Err(error) = notifier.deliver(&target, &event).await {
                warn!(
                    "Failed to deliver {} notification for job {} to {}: {}",
                    event.status(),
                    event.id(),
                    target,
                    error
                );
            }
        });
    }

    /// Delivers `event` to `target` and reports the outcome.
    pub async fn deliver(&self, target: &Url, event: &JobEvent) -> Result<()> {
        let body = serde_json::to_value(event)?;
        self.transport.deliver(target, &body).await?;
        debug!("Delivered {} notification for job {}", event.status(), event.id());
        Ok(())
    }
}
