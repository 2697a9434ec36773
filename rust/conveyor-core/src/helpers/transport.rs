use crate::NotificationTransport;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

/// A [NotificationTransport] that remembers every delivery attempt and
/// optionally reports each one as failed.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    deliveries: Arc<Mutex<Vec<(Url, Value)>>>,
    failure: Option<String>,
}

impl RecordingTransport {
    /// A transport whose deliveries are recorded and then fail with
    /// `message`.
    pub fn failing<M: Into<String>>(message: M) -> Self {
        RecordingTransport {
            failure: Some(message.into()),
            ..Default::default()
        }
    }

    pub async fn deliveries(&self) -> Vec<(Url, Value)> {
        self.deliveries.lock().await.clone()
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn deliver(&self, target: &Url, body: &Value) -> Result<()> {
        self.deliveries
            .lock()
            .await
            .push((target.clone(), body.clone()));

        match &self.failure {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(()),
        }
    }
}
