//! Queued webhook dispatch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use super::discord::build_message;
use super::{WebhookError, WebhookPolicy};
use crate::config::WebhookConfig;
use crate::model::{Log, Webhook};
use crate::observability::metrics;
use crate::store::InstanceStore;

/// One captured log waiting to be announced.
#[derive(Debug, Clone)]
pub struct WebhookJob {
    pub log: Arc<Log>,
    pub webhook_ids: Vec<String>,
}

/// Cheap handle the ingestion server uses to enqueue jobs.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    tx: mpsc::Sender<WebhookJob>,
}

impl WebhookNotifier {
    /// Enqueue a notification without waiting. Returns whether it was queued.
    pub fn notify(&self, log: Arc<Log>, webhook_ids: &[String]) -> bool {
        if webhook_ids.is_empty() {
            return false;
        }

        let job = WebhookJob {
            log,
            webhook_ids: webhook_ids.to_vec(),
        };
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(log_id = %job.log.id, "Webhook queue full, notification dropped");
                metrics::record_webhook_dispatch("dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::debug!(log_id = %job.log.id, "Webhook queue closed, notification dropped");
                false
            }
        }
    }
}

/// Sends one notification to one webhook.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    policy: WebhookPolicy,
}

impl Dispatcher {
    pub fn new(config: &WebhookConfig) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("instance-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            policy: WebhookPolicy::from_config(config),
        })
    }

    /// Validate the URL, then POST the provider message for `log`.
    pub async fn dispatch(&self, webhook: &Webhook, log: &Log) -> Result<(), WebhookError> {
        let url = self.policy.validate(&webhook.url)?;
        let message = build_message(log);

        let response = self.client.post(url).json(&message).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::Status(status));
        }
        Ok(())
    }
}

/// Background worker draining the notification queue.
pub struct WebhookWorker<S> {
    rx: mpsc::Receiver<WebhookJob>,
    store: Arc<S>,
    dispatcher: Arc<Dispatcher>,
}

impl<S: InstanceStore> WebhookWorker<S> {
    /// Create the worker and the handle used to feed it.
    pub fn new(store: Arc<S>, config: &WebhookConfig) -> Result<(WebhookNotifier, Self), WebhookError> {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let worker = Self {
            rx,
            store,
            dispatcher: Arc::new(Dispatcher::new(config)?),
        };
        Ok((WebhookNotifier { tx }, worker))
    }

    /// Process jobs until shutdown, then drain what is queued and in flight.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Webhook worker starting");
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                job = self.rx.recv() => {
                    match job {
                        Some(job) => self.start(job, &mut in_flight).await,
                        None => break,
                    }
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                _ = shutdown.recv() => {
                    tracing::info!("Webhook worker received shutdown signal, draining queue");
                    self.rx.close();
                    break;
                }
            }
        }

        while let Some(job) = self.rx.recv().await {
            self.start(job, &mut in_flight).await;
        }
        while in_flight.join_next().await.is_some() {}

        tracing::info!("Webhook worker stopped");
    }

    async fn start(&self, job: WebhookJob, in_flight: &mut JoinSet<()>) {
        let webhooks = match self.store.get_webhooks_by_ids(&job.webhook_ids).await {
            Ok(webhooks) => webhooks,
            Err(e) => {
                tracing::error!(log_id = %job.log.id, error = %e, "Failed to load webhooks");
                metrics::record_webhook_dispatch("lookup_error");
                return;
            }
        };

        let missing = job.webhook_ids.len().saturating_sub(webhooks.len());
        if missing > 0 {
            tracing::debug!(log_id = %job.log.id, missing, "Skipping deleted webhooks");
        }

        for webhook in webhooks {
            let dispatcher = Arc::clone(&self.dispatcher);
            let log = Arc::clone(&job.log);
            in_flight.spawn(async move {
                match dispatcher.dispatch(&webhook, &log).await {
                    Ok(()) => {
                        tracing::debug!(webhook_id = %webhook.id, log_id = %log.id, "Webhook notified");
                        metrics::record_webhook_dispatch("delivered");
                    }
                    Err(e) => {
                        tracing::warn!(
                            webhook_id = %webhook.id,
                            instance_id = %log.instance_id,
                            error = %e,
                            "Webhook notification failed"
                        );
                        metrics::record_webhook_dispatch(e.label());
                    }
                }
            });
        }
    }
}
