use std::sync::Arc;

use chrono_tz::Tz;
use serenity::all::{ChannelId, Http};
use serenity::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, info, warn};

use crate::models::{DeliveryBatch, EarningsEvent};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification sink unavailable: {0}")]
    SinkUnavailable(String),
}

#[derive(Debug, Error)]
#[error("delivery worker has stopped; batch for {0} dropped")]
pub struct DeliveryClosed(pub chrono::NaiveDate);

/// Downstream channel that receives formatted alert messages.
#[async_trait]
pub trait EarningsNotifier: Send + Sync {
    /// Send `messages` to `channel_id` in order, stopping at the first failure.
    async fn send(&self, channel_id: u64, messages: &[String]) -> Result<(), NotifyError>;
}

pub struct DiscordNotifier {
    http: Arc<Http>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl EarningsNotifier for DiscordNotifier {
    async fn send(&self, channel_id: u64, messages: &[String]) -> Result<(), NotifyError> {
        let channel = ChannelId::new(channel_id);
        for content in messages {
            channel
                .say(&self.http, content)
                .await
                .map_err(|e| NotifyError::SinkUnavailable(e.to_string()))?;
        }
        Ok(())
    }
}

/// Producer side of the delivery queue. Never blocks.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: UnboundedSender<DeliveryBatch>,
}

impl DeliveryQueue {
    pub fn push(&self, batch: DeliveryBatch) -> Result<(), DeliveryClosed> {
        let date = batch.target_date;
        self.tx.send(batch).map_err(|_| DeliveryClosed(date))
    }
}

/// Build the unbounded FIFO connecting the scheduler to the delivery worker.
pub fn delivery_queue() -> (DeliveryQueue, UnboundedReceiver<DeliveryBatch>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DeliveryQueue { tx }, rx)
}

/// Drains batches one at a time and hands them to the notifier.
pub struct DeliveryWorker {
    rx: UnboundedReceiver<DeliveryBatch>,
    notifier: Arc<dyn EarningsNotifier>,
    channel_id: u64,
    timezone: Tz,
}

impl DeliveryWorker {
    pub fn new(
        rx: UnboundedReceiver<DeliveryBatch>,
        notifier: Arc<dyn EarningsNotifier>,
        channel_id: u64,
        timezone: Tz,
    ) -> Self {
        Self {
            rx,
            notifier,
            channel_id,
            timezone,
        }
    }

    /// Run until every queue producer has been dropped.
    pub async fn run(mut self) {
        while let Some(batch) = self.rx.recv().await {
            if let Err(e) = self.deliver(&batch).await {
                // Not retried: these tickers are already recorded as notified.
                error!(
                    "dropping earnings batch for {} ({} events): {}",
                    batch.target_date,
                    batch.events.len(),
                    e
                );
            }
        }
        warn!("Delivery queue closed; earnings delivery worker exiting");
    }

    pub async fn deliver(&self, batch: &DeliveryBatch) -> Result<(), NotifyError> {
        let messages: Vec<String> = batch
            .events
            .iter()
            .map(|ev| format_alert(ev, self.timezone))
            .collect();

        self.notifier.send(self.channel_id, &messages).await?;
        info!(
            "Delivered {} earnings alerts for {} to channel {}",
            messages.len(),
            batch.target_date,
            self.channel_id
        );
        Ok(())
    }
}

pub fn format_alert(event: &EarningsEvent, timezone: Tz) -> String {
    format!(
        "📣 **Earnings Alert!**\n`{}` ({}) reports on `{}`",
        event.ticker,
        event.company_name,
        event.local_timestamp(timezone)
    )
}
