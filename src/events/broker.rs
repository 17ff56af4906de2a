//! AMQP consumption of control-plane notifications
//!
//! Each exchange gets its own connection, an exclusive server-named queue
//! bound with `#`, and manual acknowledgement. A dropped connection is
//! re-established with exponential backoff forever; the consumer only stops
//! when the shutdown signal fires.

use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties, Consumer, ExchangeKind};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::EventProcessor;
use crate::retry::{retry_while, RetryConfig};
use crate::{Error, Result};

/// Exchange carrying API, application, subscription and policy notifications
pub const NOTIFICATION_EXCHANGE: &str = "notification";

/// Exchange carrying key-manager configuration changes
pub const KEY_MANAGER_EXCHANGE: &str = "keymanager";

/// Exchanges the agent consumes
pub const EXCHANGES: [&str; 2] = [NOTIFICATION_EXCHANGE, KEY_MANAGER_EXCHANGE];

const BINDING_KEY: &str = "#";

/// Consumer of one exchange
#[derive(Debug, Clone)]
pub struct BrokerConsumer {
    url: String,
    exchange: String,
    processor: EventProcessor,
}

impl BrokerConsumer {
    /// Consumer of `exchange` on the broker at `url`
    pub fn new(url: impl Into<String>, exchange: impl Into<String>, processor: EventProcessor) -> Self {
        Self {
            url: url.into(),
            exchange: exchange.into(),
            processor,
        }
    }

    async fn subscribe(&self) -> Result<(Connection, Consumer)> {
        let broker_err = |e: lapin::Error| Error::broker(&self.exchange, e.to_string());

        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(broker_err)?;
        let channel = connection.create_channel().await.map_err(broker_err)?;
        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(broker_err)?;
        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(broker_err)?;
        channel
            .queue_bind(
                queue.name().as_str(),
                &self.exchange,
                BINDING_KEY,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(broker_err)?;
        let consumer = channel
            .basic_consume(
                queue.name().as_str(),
                &format!("apk-agent-{}", self.exchange),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(broker_err)?;

        info!(queue = queue.name().as_str(), "Subscribed to exchange");
        Ok((connection, consumer))
    }

    /// Consume until `shutdown` flips to true
    ///
    /// Returns once shut down; connection failures are retried indefinitely.
    #[instrument(skip_all, fields(exchange = %self.exchange))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let retry = RetryConfig::infinite();
        loop {
            let subscribe = retry_while(&retry, "broker_subscribe", Error::is_retryable, || self.subscribe());
            let (connection, mut consumer) = tokio::select! {
                result = subscribe => result?,
                _ = shutdown.changed() => return Ok(()),
            };

            loop {
                let delivery = tokio::select! {
                    next = consumer.next() => next,
                    _ = shutdown.changed() => {
                        if let Err(e) = connection.close(0, "shutdown").await {
                            debug!(error = %e, "Broker connection already closed");
                        }
                        return Ok(());
                    }
                };
                let delivery = match delivery {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => {
                        warn!(error = %e, "Broker delivery failed, reconnecting");
                        break;
                    }
                    None => {
                        warn!("Broker consumer closed, reconnecting");
                        break;
                    }
                };

                let outcome = self.processor.process(&delivery.data).await;
                debug!(?outcome, "Processed delivery");
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    warn!(error = %e, "Failed to acknowledge delivery, reconnecting");
                    break;
                }
            }
        }
    }
}

/// One consumer per exchange of [`EXCHANGES`]
pub fn consumers(url: &str, processor: &EventProcessor) -> Vec<BrokerConsumer> {
    EXCHANGES
        .iter()
        .map(|exchange| BrokerConsumer::new(url, *exchange, processor.clone()))
        .collect()
}
