//! RabbitMQ transport built on the `x-delayed-message` exchange plugin.
//!
//! The delay travels in the `x-delay` header (milliseconds); the exchange
//! holds the message and routes it to the expiration queue once it is due.

use async_trait::async_trait;
use dashmap::DashMap;
use eb_common::AckNack;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    BasicQosOptions, BasicRejectOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{QueueError, Result};
use crate::{DelayedPublisher, QueueConsumer, ReceivedMessage};

const DELAYED_EXCHANGE_KIND: &str = "x-delayed-message";

/// Upper bound accepted by the delayed-message plugin
const MAX_DELAY: Duration = Duration::from_millis(u32::MAX as u64);

#[derive(Debug, Clone)]
pub struct AmqpSettings {
    pub url: String,
    pub exchange: String,
    pub queue: String,
    pub prefetch: u16,
    pub consumer_tag: String,
}

pub struct AmqpDelayedQueue {
    settings: AmqpSettings,
    connection: Connection,
    publish_channel: Channel,
    consume_channel: Channel,
    consumer: Mutex<Option<Consumer>>,
    pending: DashMap<u64, Acker>,
}

impl AmqpDelayedQueue {
    /// Connect, declare the delayed exchange and queue, and start consuming.
    pub async fn connect(settings: AmqpSettings) -> Result<Self> {
        let connection = Connection::connect(&settings.url, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        let publish_channel = connection.create_channel().await?;
        declare_topology(&publish_channel, &settings).await?;
        publish_channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        let consume_channel = connection.create_channel().await?;
        consume_channel
            .basic_qos(settings.prefetch, BasicQosOptions::default())
            .await?;
        let consumer = consume_channel
            .basic_consume(
                &settings.queue,
                &settings.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            exchange = %settings.exchange,
            queue = %settings.queue,
            prefetch = settings.prefetch,
            "Connected to RabbitMQ"
        );

        Ok(Self {
            settings,
            connection,
            publish_channel,
            consume_channel,
            consumer: Mutex::new(Some(consumer)),
            pending: DashMap::new(),
        })
    }
}

async fn declare_topology(channel: &Channel, settings: &AmqpSettings) -> Result<()> {
    let mut exchange_args = FieldTable::default();
    exchange_args.insert("x-delayed-type".into(), AMQPValue::LongString("direct".into()));

    channel
        .exchange_declare(
            &settings.exchange,
            ExchangeKind::Custom(DELAYED_EXCHANGE_KIND.to_string()),
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            exchange_args,
        )
        .await?;

    channel
        .queue_declare(
            &settings.queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    // Routing key is the queue name
    channel
        .queue_bind(
            &settings.queue,
            &settings.exchange,
            &settings.queue,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    Ok(())
}

fn delay_millis(delay: Duration) -> Result<i64> {
    if delay > MAX_DELAY {
        return Err(QueueError::DelayOutOfRange {
            requested: delay,
            max: MAX_DELAY,
        });
    }
    // Bounded by u32::MAX above
    Ok(delay.as_millis() as i64)
}

fn delay_headers(delay_ms: i64) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert("x-delay".into(), AMQPValue::LongLongInt(delay_ms));
    headers
}

#[async_trait]
impl DelayedPublisher for AmqpDelayedQueue {
    fn identifier(&self) -> &str {
        &self.settings.exchange
    }

    fn max_delay(&self) -> Option<Duration> {
        Some(MAX_DELAY)
    }

    async fn publish_delayed(&self, payload: Vec<u8>, delay: Duration) -> Result<()> {
        let delay_ms = delay_millis(delay)?;
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2)
            .with_headers(delay_headers(delay_ms));

        let confirmation = self
            .publish_channel
            .basic_publish(
                &self.settings.exchange,
                &self.settings.queue,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(QueueError::Publish("broker did not confirm message".into()));
        }

        debug!(
            exchange = %self.settings.exchange,
            delay_ms,
            "Published delayed message"
        );
        Ok(())
    }
}

#[async_trait]
impl QueueConsumer for AmqpDelayedQueue {
    fn identifier(&self) -> &str {
        &self.settings.queue
    }

    async fn receive(&self) -> Result<Option<ReceivedMessage>> {
        let mut guard = self.consumer.lock().await;
        let Some(consumer) = guard.as_mut() else {
            return Ok(None);
        };

        match consumer.next().await {
            Some(Ok(delivery)) => {
                let delivery_tag = delivery.delivery_tag;
                self.pending.insert(delivery_tag, delivery.acker);
                Ok(Some(ReceivedMessage {
                    payload: delivery.data,
                    delivery_tag,
                    redelivered: delivery.redelivered,
                }))
            }
            Some(Err(e)) => Err(QueueError::Consume(e.to_string())),
            None => Ok(None),
        }
    }

    async fn settle(&self, delivery_tag: u64, outcome: AckNack) -> Result<()> {
        let (_, acker) = self
            .pending
            .remove(&delivery_tag)
            .ok_or(QueueError::UnknownDelivery(delivery_tag))?;

        match outcome {
            AckNack::Ack => {
                acker.ack(BasicAckOptions::default()).await?;
            }
            AckNack::Nack => {
                acker
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await?;
            }
            AckNack::Reject => {
                acker.reject(BasicRejectOptions { requeue: false }).await?;
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.consumer.lock().await.take().is_some() {
            if let Err(e) = self
                .consume_channel
                .basic_cancel(&self.settings.consumer_tag, BasicCancelOptions::default())
                .await
            {
                warn!(error = %e, "Failed to cancel consumer");
            }
        }

        if !self.pending.is_empty() {
            warn!(
                unsettled = self.pending.len(),
                "Closing with unsettled deliveries, broker will redeliver them"
            );
        }

        self.consume_channel.close(200, "shutdown").await?;
        self.publish_channel.close(200, "shutdown").await?;
        self.connection.close(200, "shutdown").await?;
        info!("Closed RabbitMQ connection");
        Ok(())
    }
}
