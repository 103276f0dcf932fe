//! AMQP (RabbitMQ) broker implementation.
//!
//! Each session owns one connection and one channel. Topology (durable
//! topic exchange, durable queue, wildcard binding) is declared on every
//! session, so a broker restart that lost non-durable state is repaired on
//! reconnect.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
        BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    uri::AMQPUri,
    Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use tracing::{debug, info, warn};

use super::{AckDecision, Broker, BusError, Delivery, Result, Session};
use crate::config::BrokerConfig;

/// Queue argument naming the exchange rejected messages are routed to.
const DEAD_LETTER_ARG: &str = "x-dead-letter-exchange";

/// Broker backed by RabbitMQ.
pub struct AmqpBroker {
    config: BrokerConfig,
    consumer_tag: String,
}

impl AmqpBroker {
    pub fn new(config: BrokerConfig) -> Self {
        let consumer_tag = format!("weather-consumer-{}", uuid::Uuid::new_v4());
        Self {
            config,
            consumer_tag,
        }
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Connection URI built field by field, so credentials never need
    /// percent-encoding.
    fn uri(&self) -> AMQPUri {
        let mut uri = AMQPUri::default();
        uri.authority.host = self.config.host.clone();
        uri.authority.port = self.config.port;
        uri.authority.userinfo.username = self.config.user.clone();
        uri.authority.userinfo.password = self.config.password.clone();
        uri.vhost = self.config.vhost.clone();
        uri.query.heartbeat = Some(self.config.heartbeat_secs);
        uri.query.connection_timeout = Some(self.config.connect_timeout_ms);
        uri
    }

    fn queue_arguments(&self) -> FieldTable {
        let mut args = FieldTable::default();
        if let Some(dlx) = &self.config.dead_letter_exchange {
            args.insert(
                DEAD_LETTER_ARG.into(),
                AMQPValue::LongString(dlx.as_str().into()),
            );
        }
        args
    }

    /// Declare exchange, queue, binding, and prefetch on a fresh channel.
    async fn declare_topology(&self, channel: &Channel) -> Result<()> {
        let config = &self.config;

        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Topology(format!("Failed to declare exchange: {}", e)))?;

        channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                self.queue_arguments(),
            )
            .await
            .map_err(|e| BusError::Topology(format!("Failed to declare queue: {}", e)))?;

        channel
            .queue_bind(
                &config.queue,
                &config.exchange,
                &config.binding_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Topology(format!("Failed to bind queue: {}", e)))?;

        channel
            .basic_qos(config.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BusError::Topology(format!("Failed to set prefetch: {}", e)))?;

        info!(
            exchange = %config.exchange,
            queue = %config.queue,
            binding_key = %config.binding_key,
            prefetch = config.prefetch,
            "Bound queue to exchange"
        );

        Ok(())
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn establish(&self) -> Result<Box<dyn Session>> {
        let connection = Connection::connect_uri(self.uri(), ConnectionProperties::default())
            .await
            .map_err(|e| BusError::Connection(format!("Failed to connect: {}", e)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))?;

        self.declare_topology(&channel).await?;

        let consumer = channel
            .basic_consume(
                &self.config.queue,
                &self.consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Consume(format!("Failed to start consumer: {}", e)))?;

        info!(
            url = %self.config.redacted_url(),
            queue = %self.config.queue,
            consumer_tag = %self.consumer_tag,
            "Consumer connected, processing messages"
        );

        Ok(Box::new(AmqpSession {
            connection,
            channel,
            consumer,
        }))
    }
}

/// A consuming RabbitMQ session.
pub struct AmqpSession {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl Session for AmqpSession {
    async fn next_delivery(&mut self) -> Result<Delivery> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => Ok(Delivery {
                tag: delivery.delivery_tag,
                routing_key: delivery.routing_key.to_string(),
                redelivered: delivery.redelivered,
                body: delivery.data,
            }),
            Some(Err(e)) => Err(e.into()),
            None => Err(BusError::StreamClosed),
        }
    }

    async fn settle(&mut self, delivery: &Delivery, decision: AckDecision) -> Result<()> {
        let tag = delivery.tag;
        let outcome = match decision {
            AckDecision::Ack => self.channel.basic_ack(tag, BasicAckOptions::default()).await,
            AckDecision::RejectNoRequeue => {
                self.channel
                    .basic_reject(tag, BasicRejectOptions { requeue: false })
                    .await
            }
            AckDecision::NackRequeue => {
                self.channel
                    .basic_nack(
                        tag,
                        BasicNackOptions {
                            multiple: false,
                            requeue: true,
                        },
                    )
                    .await
            }
        };

        outcome.map_err(|e| BusError::Settle {
            tag,
            message: e.to_string(),
        })
    }

    async fn close(&mut self) {
        if let Err(e) = self.channel.close(200, "consumer stopping").await {
            debug!(error = %e, "Channel already closed");
        }
        if let Err(e) = self.connection.close(200, "consumer stopping").await {
            warn!(error = %e, "Failed to close AMQP connection cleanly");
        }
    }
}
