//! NATS action consumer
//!
//! Pulls action messages from a durable JetStream consumer and feeds them to
//! the dispatcher. Every message is acked once it has been handed off: bad
//! messages are dropped rather than redelivered forever.

use crate::action::Dispatcher;
use crate::error::ControllerError;
use crate::metrics::ControllerMetrics;

use async_nats::connection::State;
use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy, consumer::PullConsumer};
use async_nats::Client;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Durable pull consumer for control actions
pub struct NatsConsumer {
    client: Client,
    consumer: PullConsumer,
    stream: String,
    metrics: ControllerMetrics,
}

impl NatsConsumer {
    /// Connect and bind to (creating if needed) `stream` and the durable
    /// consumer `durable` filtered on `subject`
    pub async fn connect(
        servers: &str,
        stream: &str,
        subject: &str,
        durable: &str,
        metrics: ControllerMetrics,
    ) -> Result<Arc<Self>, ControllerError> {
        info!(servers, stream, subject, durable, "Connecting to NATS");

        let client = async_nats::connect(servers)
            .await
            .map_err(|e| ControllerError::NatsConnectionFailed(Box::new(e)))?;

        let consumer_err = |source: Box<dyn std::error::Error + Send + Sync>| ControllerError::NatsConsumerFailed {
            stream: stream.to_string(),
            source,
        };

        let js = jetstream::new(client.clone());
        let js_stream = js
            .get_or_create_stream(jetstream::stream::Config {
                name: stream.to_string(),
                subjects: vec![subject.to_string()],
                ..Default::default()
            })
            .await
            .map_err(|e| consumer_err(Box::new(e)))?;

        let consumer = js_stream
            .get_or_create_consumer(
                durable,
                pull::Config {
                    durable_name: Some(durable.to_string()),
                    filter_subject: subject.to_string(),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| consumer_err(Box::new(e)))?;

        metrics.set_nats_connected(true);
        info!(stream, durable, "Bound to JetStream consumer");

        Ok(Arc::new(Self {
            client,
            consumer,
            stream: stream.to_string(),
            metrics,
        }))
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == State::Connected
    }

    /// Pull messages until the stream ends or fails
    pub async fn run(&self, dispatcher: Dispatcher) -> Result<(), ControllerError> {
        let mut messages = self
            .consumer
            .messages()
            .await
            .map_err(|e| ControllerError::NatsConsumerFailed {
                stream: self.stream.clone(),
                source: Box::new(e),
            })?;

        info!(stream = %self.stream, "Consuming actions");

        while let Some(message) = messages.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    self.metrics.set_nats_connected(self.is_connected());
                    self.metrics.record_error("nats_consumer");
                    warn!(error = %e, "Failed to pull message");
                    continue;
                }
            };

            debug!(subject = %message.subject, bytes = message.payload.len(), "Message received");
            dispatcher.handle(&message.payload).await;

            if let Err(e) = message.ack().await {
                self.metrics.record_error("nats_ack");
                warn!(error = %e, "Failed to ack message");
            }
        }

        self.metrics.set_nats_connected(false);
        Err(ControllerError::NatsConsumerFailed {
            stream: self.stream.clone(),
            source: "message stream ended".into(),
        })
    }

    /// Drain the connection
    pub async fn close(&self) {
        info!("Closing NATS connection");
        if let Err(e) = self.client.drain().await {
            warn!(error = %e, "Failed to drain NATS connection");
        }
        self.metrics.set_nats_connected(false);
    }
}
