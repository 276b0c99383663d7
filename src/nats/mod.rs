//! NATS JetStream integration
//!
//! Control actions arrive on a JetStream subject and are pulled through a
//! durable consumer.

mod consumer;

pub use consumer::NatsConsumer;
