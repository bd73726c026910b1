// Queue module for NATS JetStream integration

pub mod consumer;
pub mod nats;
pub mod publisher;

pub use consumer::{disposition, Disposition, JobConsumer, JobHandler, NatsJobConsumer};
pub use nats::NatsClient;
pub use publisher::{JobEnvelope, NatsQueueBackend, QueueBackend};
