// Message bus integration: JetStream work queue for publish requests and
// core NATS fan-out for status change events.

pub mod consumer;
pub mod dispatcher;
pub mod nats;

pub use consumer::{NatsPublishConsumer, PublishConsumer, PublishHandler};
pub use dispatcher::{
    NatsStatusPublisher, NatsTriggerDispatcher, StatusPublisher, TriggerDispatcher,
};
pub use nats::NatsClient;
