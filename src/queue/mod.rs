//! Durable queue adapter with at-least-once delivery semantics.
//!
//! Ingress enqueues verified events here and returns 200; workers receive,
//! process, and ack. Anything not acked within the visibility timeout is
//! redelivered, and records that exhaust their redelivery budget are parked
//! in a dead-letter directory rather than looping forever.

pub mod durable;
pub mod message;

pub use durable::{DurableQueue, QueueConfig, QueueError};
pub use message::{delivery_id_is_safe, EventRecord, QueueMessage};
