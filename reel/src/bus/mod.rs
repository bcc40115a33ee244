//! Message bus boundary between pipeline stages.
//!
//! Stages only consume from and publish to named queues. The bus is assumed to deliver at least
//! once per queue, with no ordering across queues, and to redeliver messages that are rejected
//! with requeue.

mod base;
pub mod memory;
pub(crate) mod settle;

pub use base::{Delivery, MessageBus, Subscription};
