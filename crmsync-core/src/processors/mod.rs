//! Processors of the pipeline.
//!
//! Broker side:
//!
//! - `EventDispatcher`: receives CRM change events, hands them to the publisher
//! - `EventPublisher`: records events and fans out signed deliveries
//! - `HealthTracker`: counts delivery outcomes, deactivates failing subscriptions
//!
//! Consumer side:
//!
//! - `ConsumerIntake`: verifies deliveries and enqueues delayed jobs
//! - `WorkerPool`: runs `RetryWorker`s that fetch, transform and push jobs

pub mod delivery_client;
pub mod event_dispatcher;
pub mod health_tracker;
pub mod intake;
pub mod publisher;
pub mod retry_queue;

#[cfg(test)]
pub(crate) mod testing;

pub use delivery_client::{DeliveryError, DeliveryTransport, HttpDeliveryClient};
pub use event_dispatcher::EventDispatcher;
pub use health_tracker::HealthTracker;
pub use intake::ConsumerIntake;
pub use publisher::{DeliveryOutcome, DeliveryReport, EventPublisher};
pub use retry_queue::{JobOutcome, RetryWorker, WorkerPool};
