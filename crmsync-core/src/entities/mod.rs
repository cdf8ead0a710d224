//! Persisted entities and the Postgres queries that read or write them.

pub mod change_event;
pub mod delivery_job;
pub mod subscription;

pub use change_event::ChangeEvent;
pub use delivery_job::{DeliveryJob, Enqueued, JobState, NewJob};
pub use subscription::{FailureRecorded, Subscription};
