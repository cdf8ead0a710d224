//! In-process event plumbing.
//!
//! # Event Flow
//!
//! 1. `ObjectStore` mutation emits a `ChangeEvent`
//! 2. `EventDispatcher` receives it and calls `EventPublisher::publish`
//! 3. The publisher fans out signed deliveries to matching subscriptions
//!
//! Events from `POST /webhook` skip the channel and reach the publisher directly.

pub mod channels;

pub use channels::{
    ChangeEventReceiver, ChangeEventSender, DEFAULT_CHANNEL_BUFFER, change_event_channel,
};
