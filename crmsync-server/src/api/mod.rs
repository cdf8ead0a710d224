//! HTTP API of the broker, the consumer and the embedded CRM.

pub mod broker;
pub mod consumer;
pub mod error;
pub mod extractors;
pub mod objects;
