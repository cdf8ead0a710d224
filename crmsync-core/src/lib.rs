#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod collaborators;
pub mod config;
pub mod crm;
pub mod entities;
pub mod error;
pub mod events;
pub mod framework;
pub mod matcher;
pub mod metrics;
pub mod processors;
pub mod registry;
pub mod store;
pub mod transform;
pub mod utils;

pub use error::PipelineError;
