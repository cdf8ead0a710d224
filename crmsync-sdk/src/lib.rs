//! Shared wire types, delivery signatures and API client for the CRM sync
//! broker and its consumers.

#![forbid(unsafe_code)]

#[cfg(feature = "client")]
pub mod client;
pub mod objects;
pub mod signature;
pub mod webhook;
