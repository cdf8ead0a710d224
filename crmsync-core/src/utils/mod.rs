//! Small helpers shared by processors.

pub mod calendar;
pub mod secret;
