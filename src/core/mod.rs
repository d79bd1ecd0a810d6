//! Core types: errors, configuration, cancellation.

pub mod config;
pub mod errors;
pub mod shutdown;
