//! # zapmux-core
//!
//! Core types, traits, configuration, and error handling for the zapmux
//! WhatsApp session manager.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::ZapError;
