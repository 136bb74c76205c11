//! # bggweb common library
//!
//! Shared code for the bggweb service:
//! - Error types
//! - Configuration loading and root folder resolution
//! - Job event types and the broadcast event bus
//! - Database schema initialization

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
