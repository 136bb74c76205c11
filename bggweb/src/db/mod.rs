//! Database access

pub mod games;
pub mod jobs;
pub mod settings;
