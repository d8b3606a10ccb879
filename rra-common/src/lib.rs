//! # RRA Common Library
//!
//! Shared code for the feed archiver and its read surface:
//! - Persistence store (items and archival legs)
//! - Leg state model and display states
//! - Configuration loading and validation
//! - Clock abstraction for real and simulated time

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
