//! HTTP read surface
//!
//! Every handler reads through the read-only pool in [`AppState`]; nothing
//! here mutates leg state.

pub mod health;
pub mod legs;
pub mod stats;

pub use health::health_routes;
pub use legs::{get_leg_by_key, list_legs};
pub use stats::get_stats;
