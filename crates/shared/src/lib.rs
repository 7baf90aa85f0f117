//! Storefront shared types and utilities
//!
//! Records persisted by the billing engine plus database helpers used by both
//! the billing crate and the API server.

pub mod db;
pub mod money;
pub mod types;

pub use db::*;
pub use money::format_minor_units;
pub use types::*;
