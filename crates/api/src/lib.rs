//! Storefront API Library
//!
//! HTTP boundary of the billing engine: webhook intake, catalog and payout
//! admin routes, and the mapping of billing errors onto responses.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError, LogFormat};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
