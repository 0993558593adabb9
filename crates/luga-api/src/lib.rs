//! Axum HTTP API server for LugaAI.
//!
//! This crate provides:
//! - Account, chat, speech, voice cloning, lip-sync and billing endpoints
//! - JWT bearer authentication with a revocation list
//! - Per-plan quota gating and metering
//! - A background poller for running lip-sync jobs
//! - Rate limiting, security headers and Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod services;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{LipSyncPoller, UserService};
pub use state::{AppState, Providers};
