//! HTTP surface over the worker and catalog services
//!
//! Every model route is scoped by `/v1/tenants/{tenant}`. Service errors are
//! rendered through [`crate::error::Status`].

pub mod handlers;
pub mod models;
pub mod routes;

pub use routes::{AppState, create_router};
