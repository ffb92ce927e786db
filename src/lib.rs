//! Model Manager - model loading coordination
//!
//! Tracks base and fine-tuned models through REQUESTED, LOADING, SUCCEEDED
//! and FAILED. Loader workers claim requested models through conditional
//! status updates, download them from Hugging Face, Ollama or an object store,
//! classify the downloaded tree and upload it to the model object store.

pub mod api;
pub mod config;
pub mod error;
pub mod identity;
pub mod loader;
pub mod metrics;
pub mod object_store;
pub mod queue;
pub mod service;
pub mod store;

pub use config::Config;
pub use error::{Code, Status, StatusResult};
pub use loader::{Loader, LoaderSettings};
pub use service::{CatalogService, LoadingResult, ModelClient, WorkerService};
pub use store::{Store, StoreError};
