//! Omnisia API crate - axum HTTP server and route handlers.
//!
//! Provides the REST API for retrieval-augmented chat, context management,
//! OCR and transcription preprocessing, LoRA training jobs, and health
//! checks.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod upload;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
