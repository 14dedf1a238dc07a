pub mod api;
pub mod config;
pub mod error;
pub mod gemini;
pub mod idempotency;
pub mod mail;
pub mod models;
pub mod ratelimit;
pub mod security;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ErrorKind, Result};
pub use state::AppState;
