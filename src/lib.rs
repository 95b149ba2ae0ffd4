//! Pustaka circulation server
//!
//! Lending and reservation engine of a library system: bounded copy counters
//! per catalog item, the borrow/return ledger with late fines, and a FIFO
//! reservation queue per item, served over a REST JSON API.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
