pub mod config;
pub mod db;
pub mod engine;
pub mod entities;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod utils;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

pub use config::Config;
pub use engine::BookingEngine;
pub use error::{AppError, AppResult};

#[derive(Clone)]
pub struct AppState {
    /// Used directly by the admin catalogue handlers
    pub db: DatabaseConnection,
    pub engine: Arc<BookingEngine>,
    pub config: Config,
}
