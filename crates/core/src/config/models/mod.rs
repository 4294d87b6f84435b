pub mod api_observability;
pub mod app_config;
pub mod database;
pub mod runner_handlers;

pub use api_observability::{ApiConfig, LoggingConfig};
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use runner_handlers::{HandlersConfig, RunnerConfig};
