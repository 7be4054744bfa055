pub mod agent;
pub mod changes;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod router;
pub mod util;
pub mod web;

pub use agent::{QueryResponse, SqlAgent};
pub use config::AppConfig;
