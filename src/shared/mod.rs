//! Cross-cutting shared pieces (configuration).

pub mod config;

pub use config::AppConfig;
