//! Web API adapter: the HTTP surface that drives the export engine.

pub mod error;
pub mod handlers;
pub mod routes;

pub use routes::router;
