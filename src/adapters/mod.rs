//! Infrastructure adapters. Implement ports at the process boundary.
//!
//! Telegram, filesystem, the web API, and the external downloader. Map
//! infrastructure errors to DomainError.

pub mod http;
pub mod persistence;
pub mod tdl;
pub mod telegram;
