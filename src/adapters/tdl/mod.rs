//! Delegated external downloader adapter.

pub mod runner;

pub use runner::{TdlConfig, TdlRunner};
