//! tg-export: Telegram chat archiver with resumable media downloads,
//! driven by a web API. Hexagonal architecture: domain at the core, ports at
//! the seams, adapters at the process boundary.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod shared;
pub mod usecases;
