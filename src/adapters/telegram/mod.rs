//! Telegram adapters: gateway, session storage, rate gate, tl mapping.

pub mod client;
pub mod mapper;
pub mod rate_limit;
pub mod session;

pub use client::GrammersTgGateway;
pub use rate_limit::RateGate;
pub use session::SessionStore;
