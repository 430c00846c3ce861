//! Port traits. API boundaries for the hexagon.
//!
//! - Inbound: Called by the web API adapter into the application
//! - Outbound: Called by application into infrastructure

pub mod inbound;
pub mod outbound;

pub use inbound::ExportControlPort;
pub use outbound::{
    DelegatedDownloaderPort, DelegatedItem, DelegatedProgress, MessageLogPort, ResumeStorePort,
    TgGateway,
};
