//! Filesystem persistence: the resume store and per-chat message logs.

pub mod job_store;
pub mod message_log;

pub use job_store::JobStore;
pub use message_log::MessageLog;
