//! Synchronization engine for an HR self-service API: a polling cache over
//! the five request endpoints, filtered views and server-confirmed edits.

pub mod cache;
pub mod config;
pub mod error;
pub mod filters;
pub mod hr;
pub mod logging;
pub mod query;
pub mod render;

pub use error::SyncError;
pub use query::RequestBoard;
