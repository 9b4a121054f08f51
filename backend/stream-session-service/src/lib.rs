//! Stream session coordinator
//!
//! Viewer sessions, chat, reactions and multi-camera switching for live
//! streams, with the consistency rules the broadcast dashboard relies on.

pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod repository;
pub mod services;
pub mod workers;

pub use error::{Result, SessionError};
pub use repository::{MemoryStore, PgStore, SessionStore};
pub use services::StreamSessionCoordinator;
