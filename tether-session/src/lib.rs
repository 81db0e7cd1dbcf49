//! Store-backed HTTP sessions for Tether.
//!
//! Each session lives in two store hashes, one for metadata and one for
//! attributes (see [`Convention`]). A [`RemoteSession`] reads each field at
//! most once and writes every change straight through, so any node sharing
//! the store sees the same session.
//!
//! The [`SessionManager`] creates, finds and invalidates sessions, and its
//! background cycle expires idle sessions and maintains the statistics keys
//! (`CURRENT_ACTIVE`, `MAX_ACTIVE`, `SESSION_CREATE_RATE`, ...).
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether_session::*;
//! use tether_store::{StoreClient, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let client = StoreClient::new(StoreConfig::from_env().build()).await?;
//!     let config = SessionConfig::new("myapp")
//!         .with_max_inactive_interval(std::time::Duration::from_secs(1800));
//!     let manager = Arc::new(SessionManager::new(Arc::new(client), config)?);
//!
//!     // Create a session and store data in it
//!     let session = manager.create_session(None).await?;
//!     session.set_attribute("username", "alice").await?;
//!
//!     // Retrieve it later, from any node
//!     if let Some(session) = manager.find_session(session.id()).await {
//!         let username: Option<String> = session.attribute("username").await;
//!         println!("User: {:?}", username);
//!     }
//!
//!     // Expire idle sessions and refresh statistics every minute
//!     manager.clone().spawn_maintenance();
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod convention;
pub mod error;
pub mod manager;
pub mod session;

pub use config::SessionConfig;
pub use convention::{Convention, Statistic, fields};
pub use error::{SessionError, SessionResult};
pub use manager::{MaintenanceReport, SessionManager, generate_session_id};
pub use session::{Principal, RemoteSession, SessionSnapshot};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::SessionConfig;
    pub use crate::convention::{Convention, Statistic};
    pub use crate::error::{SessionError, SessionResult};
    pub use crate::manager::{MaintenanceReport, SessionManager, generate_session_id};
    pub use crate::session::{Principal, RemoteSession};
}
