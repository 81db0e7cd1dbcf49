// Tether - Redis-backed HTTP session persistence for Rust
//
// This library keeps web sessions in a shared key/hash store so that any node
// of a cluster can serve any request. Session fields are read at most once
// and written straight through.

// Re-export the store layer
pub use tether_store;

// Re-export the session layer
pub use tether_session;

pub mod logging;

pub use tether_session::{
    Convention, MaintenanceReport, Principal, RemoteSession, SessionConfig, SessionError,
    SessionManager, SessionResult, Statistic,
};
pub use tether_store::{
    KeyScan, KeyScanner, MemoryStore, PropertyCache, RemoteLocation, RemoteStore, StoreClient,
    StoreConfig, StoreError, StoreResult,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::logging::subscriber;
    pub use tether_session::prelude::*;
    pub use tether_store::prelude::*;
}
