//! Session store: the single entry point to session, refresh lineage and
//! revocation persistence.

pub mod store;

pub use store::{CleanupReport, SessionStore, SessionStoreConfig};
