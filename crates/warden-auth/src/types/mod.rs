//! Domain types shared by the authority's components.

pub mod principal;
pub mod refresh_token;
pub mod revocation;
pub mod session;

pub use principal::Principal;
pub use refresh_token::{RefreshTokenRecord, RefreshTokenStatus};
pub use revocation::{RevocationEntry, RevocationFeed, RevocationReason, RevocationTarget};
pub use session::{Session, SessionStatus};
