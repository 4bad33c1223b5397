//! Access token claims and the signed-token codec.

pub mod claims;
pub mod codec;

pub use claims::AccessClaims;
pub use codec::{CodecError, TokenCodec};
