//! Wire-protocol vocabulary shared by the encrypted transport client and the
//! server counterpart that mirrors it.

pub mod error;
pub mod protocol;

pub use error::HttpFailure;
