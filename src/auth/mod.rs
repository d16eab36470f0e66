pub mod handlers;
pub mod identity;
pub mod session;

pub use identity::{DynIdentityProvider, Identity, IdentityProvider, SqliteIdentityProvider};
