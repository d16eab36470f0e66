pub mod domain;
pub mod repository;
pub mod service;

pub use domain::{GuardDecision, ModerationState, RouteTarget};
pub use repository::{RepositoryError, SqliteUserRepository, UserRepository};
pub use service::{ActionOutcome, GuardOutcome, ModerationService};
