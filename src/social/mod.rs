//! Member content: posts, votes, comments, notifications, alerts and search.
//! Functions here take a borrowed connection and never check moderation
//! state; the route extractors have already done that.

pub mod alerts;
pub mod comments;
pub mod notifications;
pub mod posts;
pub mod search;
pub mod votes;
