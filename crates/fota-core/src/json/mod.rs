//! Bounded JSON handling for the update server's resources.

pub mod tokens;
pub mod walker;

pub use tokens::{tokenize, JsonError, JsonToken, TokenKind, MAX_TOKENS};
pub use walker::{parse_deployment, parse_poll_resource, Deployment, PollResource, UpdateAction};
