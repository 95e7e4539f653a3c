//! Authentication module for the parley server
//!
//! Bearer token verification and the request extractor that turns a token
//! into a provisioned user.

mod extractor;
pub mod handlers;
mod service;

pub use extractor::{bearer_token, AuthenticatedUser};
pub use service::{Claims, TokenService};
