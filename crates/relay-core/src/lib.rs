//! Shared request-scoped types and the error contract used by every relay crate

#![allow(clippy::must_use_candidate)]

mod context;
mod error;

pub use context::{Authentication, RequestContext, Tier};
pub use error::HttpError;
