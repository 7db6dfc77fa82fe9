//! Wire formats of the supported upstream dialects
//!
//! Plain serde types; conversion to and from the canonical types lives in
//! `convert`.

pub mod generate;
pub mod messages;
pub mod openai;
