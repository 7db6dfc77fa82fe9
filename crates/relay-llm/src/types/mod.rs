//! Canonical request and response types
//!
//! Every wire dialect converts to and from these; nothing outside
//! `protocol` and `convert` sees a provider-specific shape.

pub mod message;
pub mod options;
pub mod request;
pub mod response;
pub mod stream;
pub mod tool;

pub use message::{Content, ContentPart, FunctionCall, ImageUrl, Message, Role, ToolCall};
pub use options::{AudioOptions, RequestOptions};
pub use request::CompletionRequest;
pub use response::{AudioOutput, Choice, ChoiceMessage, CompletionResponse, FinishReason, Usage, new_completion_id, unix_now};
pub use stream::{StreamDelta, StreamEvent, StreamToolCall};
pub use tool::{FunctionDefinition, ToolDefinition};
