use async_trait::async_trait;
use relay_config::WireDialect;

use super::{PreparedRequest, Transform};
use crate::error::GatewayError;
use crate::registry::ServiceDefinition;
use crate::types::{Content, ContentPart, Message, Role};

/// Strip what the target dialect or model cannot accept and fill gaps with
/// safe defaults
pub struct SanitizeMessages;

#[async_trait]
impl Transform for SanitizeMessages {
    fn name(&self) -> &'static str {
        "sanitize"
    }

    async fn apply(&self, mut request: PreparedRequest, service: &ServiceDefinition) -> Result<PreparedRequest, GatewayError> {
        request.messages = request
            .messages
            .into_iter()
            .map(|message| sanitize(message, service))
            .collect();

        Ok(request)
    }
}

fn sanitize(mut message: Message, service: &ServiceDefinition) -> Message {
    let capabilities = service.capabilities;

    if service.binding.dialect != WireDialect::OpenaiChat {
        message.name = None;
    }

    if !capabilities.tools {
        message.tool_calls = None;
        if message.role == Role::Tool {
            message.role = Role::User;
            message.tool_call_id = None;
        }
    }

    if !capabilities.vision
        && let Some(Content::Parts(parts)) = message.content.take()
    {
        let text = parts
            .into_iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text),
                ContentPart::ImageUrl { .. } => None,
            })
            .collect::<String>();
        message.content = Some(Content::Text(text));
    }

    match message.content {
        None => message.content = Some(Content::Text(String::new())),
        Some(Content::Parts(ref parts)) if parts.is_empty() => message.content = Some(Content::Text(String::new())),
        Some(_) => {}
    }

    message
}
