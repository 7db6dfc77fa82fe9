use async_trait::async_trait;

use super::{PreparedRequest, Transform};
use crate::error::GatewayError;
use crate::registry::ServiceDefinition;
use crate::types::{Content, ContentPart, Message, Role};

/// Move system messages into the first user turn for upstreams without a
/// system role
pub struct FoldSystemMessages;

#[async_trait]
impl Transform for FoldSystemMessages {
    fn name(&self) -> &'static str {
        "fold-system"
    }

    async fn apply(&self, mut request: PreparedRequest, service: &ServiceDefinition) -> Result<PreparedRequest, GatewayError> {
        if service.capabilities.system_role {
            return Ok(request);
        }

        let (system, mut rest): (Vec<Message>, Vec<Message>) =
            request.messages.into_iter().partition(|m| m.role == Role::System);

        let preamble = system
            .iter()
            .map(Message::text_content)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        if !preamble.is_empty() {
            match rest.iter_mut().find(|m| m.role == Role::User) {
                Some(user) => prefix(user, &preamble),
                None => rest.insert(0, Message::text(Role::User, preamble)),
            }
        }

        request.messages = rest;
        Ok(request)
    }
}

fn prefix(message: &mut Message, preamble: &str) {
    message.content = Some(match message.content.take() {
        Some(Content::Parts(mut parts)) => {
            parts.insert(
                0,
                ContentPart::Text {
                    text: format!("{preamble}\n\n"),
                },
            );
            Content::Parts(parts)
        }
        Some(Content::Text(text)) if !text.is_empty() => Content::Text(format!("{preamble}\n\n{text}")),
        _ => Content::Text(preamble.to_owned()),
    });
}
