use std::sync::Arc;

use async_trait::async_trait;
use relay_config::PersonaConfig;

use super::{PreparedRequest, Transform};
use crate::error::GatewayError;
use crate::registry::ServiceDefinition;
use crate::types::{Content, ContentPart, Message, Role};

/// Source of system prompt text
///
/// The text is opaque configuration; implementations only decide which
/// string applies to a model.
pub trait PersonaProvider: Send + Sync {
    fn system_prompt(&self, service: &ServiceDefinition) -> String;

    fn json_directive(&self) -> String;
}

/// Persona backed by the `[persona]` table and per-model overrides
#[derive(Debug, Clone)]
pub struct ConfiguredPersona {
    default: String,
    json_directive: String,
}

impl ConfiguredPersona {
    pub fn new(config: &PersonaConfig) -> Self {
        Self {
            default: config.default.clone(),
            json_directive: config.json_directive.clone(),
        }
    }
}

impl PersonaProvider for ConfiguredPersona {
    fn system_prompt(&self, service: &ServiceDefinition) -> String {
        service.persona.clone().unwrap_or_else(|| self.default.clone())
    }

    fn json_directive(&self) -> String {
        self.json_directive.clone()
    }
}

/// Insert a system message when the conversation has none
///
/// When JSON output is requested the directive is appended to the first
/// system message instead, at most once.
pub struct InjectPersona {
    provider: Arc<dyn PersonaProvider>,
}

impl InjectPersona {
    pub fn new(provider: Arc<dyn PersonaProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Transform for InjectPersona {
    fn name(&self) -> &'static str {
        "persona"
    }

    async fn apply(&self, mut request: PreparedRequest, service: &ServiceDefinition) -> Result<PreparedRequest, GatewayError> {
        let json_mode = request.options.json_mode();
        let directive = self.provider.json_directive();

        match request.messages.iter_mut().find(|m| m.role == Role::System) {
            Some(system) if json_mode => {
                if !system.text_content().contains(&directive) {
                    append_text(system, &directive);
                }
            }
            Some(_) => {}
            None => {
                let mut prompt = self.provider.system_prompt(service);
                if json_mode && !prompt.contains(&directive) {
                    prompt = join(&prompt, &directive);
                }
                if !prompt.is_empty() {
                    request.messages.insert(0, Message::text(Role::System, prompt));
                }
            }
        }

        Ok(request)
    }
}

fn join(base: &str, addition: &str) -> String {
    if base.is_empty() {
        addition.to_owned()
    } else {
        format!("{base}\n\n{addition}")
    }
}

fn append_text(message: &mut Message, addition: &str) {
    match message.content.take() {
        Some(Content::Parts(mut parts)) => {
            parts.push(ContentPart::Text {
                text: format!("\n\n{addition}"),
            });
            message.content = Some(Content::Parts(parts));
        }
        Some(Content::Text(text)) => message.content = Some(Content::Text(join(&text, addition))),
        None => message.content = Some(Content::Text(addition.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use relay_config::WireDialect;

    use super::*;
    use crate::pipeline::test_support::service;
    use crate::types::RequestOptions;

    fn step() -> InjectPersona {
        InjectPersona::new(Arc::new(ConfiguredPersona::new(&PersonaConfig {
            default: "You are terse.".into(),
            json_directive: "Reply in JSON.".into(),
        })))
    }

    fn json_options() -> RequestOptions {
        RequestOptions {
            json: true,
            ..RequestOptions::default()
        }
    }

    #[tokio::test]
    async fn inserting_twice_is_the_same_as_once() {
        let step = step();
        let service = service(WireDialect::OpenaiChat);

        for options in [RequestOptions::default(), json_options()] {
            let request = PreparedRequest::new(vec![Message::text(Role::User, "hi")], options);
            let once = step.apply(request, &service).await.unwrap();
            let twice = step.apply(once.clone(), &service).await.unwrap();
            assert_eq!(once.messages, twice.messages);
        }
    }

    #[tokio::test]
    async fn existing_system_message_is_kept() {
        let request = PreparedRequest::new(
            vec![Message::text(Role::System, "Be a pirate."), Message::text(Role::User, "hi")],
            RequestOptions::default(),
        );

        let prepared = step().apply(request, &service(WireDialect::OpenaiChat)).await.unwrap();

        assert_eq!(prepared.messages.len(), 2);
        assert_eq!(prepared.messages[0].text_content(), "Be a pirate.");
    }

    #[tokio::test]
    async fn json_mode_appends_directive_to_existing_system_message() {
        let request = PreparedRequest::new(
            vec![Message::text(Role::System, "Be a pirate."), Message::text(Role::User, "hi")],
            json_options(),
        );

        let prepared = step().apply(request, &service(WireDialect::OpenaiChat)).await.unwrap();

        insta::assert_snapshot!(prepared.messages[0].text_content(), @r"
        Be a pirate.

        Reply in JSON.
        ");
    }

    #[tokio::test]
    async fn model_persona_overrides_default() {
        let mut service = service(WireDialect::OpenaiChat);
        service.persona = Some("You are a poet.".into());

        let request = PreparedRequest::new(vec![Message::text(Role::User, "hi")], RequestOptions::default());
        let prepared = step().apply(request, &service).await.unwrap();

        assert_eq!(prepared.messages[0].text_content(), "You are a poet.");
    }
}
