use async_trait::async_trait;

use super::{PreparedRequest, Transform};
use crate::error::GatewayError;
use crate::registry::ServiceDefinition;
use crate::types::{AudioOptions, RequestOptions};

const TEMPERATURE: (f64, f64) = (0.0, 2.0);
const TOP_P: (f64, f64) = (0.0, 1.0);
const PENALTY: (f64, f64) = (-2.0, 2.0);
const MAX_TOKENS: (u32, u32) = (1, 65_536);

/// Merge binding defaults, clamp numeric ranges and drop what the model
/// does not support
pub struct NormalizeParameters;

#[async_trait]
impl Transform for NormalizeParameters {
    fn name(&self) -> &'static str {
        "parameters"
    }

    async fn apply(&self, mut request: PreparedRequest, service: &ServiceDefinition) -> Result<PreparedRequest, GatewayError> {
        merge_defaults(&mut request.options, service);
        clamp(&mut request.options);

        let options = &mut request.options;

        if !service.capabilities.tools {
            options.tools = None;
            options.tool_choice = None;
        }

        if !service.capabilities.audio {
            options.audio = None;
            options.modalities = None;
        }

        if options.tools.as_ref().is_some_and(Vec::is_empty) {
            options.tools = None;
        }

        options.extra.retain(|_, value| !value.is_null());
        if options.response_format.as_ref().is_some_and(serde_json::Value::is_null) {
            options.response_format = None;
        }
        if options.tool_choice.as_ref().is_some_and(serde_json::Value::is_null) {
            options.tool_choice = None;
        }

        Ok(request)
    }
}

fn merge_defaults(options: &mut RequestOptions, service: &ServiceDefinition) {
    let defaults = &service.binding.defaults;

    options.temperature = options.temperature.or(defaults.temperature);
    options.top_p = options.top_p.or(defaults.top_p);
    options.max_tokens = options.max_tokens.or(defaults.max_tokens);
    options.presence_penalty = options.presence_penalty.or(defaults.presence_penalty);
    options.frequency_penalty = options.frequency_penalty.or(defaults.frequency_penalty);
    options.seed = options.seed.or(defaults.seed);

    if options.wants_audio()
        && options.audio.is_none()
        && let Some(ref voice) = defaults.voice
    {
        options.audio = Some(AudioOptions {
            voice: voice.clone(),
            format: "mp3".to_owned(),
        });
    }
}

fn clamp(options: &mut RequestOptions) {
    options.temperature = options.temperature.and_then(|v| clamp_f64(v, TEMPERATURE));
    options.top_p = options.top_p.and_then(|v| clamp_f64(v, TOP_P));
    options.presence_penalty = options.presence_penalty.and_then(|v| clamp_f64(v, PENALTY));
    options.frequency_penalty = options.frequency_penalty.and_then(|v| clamp_f64(v, PENALTY));
    options.max_tokens = options.max_tokens.map(|v| v.clamp(MAX_TOKENS.0, MAX_TOKENS.1));
}

/// `None` for NaN
fn clamp_f64(value: f64, (min, max): (f64, f64)) -> Option<f64> {
    (!value.is_nan()).then(|| value.clamp(min, max))
}
