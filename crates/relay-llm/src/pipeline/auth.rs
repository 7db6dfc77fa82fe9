use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, header};
use secrecy::ExposeSecret;
use url::Url;

use super::{DispatchTarget, PreparedRequest, Transform};
use crate::error::GatewayError;
use crate::registry::{AuthStrategy, ProviderBinding, ServiceDefinition};

/// Resolve the endpoint template and attach credentials
pub struct ResolveTarget;

#[async_trait]
impl Transform for ResolveTarget {
    fn name(&self) -> &'static str {
        "target"
    }

    async fn apply(&self, mut request: PreparedRequest, service: &ServiceDefinition) -> Result<PreparedRequest, GatewayError> {
        let binding = &service.binding;
        let mut url = resolve_endpoint(binding)?;
        let mut headers = HeaderMap::new();

        match binding.auth {
            AuthStrategy::None => {}
            AuthStrategy::Bearer(ref secret) => {
                headers.insert(header::AUTHORIZATION, sensitive(&format!("Bearer {}", secret.expose_secret()))?);
            }
            AuthStrategy::Header { ref name, ref value } => {
                headers.insert(name.clone(), sensitive(value.expose_secret())?);
            }
            AuthStrategy::Query { ref param, ref value } => {
                url.query_pairs_mut().append_pair(param, value.expose_secret());
            }
        }

        for (name, value) in &binding.headers {
            headers.insert(name.clone(), value.clone());
        }

        request.target = DispatchTarget { url: Some(url), headers };
        Ok(request)
    }
}

/// Substitute `{model}`, `{deployment}` and `{region}` and parse the result
pub fn resolve_endpoint(binding: &ProviderBinding) -> Result<Url, GatewayError> {
    let mut endpoint = binding.endpoint.replace("{model}", &binding.upstream_model);

    for (placeholder, value) in [
        ("{deployment}", binding.deployment.as_deref()),
        ("{region}", binding.region.as_deref()),
    ] {
        if endpoint.contains(placeholder) {
            let value =
                value.ok_or_else(|| anyhow::anyhow!("endpoint placeholder {placeholder} has no value in the binding"))?;
            endpoint = endpoint.replace(placeholder, value);
        }
    }

    Url::parse(&endpoint).map_err(|e| GatewayError::Internal(anyhow::anyhow!("invalid upstream endpoint: {e}")))
}

fn sensitive(value: &str) -> Result<HeaderValue, GatewayError> {
    let mut value = HeaderValue::from_str(value).map_err(|_| anyhow::anyhow!("credential is not a valid header value"))?;
    value.set_sensitive(true);
    Ok(value)
}
