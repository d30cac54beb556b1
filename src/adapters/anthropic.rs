//! Anthropic Messages API adapter.

use async_trait::async_trait;
use serde_json::Value;

use super::*;

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self::with_client(build_client())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn authed(&self, req: reqwest::RequestBuilder, secret: &Secret) -> reqwest::RequestBuilder {
        req.header("x-api-key", secret.expose())
            .header("anthropic-version", API_VERSION)
    }
}

impl Default for AnthropicAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn is_token_event(event: &Value) -> bool {
    event["type"] == "content_block_delta"
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Anthropic
    }

    fn display_name(&self) -> &str {
        "Anthropic"
    }

    async fn list_models(
        &self,
        provider: &Provider,
        secret: &Secret,
    ) -> Result<Vec<DiscoveredModel>, ProbeFailure> {
        let req = self.authed(self.client.get(provider.endpoint("models")), secret);
        let raw = fetch_body(req).await?;
        decode_model_list(&raw)
    }

    async fn lookup_model(
        &self,
        provider: &Provider,
        secret: &Secret,
        model_id: &str,
    ) -> Result<Lookup, ProbeFailure> {
        if !provider.model_lookup {
            return Ok(Lookup::Unsupported);
        }
        let url = provider.endpoint(&format!("models/{model_id}"));
        lookup(self.authed(self.client.get(url), secret)).await
    }

    async fn chat_probe(
        &self,
        provider: &Provider,
        secret: &Secret,
        req: &ChatProbeRequest,
    ) -> Result<ChatReply, ProbeFailure> {
        let body = serde_json::json!({
            "model": &req.model_id,
            "max_tokens": req.max_tokens,
            "messages": [{"role": "user", "content": &req.prompt}],
            "stream": req.stream,
        });
        let http = self
            .authed(self.client.post(provider.endpoint("messages")), secret)
            .json(&body);
        timed_completion(http, is_token_event).await
    }
}
