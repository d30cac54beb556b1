//! OpenAI-compatible adapter.
//!
//! Covers OpenAI itself and every vendor that clones its surface (Groq,
//! DeepSeek, Mistral, OpenRouter, Together, Fireworks, …): bearer auth,
//! `GET /models`, `GET /models/{id}`, `POST /chat/completions`.

use async_trait::async_trait;
use serde_json::Value;

use super::*;

pub struct OpenAiAdapter {
    client: reqwest::Client,
}

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self::with_client(build_client())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// A streamed chunk counts as a token once it carries actual text.
fn is_token_chunk(event: &Value) -> bool {
    let delta = &event["choices"][0]["delta"];
    ["content", "reasoning_content", "reasoning"]
        .iter()
        .any(|k| delta[*k].as_str().is_some_and(|s| !s.is_empty()))
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::OpenAi
    }

    fn display_name(&self) -> &str {
        "OpenAI-compatible"
    }

    async fn list_models(
        &self,
        provider: &Provider,
        secret: &Secret,
    ) -> Result<Vec<DiscoveredModel>, ProbeFailure> {
        let req = self
            .client
            .get(provider.endpoint("models"))
            .bearer_auth(secret.expose());
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
        let req = self
            .client
            .get(provider.endpoint(&format!("models/{model_id}")))
            .bearer_auth(secret.expose());
        lookup(req).await
    }

    async fn chat_probe(
        &self,
        provider: &Provider,
        secret: &Secret,
        req: &ChatProbeRequest,
    ) -> Result<ChatReply, ProbeFailure> {
        let mut body = serde_json::json!({
            "model": &req.model_id,
            "messages": [{"role": "user", "content": &req.prompt}],
            "max_tokens": req.max_tokens,
        });
        if req.stream {
            body["stream"] = serde_json::json!(true);
        }
        let http = self
            .client
            .post(provider.endpoint("chat/completions"))
            .bearer_auth(secret.expose())
            .json(&body);
        timed_completion(http, is_token_chunk).await
    }
}
