//! Google Generative Language API adapter (`?key=` auth, `models/` names).

use async_trait::async_trait;
use serde_json::Value;

use super::*;

pub struct GoogleAdapter {
    client: reqwest::Client,
}

impl GoogleAdapter {
    pub fn new() -> Self {
        Self::with_client(build_client())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for GoogleAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn is_token_candidate(event: &Value) -> bool {
    event["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .is_some_and(|s| !s.is_empty())
}

/// Listing ids come back without the `models/` prefix; accept either form.
fn model_path(model_id: &str) -> String {
    let bare = model_id.strip_prefix("models/").unwrap_or(model_id);
    format!("models/{bare}")
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Google
    }

    fn display_name(&self) -> &str {
        "Google Gemini"
    }

    async fn list_models(
        &self,
        provider: &Provider,
        secret: &Secret,
    ) -> Result<Vec<DiscoveredModel>, ProbeFailure> {
        let req = self
            .client
            .get(provider.endpoint("models"))
            .query(&[("key", secret.expose()), ("pageSize", "1000")]);
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
            .get(provider.endpoint(&model_path(model_id)))
            .query(&[("key", secret.expose())]);
        lookup(req).await
    }

    async fn chat_probe(
        &self,
        provider: &Provider,
        secret: &Secret,
        req: &ChatProbeRequest,
    ) -> Result<ChatReply, ProbeFailure> {
        let body = serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": &req.prompt}]}],
            "generationConfig": {"maxOutputTokens": req.max_tokens},
        });
        let path = model_path(&req.model_id);
        let http = if req.stream {
            self.client
                .post(provider.endpoint(&format!("{path}:streamGenerateContent")))
                .query(&[("alt", "sse"), ("key", secret.expose())])
        } else {
            self.client
                .post(provider.endpoint(&format!("{path}:generateContent")))
                .query(&[("key", secret.expose())])
        };
        timed_completion(http.json(&body), is_token_candidate).await
    }
}
